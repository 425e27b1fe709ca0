// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::time::Duration;

use exporter_agent::errors::{ConfigError, GatherError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tracing::debug;

/// Request timeout used by every HTTP adapter unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// At most this many bytes of an error response body are kept.
pub const MAX_ERROR_BODY_LEN: usize = 1024;

/// Builds a reqwest client with the given timeout.
pub fn build_client(owner: &str, timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::InvalidOptions {
            name: owner.to_string(),
            reason: format!("failed to build http client: {e}"),
        })
}

/// Converts configured headers into a header map, rejecting names or values
/// that are not valid HTTP.
pub fn header_map(
    owner: &str,
    headers: &BTreeMap<String, String>,
) -> Result<HeaderMap, ConfigError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidOptions {
                name: owner.to_string(),
                reason: format!("invalid header name {name:?}: {e}"),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidOptions {
            name: owner.to_string(),
            reason: format!("invalid value for header {name}: {e}"),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// First line of at most [`MAX_ERROR_BODY_LEN`] bytes of `body`.
#[must_use]
pub fn first_line(body: &[u8]) -> String {
    let limit = body.len().min(MAX_ERROR_BODY_LEN);
    String::from_utf8_lossy(&body[..limit])
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// A successful scrape: the raw body and the announced content type.
#[derive(Debug)]
pub struct Scrape {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

/// GETs `url` and returns the body of a 2xx answer. Any other status is a
/// [`GatherError::Status`] carrying the first line of the body.
pub async fn scrape(
    client: &reqwest::Client,
    url: &str,
    headers: &HeaderMap,
) -> Result<Scrape, GatherError> {
    let response = client
        .get(url)
        .headers(headers.clone())
        .send()
        .await
        .map_err(|e| GatherError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.bytes().await.map_err(|e| GatherError::Request {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if !status.is_success() {
        return Err(GatherError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body: first_line(&body),
        });
    }
    debug!(url, bytes = body.len(), "Scraped endpoint");
    Ok(Scrape {
        body: body.to_vec(),
        content_type,
    })
}

/// `host:port` of a URL, or just the host when the URL carries no port.
#[must_use]
pub fn instance_of(url: &reqwest::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
