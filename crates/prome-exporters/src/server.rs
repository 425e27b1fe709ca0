// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

//! Serves the exporter's own process metrics when running in server mode.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use exporter_agent::input::Source;
use exporter_agent::output::Serializer;
use exporter_plugins::inputs::process::ProcessInput;
use exporter_plugins::serializers::prometheus::PrometheusSerializer;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Accepts connections until `shutdown` fires. Connections still open at
/// that point are aborted.
pub async fn serve(
    listener: TcpListener,
    metrics_path: String,
    shutdown: CancellationToken,
) -> Result<(), io::Error> {
    let server = hyper::server::conn::http1::Builder::new();
    let process = Arc::new(ProcessInput::current());
    let metrics_path = Arc::new(metrics_path);
    let mut connections = JoinSet::new();

    loop {
        let conn = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                debug!("Metrics server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Metrics server error: {e}");
                    return Err(e);
                }
                Ok((conn, _)) => conn,
            },
            Some(finished) = connections.join_next() => {
                if let Err(e) = finished {
                    error!("Connection handler failed: {e}");
                }
                continue;
            }
        };

        let process = Arc::clone(&process);
        let metrics_path = Arc::clone(&metrics_path);
        let service = service_fn(move |req: Request<Incoming>| {
            let process = Arc::clone(&process);
            let is_metrics =
                req.method() == Method::GET && req.uri().path() == metrics_path.as_str();
            async move { Ok::<_, Infallible>(respond(is_metrics, &process).await) }
        });
        let server = server.clone();
        connections.spawn(async move {
            if let Err(e) = server.serve_connection(TokioIo::new(conn), service).await {
                debug!("Connection error: {e}");
            }
        });
    }
}

async fn respond(is_metrics: bool, process: &ProcessInput) -> Response<Full<Bytes>> {
    if !is_metrics {
        return plain(StatusCode::NOT_FOUND, "404 page not found\n".to_string());
    }
    let serializer = PrometheusSerializer;
    let encoded = match process.gather().await {
        Ok(families) => serializer.serialize(&families).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    match encoded {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, serializer.content_type())
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| plain(StatusCode::INTERNAL_SERVER_ERROR, String::new())),
        Err(e) => {
            error!("Failed to collect process metrics: {e}");
            plain(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n"))
        }
    }
}

fn plain(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get(address: &str, path: &str) -> String {
        let mut stream = TcpStream::connect(address).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8(response).unwrap()
    }

    #[tokio::test]
    async fn serves_only_the_metrics_path() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, "/metrics".to_string(), shutdown.clone()));

        let missing = get(&address, "/other").await;
        assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

        let metrics = get(&address, "/metrics").await;
        if cfg!(target_os = "linux") {
            assert!(metrics.starts_with("HTTP/1.1 200"), "{metrics}");
            assert!(metrics.contains("process_threads"));
        } else {
            assert!(metrics.starts_with("HTTP/1.1 500"), "{metrics}");
        }

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
