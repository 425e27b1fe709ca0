// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};

const HEADER: &str = "// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters\n\
                      // SPDX-License-Identifier: Apache-2.0\n";

fn rust_sources(dir: &Path, found: &mut Vec<PathBuf>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            rust_sources(&path, found);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            found.push(path);
        }
    }
}

#[test]
fn every_workspace_source_carries_the_project_header() {
    let crates = Path::new(env!("CARGO_MANIFEST_DIR")).parent().unwrap();
    let mut sources = Vec::new();
    for member in ["exporter-agent", "exporter-plugins", "prome-exporters"] {
        for dir in ["src", "tests"] {
            let path = crates.join(member).join(dir);
            if path.is_dir() {
                rust_sources(&path, &mut sources);
            }
        }
    }
    assert!(sources.len() > 20, "found only {} sources", sources.len());

    let missing: Vec<_> = sources
        .iter()
        .filter(|path| !fs::read_to_string(path).unwrap().starts_with(HEADER))
        .collect();
    assert!(missing.is_empty(), "files without the header: {missing:?}");
}
