use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

/// Locate the web directory relative to `base`: `base/<target>`, then
/// `base/../<target>`, falling back to `target` as given.
pub fn resolve_web_dir(base: &Path, target: &str) -> PathBuf {
    for candidate in [base.join(target), base.join("..").join(target)] {
        if candidate.exists() {
            info!(path = %candidate.display(), "found web directory");
            return candidate;
        }
    }
    warn!(target = %target, "could not find web directory, using it as given");
    PathBuf::from(target)
}

/// Body of `GET /debug/web`.
#[derive(Debug, Serialize)]
pub struct WebListing {
    #[serde(rename = "webDir")]
    pub web_dir: String,
    pub files: Vec<String>,
    pub cwd: String,
}

pub fn list_web_dir(web_dir: &Path) -> WebListing {
    let mut files: Vec<String> = fs::read_dir(web_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    files.sort();

    WebListing {
        web_dir: web_dir.display().to_string(),
        files,
        cwd: std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    }
}
