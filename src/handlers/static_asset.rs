//! The static asset handler: serves files out of a fixed root, discovered
//! once at construction time and never re-walked at request time — the
//! in-memory file set both answers "does this exist" and is the sandbox
//! boundary: a request can only ever reach a path this walk already found.

use super::{Handler, HandlerResult};
use crate::config::MatchCriteria;
use crate::error::ConfigError;
use crate::http::{mime_for_path, HttpRequest, HttpResponse};
use rustc_hash::FxHashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub struct StaticAssetHandler {
    criteria: MatchCriteria,
    static_root: PathBuf,
    url_prefix: String,
    files: FxHashSet<String>,
}

impl StaticAssetHandler {
    pub fn new(criteria: MatchCriteria, context: &serde_json::Value) -> Result<Self, ConfigError> {
        let static_root = context
            .get("staticRoot")
            .and_then(|v| v.as_str())
            .ok_or(ConfigError::MissingField {
                handler_type: "serveStatic",
                field: "context.staticRoot",
            })?;
        let url_prefix = criteria
            .get("url")
            .and_then(|v| v.first())
            .cloned()
            .ok_or(ConfigError::MissingField {
                handler_type: "serveStatic",
                field: "criteria.url",
            })?;

        let static_root = PathBuf::from(static_root);
        let mut files = FxHashSet::default();
        discover_files(&static_root, &static_root, &mut files).map_err(|reason| {
            ConfigError::InvalidContext {
                handler_type: "serveStatic",
                reason,
            }
        })?;

        Ok(StaticAssetHandler {
            criteria,
            static_root,
            url_prefix,
            files,
        })
    }

    fn not_found(rel: &str) -> HttpResponse {
        let body = format!(
            "<html><body><h1>404 Not Found</h1><p>{rel} does not exist on this server.</p></body></html>"
        );
        HttpResponse::new(404, body.into_bytes())
    }
}

impl Handler for StaticAssetHandler {
    fn criteria(&self) -> &MatchCriteria {
        &self.criteria
    }

    fn handle(&self, req: &HttpRequest) -> HandlerResult {
        let rel = req
            .url
            .strip_prefix(self.url_prefix.as_str())
            .unwrap_or(req.url.as_str())
            .trim_start_matches('/');

        if !self.files.contains(rel) {
            return Ok(Self::not_found(&req.url));
        }

        let path = self.static_root.join(rel);
        match fs::read(&path) {
            Ok(body) => Ok(HttpResponse::new(200, body).with_header("Content-Type", mime_for_path(&path))),
            Err(_) => Ok(Self::not_found(&req.url)),
        }
    }
}

/// Walks `root` recursively, recording every regular file's path relative
/// to `root` (forward-slash separated, no leading slash). Run once at
/// startup, not per-request.
fn discover_files(base: &Path, dir: &Path, out: &mut FxHashSet<String>) -> Result<(), String> {
    let entries = fs::read_dir(dir).map_err(|e| format!("cannot read {}: {e}", dir.display()))?;
    for entry in entries {
        let entry = entry.map_err(|e| format!("cannot read entry in {}: {e}", dir.display()))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| format!("cannot stat {}: {e}", path.display()))?;
        if file_type.is_dir() {
            discover_files(base, &path, out)?;
        } else if file_type.is_file() {
            if let Ok(rel) = path.strip_prefix(base) {
                out.insert(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}
