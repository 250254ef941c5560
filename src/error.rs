//! Typed error taxonomy for the codec, handler construction, and upstream calls.
//!
//! Errors here map directly onto the response/process policy table: most are
//! turned into an HTTP status by the dispatcher, a few are fatal at startup.

use thiserror::Error;

/// Failures while turning raw bytes into an [`crate::http::HttpRequest`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

/// Failures constructing the handler list from settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown handler type: {0}")]
    UnknownHandlerType(String),
    #[error("handler context missing required field `{field}` for type `{handler_type}`")]
    MissingField {
        handler_type: &'static str,
        field: &'static str,
    },
    #[error("invalid handler context for type `{handler_type}`: {reason}")]
    InvalidContext {
        handler_type: &'static str,
        reason: String,
    },
    #[error("settings key `{0}` not found")]
    UnknownSettingsKey(String),
    #[error("failed to read settings file {path}: {source}")]
    SettingsIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    SettingsParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures while a proxy/load-balancing handler talks to an upstream.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    #[error("upstream sent a malformed response: {0}")]
    Malformed(String),
    /// A weighted upstream's ranges should cover `[0.0, 1.0)` exactly; this
    /// fires when they don't. Misconfiguration, not a runtime condition —
    /// the server should not have started with this handler in the first
    /// place.
    #[error("weighted strategy: no upstream range contains {0}")]
    UnreachableRange(f64),
}
