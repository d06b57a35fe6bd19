// crates/enrun-core/src/error.rs

use std::fmt;

/// Configuration-error category. Internal functions return
/// `anyhow::Result` throughout the codebase (matching the rest of the
/// stack); this one is kept as a typed variant rather than a bare
/// string because `config::require_env` needs a stable identity for
/// the missing-variable name, not just a formatted message.
#[derive(Debug)]
pub enum ConfigError {
    MissingEnvVar(&'static str),
}

#[derive(Debug)]
pub enum HttpError {
    RequestFailed { url: String, status: Option<u16>, message: String },
    MissingDataEnvelope { url: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingEnvVar(var) => write!(f, "missing required environment variable: {}", var),
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::RequestFailed { url, status, message } => match status {
                Some(code) => write!(f, "request to {} failed with status {}: {}", url, code, message),
                None => write!(f, "request to {} failed: {}", url, message),
            },
            HttpError::MissingDataEnvelope { url } => {
                write!(f, "response from {} had no `data` envelope", url)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for HttpError {}

/// Convenience alias matching the stack-wide `anyhow::Result` usage at
/// call sites.
pub type Result<T> = anyhow::Result<T>;
