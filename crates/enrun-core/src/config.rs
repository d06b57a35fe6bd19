// crates/enrun-core/src/config.rs

use crate::error::ConfigError;
use anyhow::Result;
use std::env;

/// A string that never prints its contents via `Debug` or `Display`.
///
/// Mirrors `fluent_core::auth`'s `SecureString`:
/// bearer tokens and API keys end up in config structs that get logged
/// at `debug!` level during development, so the wrapper keeps a stray
/// `{:?}` from leaking a credential.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED] {} bytes)", self.0.len())
    }
}

/// Process-wide configuration, read from the environment exactly once
/// per invocation and threaded explicitly through the engine — per the
/// design note in the original spec, no globals.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `DATA_ENGINE_API_URL` — base URL for the internal persistence API
    /// (pipeline-runs, step-results, entity-state, timeline, …) and, by
    /// convention, the `execute-v1` operations service mount point.
    pub data_engine_api_url: String,

    /// `DATA_ENGINE_INTERNAL_API_KEY` — bearer token for the internal
    /// API and the operations service.
    pub data_engine_internal_api_key: Secret,

    /// `PARALLEL_API_KEY` — key for the deep-research provider. Absent
    /// is not fatal at startup: the relevant pollers degrade to a
    /// failed envelope with a `missing_parallel_api_key` provider
    /// attempt (see `enrun-engine::poller`).
    pub parallel_api_key: Option<Secret>,
}

impl RuntimeConfig {
    /// Reads and validates the three environment variables the runner
    /// consumes. Missing `DATA_ENGINE_API_URL` or
    /// `DATA_ENGINE_INTERNAL_API_KEY` is fatal and raised before any
    /// pipeline-run status transition is attempted.
    pub fn from_env() -> Result<Self> {
        let data_engine_api_url = require_env("DATA_ENGINE_API_URL")?;
        let data_engine_internal_api_key = Secret::new(require_env("DATA_ENGINE_INTERNAL_API_KEY")?);
        let parallel_api_key = env::var("PARALLEL_API_KEY").ok().filter(|v| !v.is_empty()).map(Secret::new);

        Ok(Self {
            data_engine_api_url,
            data_engine_internal_api_key,
            parallel_api_key,
        })
    }
}

fn require_env(name: &'static str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar(name).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_does_not_leak() {
        let secret = Secret::new("super-secret-token".to_string());
        let debug_repr = format!("{:?}", secret);
        assert!(!debug_repr.contains("super-secret-token"));
        assert!(debug_repr.contains("REDACTED"));
    }

    #[test]
    fn missing_env_var_is_config_error() {
        let err = require_env("ENRUN_CORE_TEST_VAR_THAT_DOES_NOT_EXIST");
        assert!(err.is_err());
    }
}
