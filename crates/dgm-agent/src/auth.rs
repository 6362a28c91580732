//! API key lookup for the developer oracle

use dgm_core::{DgmError, Result};
use std::env;

/// Read the oracle API key from the configured environment variable
pub fn get_api_key(env_var: &str) -> Result<String> {
    match env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::info!("Using API key from {}", env_var);
            Ok(key)
        }
        _ => Err(DgmError::Auth(format!(
            "No API key found. Set {}=... or change oracle.api_key_env in .dgm/config.toml",
            env_var
        ))),
    }
}
