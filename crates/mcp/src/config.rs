//! Server configuration resolved from the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dirs_next::config_dir;
use tracing::warn;

pub const WORKFLOWS_PATH_ENV: &str = "STEPWISE_WORKFLOWS_PATH";
pub const CACHE_TTL_ENV: &str = "STEPWISE_CACHE_TTL_MS";
pub const VALIDATE_WORKFLOWS_ENV: &str = "STEPWISE_VALIDATE_WORKFLOWS";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(300_000);

/// Settings for the workflow store behind the MCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Directory scanned for `*.json`, `*.yaml`, and `*.yml` definitions.
    pub workflows_path: PathBuf,
    /// Zero disables caching.
    pub cache_ttl: Duration,
    /// Drop definitions whose validation report is invalid.
    pub validate_on_load: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workflows_path: default_workflows_path(),
            cache_ttl: DEFAULT_CACHE_TTL,
            validate_on_load: true,
        }
    }
}

impl ServerConfig {
    /// Builds the configuration from `STEPWISE_*` environment variables,
    /// falling back to defaults for unset or unparseable values.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = env::var(WORKFLOWS_PATH_ENV)
            && !path.trim().is_empty()
        {
            config.workflows_path = PathBuf::from(path.trim());
        }

        if let Ok(raw) = env::var(CACHE_TTL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(millis) => config.cache_ttl = Duration::from_millis(millis),
                Err(error) => warn!(value = %raw, %error, "ignoring invalid {CACHE_TTL_ENV}"),
            }
        }

        if let Ok(raw) = env::var(VALIDATE_WORKFLOWS_ENV) {
            match parse_flag(&raw) {
                Some(flag) => config.validate_on_load = flag,
                None => warn!(value = %raw, "ignoring invalid {VALIDATE_WORKFLOWS_ENV}"),
            }
        }

        config
    }
}

/// Returns `<config_dir>/stepwise/workflows`.
pub fn default_workflows_path() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stepwise")
        .join("workflows")
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_overrides_defaults() {
        temp_env::with_vars(
            [
                (WORKFLOWS_PATH_ENV, Some("/srv/workflows")),
                (CACHE_TTL_ENV, Some("0")),
                (VALIDATE_WORKFLOWS_ENV, Some("off")),
            ],
            || {
                let config = ServerConfig::from_env();
                assert_eq!(config.workflows_path, PathBuf::from("/srv/workflows"));
                assert_eq!(config.cache_ttl, Duration::ZERO);
                assert!(!config.validate_on_load);
            },
        );
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        temp_env::with_vars(
            [
                (WORKFLOWS_PATH_ENV, Some("   ")),
                (CACHE_TTL_ENV, Some("soon")),
                (VALIDATE_WORKFLOWS_ENV, Some("maybe")),
            ],
            || {
                let config = ServerConfig::from_env();
                assert_eq!(config, ServerConfig::default());
                assert!(config.workflows_path.ends_with("stepwise/workflows"));
            },
        );
    }
}
