//! Environment and tracker configuration
//!
//! Environment variables are read from the first existing file among
//! `$OP_WORKFLOW_ENV_FILE`, `/etc/op-workflow/environment`,
//! `/etc/op-workflow.env` and `.env`. Variables that are already set in the
//! process environment are never overridden.
//!
//! ```rust,no_run
//! use op_workflow_core::config::{load_environment, TrackerConfig};
//!
//! load_environment();
//! let config = TrackerConfig::from_env();
//! assert!(config.validate().is_ok());
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Variable naming a custom environment file
pub const ENV_FILE_VAR: &str = "OP_WORKFLOW_ENV_FILE";

/// Files checked in order of priority
pub const ENV_FILE_PATHS: &[&str] = &[
    "/etc/op-workflow/environment",
    "/etc/op-workflow.env",
    ".env",
];

/// Eviction duration for unmatched trace events, in milliseconds
pub const EVICTION_MS_VAR: &str = "OP_WORKFLOW_EVICTION_MS";

/// Per-observer acknowledgement timeout, in milliseconds
pub const OBSERVER_TIMEOUT_MS_VAR: &str = "OP_WORKFLOW_OBSERVER_TIMEOUT_MS";

pub const DEFAULT_EVICTION_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_OBSERVER_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Load environment variables from the first environment file found.
///
/// Returns the path that was loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Some(custom_path) = get_config_opt(ENV_FILE_VAR) {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    let loaded = ENV_FILE_PATHS.iter().find_map(|path| try_load_env_file(path));
    if loaded.is_none() {
        debug!("No environment file found, using existing environment");
    }
    loaded
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);
    if !path_obj.exists() {
        return None;
    }

    let content = match fs::read_to_string(path_obj) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            return None;
        }
    };

    let (loaded, skipped) = apply_env_lines(&content);
    info!(
        "Loaded {} environment variables from {} ({} skipped - already set)",
        loaded, path, skipped
    );
    Some(path.to_string())
}

/// Set every `KEY=VALUE` line that is not already present in the environment.
fn apply_env_lines(content: &str) -> (usize, usize) {
    let mut loaded = 0;
    let mut skipped = 0;

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = parse_env_line(line) else {
            continue;
        };
        if std::env::var(&key).is_ok() {
            skipped += 1;
            debug!("Skipped (already set): {}", key);
        } else {
            std::env::set_var(&key, &value);
            loaded += 1;
            debug!("Loaded: {}", key);
        }
    }

    (loaded, skipped)
}

/// Parse `KEY=VALUE`, `KEY="VALUE"` or `KEY='VALUE'`.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Get a configuration value with a default.
pub fn get_config(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an optional, non-empty configuration value.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get a boolean configuration value.
pub fn get_config_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

/// Get an integer configuration value.
pub fn get_config_int(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Timing configuration shared by the correlator and the observer coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// How long an unmatched trace event may wait for its start signal, and
    /// the grace period before a stopped execution is forcibly forgotten
    pub eviction_duration: Duration,
    /// How long each observer may take to acknowledge a stop signal
    pub observer_ack_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            eviction_duration: DEFAULT_EVICTION_DURATION,
            observer_ack_timeout: DEFAULT_OBSERVER_ACK_TIMEOUT,
        }
    }
}

impl TrackerConfig {
    /// Read durations from the environment, falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            eviction_duration: duration_from_env(EVICTION_MS_VAR, defaults.eviction_duration),
            observer_ack_timeout: duration_from_env(
                OBSERVER_TIMEOUT_MS_VAR,
                defaults.observer_ack_timeout,
            ),
        }
    }

    pub fn with_eviction_duration(mut self, duration: Duration) -> Self {
        self.eviction_duration = duration;
        self
    }

    pub fn with_observer_ack_timeout(mut self, timeout: Duration) -> Self {
        self.observer_ack_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.eviction_duration.is_zero() {
            return Err(Error::invalid_argument("eviction duration must be positive"));
        }
        if self.observer_ack_timeout.is_zero() {
            return Err(Error::invalid_argument("observer ack timeout must be positive"));
        }
        Ok(())
    }
}

fn duration_from_env(key: &str, default: Duration) -> Duration {
    match get_config_int(key, -1) {
        millis if millis >= 0 => Duration::from_millis(millis as u64),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_line_simple() {
        let (k, v) = parse_env_line("FOO=bar").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar");
    }

    #[test]
    fn test_parse_env_line_quoted() {
        let (_, v) = parse_env_line("FOO=\"bar baz\"").unwrap();
        assert_eq!(v, "bar baz");
        let (_, v) = parse_env_line("FOO='bar'").unwrap();
        assert_eq!(v, "bar");
    }

    #[test]
    fn test_parse_env_line_keeps_later_equals() {
        let (k, v) = parse_env_line("OP_WORKFLOW_DATABASE_URL=sqlite://db?mode=rwc").unwrap();
        assert_eq!(k, "OP_WORKFLOW_DATABASE_URL");
        assert_eq!(v, "sqlite://db?mode=rwc");
    }

    #[test]
    fn test_parse_env_line_empty() {
        assert!(parse_env_line("").is_none());
        assert!(parse_env_line("=value").is_none());
    }

    #[test]
    fn test_apply_env_lines_does_not_override() {
        std::env::set_var("OP_WORKFLOW_TEST_PRESET", "kept");
        let (loaded, skipped) = apply_env_lines(
            "# comment\nOP_WORKFLOW_TEST_PRESET=replaced\nOP_WORKFLOW_TEST_FRESH=1\n",
        );
        assert_eq!((loaded, skipped), (1, 1));
        assert_eq!(std::env::var("OP_WORKFLOW_TEST_PRESET").unwrap(), "kept");
        assert_eq!(std::env::var("OP_WORKFLOW_TEST_FRESH").unwrap(), "1");
    }

    #[test]
    fn test_tracker_config_defaults_and_validation() {
        let config = TrackerConfig::default();
        assert_eq!(config.eviction_duration, Duration::from_secs(30));
        assert_eq!(config.observer_ack_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());

        let zero = config.with_eviction_duration(Duration::ZERO);
        assert!(matches!(zero.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_duration_from_env() {
        std::env::set_var("OP_WORKFLOW_TEST_DURATION_MS", "250");
        assert_eq!(
            duration_from_env("OP_WORKFLOW_TEST_DURATION_MS", Duration::from_secs(1)),
            Duration::from_millis(250)
        );
        assert_eq!(
            duration_from_env("OP_WORKFLOW_TEST_DURATION_UNSET", Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }
}
