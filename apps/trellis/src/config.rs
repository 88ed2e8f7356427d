use std::env;
use std::time::Duration;

use crate::telemetry::env_truthy;

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MIN_PUSH_ROWS: usize = 40;

/// Session and protocol settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Reject client messages whose token does not match the session's.
    pub csrf_check: bool,
    /// Resend the full UI when the client acknowledges a stale sync id.
    pub sync_id_check: bool,
    /// Idle time after which a session is considered inactive.
    pub session_timeout: Duration,
    /// Rows pushed to a data-backed connector before the client asks.
    pub min_push_rows: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            csrf_check: env_truthy("TRELLIS_CSRF_CHECK").unwrap_or(defaults.csrf_check),
            sync_id_check: env_truthy("TRELLIS_SYNC_ID_CHECK").unwrap_or(defaults.sync_id_check),
            session_timeout: env::var("TRELLIS_SESSION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_timeout),
            min_push_rows: env::var("TRELLIS_MIN_PUSH_ROWS")
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(defaults.min_push_rows),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            csrf_check: true,
            sync_id_check: true,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            min_push_rows: DEFAULT_MIN_PUSH_ROWS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::LazyLock;

    // Environment variable tests must not run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: [&str; 4] = [
        "TRELLIS_CSRF_CHECK",
        "TRELLIS_SYNC_ID_CHECK",
        "TRELLIS_SESSION_TIMEOUT_SECS",
        "TRELLIS_MIN_PUSH_ROWS",
    ];

    fn clear() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test_timeout::timeout]
    fn from_env_defaults() {
        let _lock = ENV_MUTEX.lock();
        clear();
        assert_eq!(Config::from_env(), Config::default());
    }

    #[test_timeout::timeout]
    fn from_env_overrides() {
        let _lock = ENV_MUTEX.lock();
        clear();
        unsafe {
            env::set_var("TRELLIS_CSRF_CHECK", "0");
            env::set_var("TRELLIS_SESSION_TIMEOUT_SECS", "90");
            env::set_var("TRELLIS_MIN_PUSH_ROWS", "not-a-number");
        }
        let config = Config::from_env();
        assert!(!config.csrf_check);
        assert!(config.sync_id_check);
        assert_eq!(config.session_timeout, Duration::from_secs(90));
        assert_eq!(config.min_push_rows, DEFAULT_MIN_PUSH_ROWS);
        clear();
    }
}
