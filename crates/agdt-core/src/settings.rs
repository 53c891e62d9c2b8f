use crate::paths;
use crate::state::StateStore;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const STATE_DIR_ENV: &str = "AGDT_STATE_DIR";
pub const PROMPTS_DIR_ENV: &str = "AGDT_PROMPTS_DIR";

pub const WAIT_INTERVAL_KEY: &str = "background.wait_interval";
pub const TIMEOUT_KEY: &str = "background.timeout";
pub const LOG_LINES_KEY: &str = "background.log_lines";
pub const EXPIRY_HOURS_KEY: &str = "background.expiry_hours";

// ---------------------------------------------------------------------------
// BackgroundSettings
// ---------------------------------------------------------------------------

/// Knobs for waiting on and retaining background tasks. Each is read from
/// the state document and may be stored as a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackgroundSettings {
    /// Seconds slept between the two polls of one `task-wait`.
    pub wait_interval: f64,
    /// Seconds after `start_time` at which a running task is reported as timed out.
    pub timeout: f64,
    /// Log lines shown for a failed task; `0` shows the whole log.
    pub log_lines: usize,
    /// Hours a terminal task record is retained.
    pub expiry_hours: f64,
}

fn default_wait_interval() -> f64 {
    5.0
}

fn default_timeout() -> f64 {
    600.0
}

fn default_log_lines() -> usize {
    100
}

fn default_expiry_hours() -> f64 {
    24.0
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            wait_interval: default_wait_interval(),
            timeout: default_timeout(),
            log_lines: default_log_lines(),
            expiry_hours: default_expiry_hours(),
        }
    }
}

impl BackgroundSettings {
    pub fn from_store(store: &StateStore) -> Self {
        let doc = store.load();
        let get = |key: &str| crate::keypath::get(&doc, key).cloned();
        Self {
            wait_interval: number(WAIT_INTERVAL_KEY, get(WAIT_INTERVAL_KEY))
                .unwrap_or_else(default_wait_interval),
            timeout: number(TIMEOUT_KEY, get(TIMEOUT_KEY)).unwrap_or_else(default_timeout),
            log_lines: number(LOG_LINES_KEY, get(LOG_LINES_KEY))
                .map(|n| n as usize)
                .unwrap_or_else(default_log_lines),
            expiry_hours: number(EXPIRY_HOURS_KEY, get(EXPIRY_HOURS_KEY))
                .unwrap_or_else(default_expiry_hours),
        }
    }

    pub fn wait_interval_duration(&self) -> Duration {
        seconds(self.wait_interval, default_wait_interval())
    }

    pub fn timeout_duration(&self) -> Duration {
        seconds(self.timeout, default_timeout())
    }
}

/// `secs` as a `Duration`, or `fallback` when it is negative, NaN or too large.
fn seconds(secs: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_else(|_| {
        tracing::warn!(secs, fallback, "duration out of range; using default");
        Duration::from_secs_f64(fallback)
    })
}

/// Non-negative finite number from a JSON number or numeric string.
fn number(key: &str, value: Option<Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null => return None,
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() && n >= 0.0 => Some(n),
        _ => {
            tracing::warn!(key, "ignoring invalid numeric setting; using default");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Directory resolution
// ---------------------------------------------------------------------------

/// State directory: explicit value (flag / `AGDT_STATE_DIR`) or
/// `<repo_root>/scripts/temp`.
pub fn resolve_state_dir(explicit: Option<&Path>, repo_root: &Path) -> PathBuf {
    match explicit {
        Some(p) => p.to_path_buf(),
        None => repo_root.join(paths::DEFAULT_STATE_DIR),
    }
}

/// Prompt template directory: `AGDT_PROMPTS_DIR` or `<repo_root>/scripts/prompts`.
pub fn resolve_prompts_dir(explicit: Option<&Path>, repo_root: &Path) -> PathBuf {
    match explicit {
        Some(p) => p.to_path_buf(),
        None => repo_root.join(paths::DEFAULT_PROMPTS_DIR),
    }
}
