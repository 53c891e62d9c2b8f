use crate::error::{AgdtError, Result};
use crate::keypath;
use crate::lock::{self, DEFAULT_LOCK_TIMEOUT};
use crate::paths;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Primary context keys
// ---------------------------------------------------------------------------

pub const PULL_REQUEST_ID: &str = "pull_request_id";
pub const JIRA_ISSUE_KEY: &str = "jira.issue_key";
pub const DRY_RUN: &str = "dry_run";

/// Keys whose change means "a different piece of work": the state area is
/// wiped and only the new key (plus [`PRESERVED_ON_SWITCH`]) survives.
pub const PRIMARY_KEYS: &[&str] = &[PULL_REQUEST_ID, JIRA_ISSUE_KEY];

/// Keys carried across a context switch.
pub const PRESERVED_ON_SWITCH: &[&str] = &[DRY_RUN];

/// Result of [`StateStore::set_context_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextChange {
    /// The stored value already matched; nothing was written.
    Unchanged,
    /// The value was written.
    Updated,
    /// A primary key changed: the state area was wiped before writing.
    Switched,
}

impl ContextChange {
    pub fn written(self) -> bool {
        !matches!(self, ContextChange::Unchanged)
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// The JSON state document shared by the CLI and its background children.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        paths::state_path(&self.dir)
    }

    fn lock_path(&self) -> PathBuf {
        paths::lock_path_for(&self.path())
    }

    // -----------------------------------------------------------------------
    // Whole-document I/O
    // -----------------------------------------------------------------------

    /// Read the document. Missing, empty or corrupt files read as `{}`.
    pub fn load(&self) -> Value {
        let path = self.path();
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "state file unreadable; treating as empty");
                }
                return empty_doc();
            }
        };
        if data.trim().is_empty() {
            return empty_doc();
        }
        match serde_json::from_str::<Value>(&data) {
            Ok(v) if v.is_object() => v,
            Ok(_) => {
                tracing::warn!(path = %path.display(), "state file is not a JSON object; treating as empty");
                empty_doc()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "state file is corrupt; treating as empty");
                empty_doc()
            }
        }
    }

    /// Overwrite the whole document.
    pub fn save(&self, doc: &Value) -> Result<()> {
        let data = serde_json::to_string_pretty(doc)?;
        crate::io::atomic_write(&self.path(), data.as_bytes())
    }

    pub fn load_locked(&self) -> Result<Value> {
        lock::with_lock(&self.lock_path(), self.lock_timeout, || Ok(self.load()))
    }

    pub fn save_locked(&self, doc: &Value) -> Result<()> {
        lock::with_lock(&self.lock_path(), self.lock_timeout, || self.save(doc))
    }

    /// Locked read-modify-write. The document is saved after `f` returns `Ok`.
    pub fn update<T>(&self, f: impl FnOnce(&mut Value) -> Result<T>) -> Result<T> {
        lock::with_lock(&self.lock_path(), self.lock_timeout, || {
            let mut doc = self.load();
            let out = f(&mut doc)?;
            self.save(&doc)?;
            Ok(out)
        })
    }

    // -----------------------------------------------------------------------
    // Dotted-key accessors
    // -----------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<Value> {
        keypath::get(&self.load(), key).cloned()
    }

    /// Like [`get`](Self::get) but a missing key is an error.
    pub fn get_required(&self, key: &str) -> Result<Value> {
        self.get(key)
            .ok_or_else(|| AgdtError::KeyNotFound(key.to_string()))
    }

    /// String view of a key: strings as-is, numbers/bools rendered, null/absent as `None`.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::Null => None,
            v => Some(keypath::display_value(&v)),
        }
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        self.update(|doc| {
            keypath::set(doc, key, value);
            Ok(())
        })
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        self.update(|doc| Ok(keypath::remove(doc, key)))
    }

    /// Truthy `dry_run`: JSON `true`, or a string `true`/`1`/`yes` in any case.
    pub fn is_dry_run(&self) -> bool {
        self.get(DRY_RUN).map(|v| is_truthy(&v)).unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Context switching
    // -----------------------------------------------------------------------

    /// Set `key` unless it already holds `value`.
    ///
    /// Changing a primary key wipes the state directory first, keeping only
    /// the new key and [`PRESERVED_ON_SWITCH`].
    pub fn set_context_value(&self, key: &str, value: Value) -> Result<ContextChange> {
        let current = self.get(key);
        if current.as_ref() == Some(&value) {
            return Ok(ContextChange::Unchanged);
        }

        if !PRIMARY_KEYS.contains(&key) {
            self.set(key, value)?;
            return Ok(ContextChange::Updated);
        }

        let doc = self.load();
        let mut preserved = empty_doc();
        for keep in PRESERVED_ON_SWITCH {
            if let Some(v) = keypath::get(&doc, keep) {
                keypath::set(&mut preserved, keep, v.clone());
            }
        }
        keypath::set(&mut preserved, key, value);

        tracing::info!(key, previous = ?current, "context switch: clearing state directory");
        self.clear_temp_folder(Some(&preserved))?;
        Ok(ContextChange::Switched)
    }

    /// Remove everything in the state directory, then optionally write a
    /// fresh document containing `preserve`. Entries that cannot be removed
    /// are logged and skipped.
    pub fn clear_temp_folder(&self, preserve: Option<&Value>) -> Result<()> {
        match std::fs::read_dir(&self.dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let result = if path.is_dir() {
                        std::fs::remove_dir_all(&path)
                    } else {
                        std::fs::remove_file(&path)
                    };
                    if let Err(e) = result {
                        tracing::warn!(path = %path.display(), error = %e, "could not remove state entry; skipping");
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(doc) = preserve {
            self.save(doc)?;
        }
        Ok(())
    }
}

fn empty_doc() -> Value {
    Value::Object(Map::new())
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
