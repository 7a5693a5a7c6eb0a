//! Persisted SDK preferences.
//!
//! A small JSON-file key/value store for the handful of flags that must
//! survive process restarts: the channel enabled flag and the install id.
//! Writes go to disk immediately; read misses fall back to defaults.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use uuid::Uuid;

/// Preference key for the channel enabled flag.
pub const KEY_ENABLED: &str = "allowedNetworkRequests";

/// Preference key for the persisted install id.
pub const KEY_INSTALL_ID: &str = "installId";

/// File-backed preference store.
///
/// All accessors take `&self`; the value map is guarded internally so the
/// store can be shared across the channel and its callbacks.
pub struct Preferences {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preferences")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Preferences {
    /// Open the store at `path`, loading existing values.
    ///
    /// A missing file yields an empty store; an unreadable or corrupt file
    /// is logged and treated as empty rather than failing SDK startup.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Corrupt preference file, starting empty");
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read preferences, starting empty");
                Map::new()
            }
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    /// Read a boolean, falling back to `default` when absent or mistyped.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.lock_values()
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// Write a boolean and persist.
    pub fn put_bool(&self, key: &str, value: bool) {
        let mut values = self.lock_values();
        values.insert(key.to_string(), Value::Bool(value));
        self.persist(&values);
    }

    /// Read the install id, generating and persisting a fresh one on first use.
    pub fn install_id(&self) -> Uuid {
        let mut values = self.lock_values();
        if let Some(id) = values
            .get(KEY_INSTALL_ID)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            return id;
        }
        let id = Uuid::new_v4();
        values.insert(KEY_INSTALL_ID.to_string(), Value::String(id.to_string()));
        self.persist(&values);
        tracing::debug!(install_id = %id, "Generated new install id");
        id
    }

    fn lock_values(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        // Poisoning only happens if a writer panicked; the map is still usable.
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, values: &Map<String, Value>) {
        let content = match serde_json::to_string_pretty(values) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode preferences");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, content) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to persist preferences");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let prefs = Preferences::open(dir.path().join("prefs.json"));
        assert!(prefs.get_bool(KEY_ENABLED, true));
        assert!(!prefs.get_bool(KEY_ENABLED, false));
    }

    #[test]
    fn test_write_through_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let prefs = Preferences::open(&path);
        prefs.put_bool(KEY_ENABLED, false);

        let reloaded = Preferences::open(&path);
        assert!(!reloaded.get_bool(KEY_ENABLED, true));
    }

    #[test]
    fn test_install_id_stable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let prefs = Preferences::open(&path);
        let first = prefs.install_id();
        assert_eq!(prefs.install_id(), first);

        let reloaded = Preferences::open(&path);
        assert_eq!(reloaded.install_id(), first);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{ not json").unwrap();

        let prefs = Preferences::open(&path);
        assert!(prefs.get_bool(KEY_ENABLED, true));
    }
}
