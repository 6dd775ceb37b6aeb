use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::ConfigError;

/// Key/value persistence owned by the host application.
pub trait PreferenceStore {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError>;
}

/// Volatile store; used by headless hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by a single pretty-printed JSON object on disk.
///
/// Every `set` rewrites the whole file. A missing file starts empty; an
/// unreadable one is logged and treated as empty so preferences degrade to
/// defaults instead of failing start-up.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let values = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|error| ConfigError::Io {
                path: path.display().to_string(),
                error,
            })?;
            match serde_json::from_str::<Value>(&contents) {
                Ok(Value::Object(values)) => values,
                Ok(other) => {
                    tracing::warn!(
                        path = %path.display(),
                        kind = json_kind(&other),
                        "preference file is not a JSON object; starting empty"
                    );
                    Map::new()
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse preference file; starting empty"
                    );
                    Map::new()
                }
            }
        } else {
            Map::new()
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|error| ConfigError::Io {
                path: dir.display().to_string(),
                error,
            })?;
        }
        let serialized = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, serialized).map_err(|error| ConfigError::Io {
            path: self.path.display().to_string(),
            error,
        })
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        self.values.insert(key.to_string(), value);
        self.persist()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/prefs.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        assert!(store.get(crate::ENABLED_KEY).is_none());
        store.set(crate::ENABLED_KEY, json!(false)).unwrap();
        store
            .set(crate::CONFIG_KEY, json!({ "targetFps": 30 }))
            .unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get(crate::ENABLED_KEY), Some(json!(false)));
        assert_eq!(crate::load_config(&reopened).target_fps, 30);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.get(crate::CONFIG_KEY).is_none());
        assert!(crate::load_enabled(&store));
    }
}
