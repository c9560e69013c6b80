use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// Settings key holding the OpenRouter credential.
pub const OPENROUTER_KEY: &str = "openrouter_key";

/// Opaque key-value settings persisted as a JSON object. Loaded once at
/// startup and rewritten on every change; the contents are never
/// interpreted here.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl SettingsStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = read_json_object(&path).unwrap_or_default();
        Self { path, values }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> anyhow::Result<()> {
        self.values
            .insert(key.to_string(), Value::String(value.into()));
        self.flush()
    }

    pub fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(
            &self.path,
            serde_json::to_string_pretty(&Value::Object(self.values.clone()))?,
        )?;
        Ok(())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}
