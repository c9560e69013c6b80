use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::TextDiff;
use uuid::Uuid;

/// One generated animation version within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version_id: String,
    pub parent_version_id: Option<String>,
    pub mode: String,
    pub prompt: String,
    pub prompt_diff: Option<Vec<String>>,
    pub artifact_path: Option<String>,
    pub created_at: String,
}

/// Session history: every generation (manual or loop-driven) appends a
/// version entry, giving the run directory an inspectable lineage.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionManifest {
    pub path: PathBuf,
    pub schema_version: u64,
    pub session_id: String,
    pub created_at: String,
    pub versions: Vec<VersionEntry>,
}

impl SessionManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema_version: 1,
            session_id: Uuid::new_v4().to_string(),
            created_at: now_utc_iso(),
            versions: Vec::new(),
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut manifest = Self::new(path.clone());
        let payload = read_json(&path).unwrap_or(Value::Object(Map::new()));
        let Some(obj) = payload.as_object() else {
            return manifest;
        };

        manifest.schema_version = obj
            .get("schema_version")
            .and_then(Value::as_u64)
            .unwrap_or(manifest.schema_version);
        if let Some(session_id) = obj.get("session_id").and_then(Value::as_str) {
            manifest.session_id = session_id.to_string();
        }
        if let Some(created_at) = obj.get("created_at").and_then(Value::as_str) {
            manifest.created_at = created_at.to_string();
        }
        if let Some(versions) = obj.get("versions").and_then(Value::as_array) {
            for item in versions {
                if let Ok(parsed) = serde_json::from_value::<VersionEntry>(item.clone()) {
                    manifest.versions.push(parsed);
                }
            }
        }
        manifest
    }

    pub fn add_version(
        &mut self,
        mode: &str,
        prompt: impl Into<String>,
        parent_version_id: Option<String>,
    ) -> VersionEntry {
        let prompt = prompt.into();
        let prev = self.get_version(parent_version_id.as_deref());
        let prompt_diff = prompt_diff(prev.map(|entry| entry.prompt.as_str()), &prompt);
        let version = VersionEntry {
            version_id: self.next_version_id(),
            parent_version_id,
            mode: mode.to_string(),
            prompt,
            prompt_diff,
            artifact_path: None,
            created_at: now_utc_iso(),
        };
        self.versions.push(version.clone());
        version
    }

    pub fn set_artifact(&mut self, version_id: &str, artifact_path: &Path) {
        if let Some(version) = self.get_version_mut(version_id) {
            version.artifact_path = Some(artifact_path.to_string_lossy().to_string());
        }
    }

    pub fn latest(&self) -> Option<&VersionEntry> {
        self.versions.last()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let mut payload = Map::new();
        payload.insert(
            "schema_version".to_string(),
            Value::Number(self.schema_version.into()),
        );
        payload.insert(
            "session_id".to_string(),
            Value::String(self.session_id.clone()),
        );
        payload.insert(
            "created_at".to_string(),
            Value::String(self.created_at.clone()),
        );
        payload.insert(
            "versions".to_string(),
            Value::Array(
                self.versions
                    .iter()
                    .map(|entry| serde_json::to_value(entry).unwrap_or(Value::Null))
                    .collect(),
            ),
        );
        write_json(&self.path, Value::Object(payload))
    }

    fn next_version_id(&self) -> String {
        format!("v{}", self.versions.len() + 1)
    }

    fn get_version(&self, version_id: Option<&str>) -> Option<&VersionEntry> {
        let id = version_id?;
        self.versions.iter().find(|entry| entry.version_id == id)
    }

    fn get_version_mut(&mut self, version_id: &str) -> Option<&mut VersionEntry> {
        self.versions
            .iter_mut()
            .find(|entry| entry.version_id == version_id)
    }
}

fn prompt_diff(prev: Option<&str>, curr: &str) -> Option<Vec<String>> {
    let prev = prev?;
    let diff = TextDiff::from_lines(prev, curr);
    let rendered = diff.unified_diff().header("prev", "curr").to_string();
    Some(rendered.lines().map(str::to_string).collect())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json(path: &Path, payload: Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}
