use std::path::{Path, PathBuf};

use anyhow::bail;
use indexmap::IndexMap;
use serde_json::Value;

use super::{builtin_presets, Preset};

/// Preset catalog backed by a JSON file. Built-ins are always present;
/// only custom presets are persisted, appended after the built-ins in
/// creation order.
#[derive(Debug, Clone)]
pub struct PresetStore {
    path: PathBuf,
    presets: IndexMap<String, Preset>,
}

impl PresetStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut presets: IndexMap<String, Preset> = IndexMap::new();
        for preset in builtin_presets() {
            presets.insert(preset.id.clone(), preset);
        }
        for preset in read_custom_presets(&path) {
            presets.insert(preset.id.clone(), preset);
        }
        Self { path, presets }
    }

    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.get(id)
    }

    /// First preset in picker order; the shipped catalog guarantees at
    /// least one.
    pub fn default_preset(&self) -> &Preset {
        self.presets
            .values()
            .next()
            .expect("builtin preset catalog is never empty")
    }

    pub fn list(&self) -> Vec<&Preset> {
        self.presets.values().collect()
    }

    pub fn add(&mut self, preset: Preset) -> anyhow::Result<()> {
        if self.presets.contains_key(&preset.id) {
            bail!("preset id '{}' already exists", preset.id);
        }
        if !preset.is_custom {
            bail!("only custom presets can be added to the store");
        }
        self.presets.insert(preset.id.clone(), preset);
        self.save()
    }

    pub fn remove(&mut self, id: &str) -> anyhow::Result<()> {
        match self.presets.get(id) {
            None => bail!("unknown preset '{id}'"),
            Some(preset) if !preset.is_custom => {
                bail!("built-in preset '{id}' cannot be deleted")
            }
            Some(_) => {}
        }
        self.presets.shift_remove(id);
        self.save()
    }

    fn save(&self) -> anyhow::Result<()> {
        let customs: Vec<&Preset> = self
            .presets
            .values()
            .filter(|preset| preset.is_custom)
            .collect();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&customs)?)?;
        Ok(())
    }
}

fn read_custom_presets(path: &Path) -> Vec<Preset> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let Ok(parsed) = serde_json::from_str::<Value>(&raw) else {
        return Vec::new();
    };
    parsed
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| serde_json::from_value::<Preset>(row.clone()).ok())
                .filter(|preset| preset.is_custom)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{Preset, PresetStore};

    fn custom(id: &str) -> Preset {
        Preset {
            id: id.to_string(),
            name: "Watercolor".to_string(),
            description: "AI-generated custom style.".to_string(),
            icon: "sparkles".to_string(),
            prompt: "Role: Watercolor artist.".to_string(),
            is_custom: true,
        }
    }

    #[test]
    fn loads_builtins_when_file_missing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = PresetStore::load(temp.path().join("presets.json"));
        assert_eq!(store.list().len(), 6);
        assert_eq!(store.default_preset().id, "husky");
        Ok(())
    }

    #[test]
    fn custom_presets_survive_reload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("presets.json");

        let mut store = PresetStore::load(&path);
        store.add(custom("custom-1"))?;

        let reloaded = PresetStore::load(&path);
        assert_eq!(reloaded.list().len(), 7);
        let found = reloaded.get("custom-1").expect("custom preset persisted");
        assert!(found.is_custom);
        assert_eq!(found.name, "Watercolor");
        Ok(())
    }

    #[test]
    fn duplicate_ids_are_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = PresetStore::load(temp.path().join("presets.json"));
        store.add(custom("custom-1"))?;
        assert!(store.add(custom("custom-1")).is_err());
        Ok(())
    }

    #[test]
    fn builtins_cannot_be_deleted() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = PresetStore::load(temp.path().join("presets.json"));
        assert!(store.remove("husky").is_err());
        assert!(store.get("husky").is_some());
        Ok(())
    }

    #[test]
    fn removing_custom_preset_updates_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("presets.json");
        let mut store = PresetStore::load(&path);
        store.add(custom("custom-1"))?;
        store.remove("custom-1")?;

        let reloaded = PresetStore::load(&path);
        assert!(reloaded.get("custom-1").is_none());
        assert_eq!(reloaded.list().len(), 6);
        Ok(())
    }
}
