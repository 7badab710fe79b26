//! Chronicle persistence for save/load.
//!
//! A save holds the world tree as an `{id: {key, value, children}}` map and
//! the roster as a list of records, in human-readable JSON.

use crate::character::CharacterRoster;
use crate::world::{NodeSnapshot, WorldTree};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save file version.
const SAVE_VERSION: u32 = 1;

/// A saved world tree and roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedChronicle {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created.
    pub saved_at: String,

    pub world: BTreeMap<String, NodeSnapshot>,

    #[serde(default)]
    pub characters: CharacterRoster,
}

impl SavedChronicle {
    pub fn new(world: &WorldTree, characters: &CharacterRoster) -> Self {
        Self {
            version: SAVE_VERSION,
            saved_at: timestamp(),
            world: world.as_snapshot(),
            characters: characters.clone(),
        }
    }

    /// Rebuild the stores.
    pub fn restore(&self) -> (WorldTree, CharacterRoster) {
        (WorldTree::from_snapshot(&self.world), self.characters.clone())
    }

    /// Save to a JSON file, creating parent directories.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        Ok(saved)
    }
}

/// Create a save file name with timestamp.
pub fn timestamped_save_path(base_dir: impl AsRef<Path>, name: &str) -> PathBuf {
    let sanitized = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    base_dir.as_ref().join(format!("{sanitized}_{stamp}.json"))
}

/// Current local time as an ISO 8601 string, to the second.
fn timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::CharacterStore;
    use crate::testing::{sample_roster, sample_world};
    use crate::world::WorldStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saves").join("north.json");

        let saved = SavedChronicle::new(&sample_world(), &sample_roster());
        saved.save_json(&path).await.unwrap();

        let loaded = SavedChronicle::load_json(&path).await.unwrap();
        assert_eq!(loaded.version, SAVE_VERSION);
        assert_eq!(loaded.world, saved.world);

        let (world, roster) = loaded.restore();
        assert_eq!(world.get_node("micro.r1.p2").unwrap().key, "Ember League");
        assert_eq!(world.children("micro.r1.p2").len(), 7);
        assert_eq!(roster.get_record("c2").unwrap().polity_id.as_deref(), Some("micro.r1.p2"));
        assert_eq!(roster.len(), 3);
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.json");
        let mut saved = SavedChronicle::new(&sample_world(), &sample_roster());
        saved.version = 99;
        saved.save_json(&path).await.unwrap();

        let err = SavedChronicle::load_json(&path).await.unwrap_err();
        assert!(matches!(err, PersistError::VersionMismatch { expected: 1, found: 99 }));
    }

    #[test]
    fn test_timestamped_path() {
        let path = timestamped_save_path("/tmp/saves", "Frost & Fire");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("Frost___Fire_"));
        assert!(name.ends_with(".json"));
    }
}
