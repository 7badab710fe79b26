//! The character store contract and the in-memory roster.

use super::record::{CharacterRecord, CharacterSnapshot, MountPoint, Profile};
use crate::oracle::OracleError;
use crate::world::{WorldStore, MICRO_ROOT};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

lazy_static! {
    static ref GENERATED_ID: Regex = Regex::new(r"^c(\d+)$").expect("character id regex");
}

/// Errors from character store operations and the character agent.
#[derive(Debug, Error)]
pub enum CharacterError {
    #[error("character {0} not found")]
    NotFound(String),

    #[error("character {0} already exists")]
    Duplicate(String),

    #[error("could not parse character decision: {0}")]
    Parse(String),

    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),
}

/// A mutable set of character records keyed by id.
pub trait CharacterStore: Send + Sync {
    /// Every record, sorted by id.
    fn list_records(&self) -> Vec<&CharacterRecord>;

    fn get_record(&self, id: &str) -> Option<&CharacterRecord>;

    /// Insert a new record. Fails if the id is taken.
    fn add_record(
        &mut self,
        id: &str,
        region_id: Option<String>,
        polity_id: Option<String>,
        profile: Profile,
    ) -> Result<CharacterRecord, CharacterError>;

    /// Replace a record's profile.
    fn update_profile(&mut self, id: &str, profile: Profile)
        -> Result<CharacterRecord, CharacterError>;

    /// Re-anchor a record to a region and polity.
    fn set_affiliation(
        &mut self,
        id: &str,
        region_id: Option<String>,
        polity_id: Option<String>,
    ) -> Result<CharacterRecord, CharacterError>;

    fn require_record(&self, id: &str) -> Result<&CharacterRecord, CharacterError> {
        self.get_record(id)
            .ok_or_else(|| CharacterError::NotFound(id.to_string()))
    }

    fn is_empty(&self) -> bool {
        self.list_records().is_empty()
    }

    /// Records whose polity pointer is one of `polity_ids`.
    fn affiliated_with(&self, polity_ids: &[String]) -> Vec<&CharacterRecord> {
        self.list_records()
            .into_iter()
            .filter(|r| {
                r.polity_id
                    .as_ref()
                    .is_some_and(|p| polity_ids.iter().any(|id| id == p))
            })
            .collect()
    }

    /// Next free `cN` id, skipping ids already reserved in this batch.
    fn next_identifier(&self, reserved: &HashSet<String>) -> String {
        let taken: HashSet<String> = self
            .list_records()
            .iter()
            .map(|r| r.id.clone())
            .chain(reserved.iter().cloned())
            .collect();

        let max = taken
            .iter()
            .filter_map(|id| GENERATED_ID.captures(id))
            .filter_map(|caps| caps[1].parse::<u64>().ok())
            .max();

        // An oracle-chosen id can sit at u64::MAX; fall back to the lowest gap.
        let start = max.map_or(Some(1), |m| m.checked_add(1));
        if let Some(counter) = start.filter(|c| !taken.contains(&format!("c{c}"))) {
            return format!("c{counter}");
        }
        (1..=u64::MAX)
            .map(|c| format!("c{c}"))
            .find(|id| !taken.contains(id))
            .unwrap_or_else(|| format!("c{}", taken.len()))
    }

    fn snapshot_record(&self, id: &str) -> Option<CharacterSnapshot> {
        self.get_record(id).map(CharacterRecord::snapshot)
    }
}

/// Every place a character can be anchored: each polity, or the bare region
/// when it has none.
pub fn mount_points(world: &dyn WorldStore) -> Vec<MountPoint> {
    let mut points = Vec::new();
    for region in world.children(MICRO_ROOT) {
        let polities = world.children(&region.id);
        if polities.is_empty() {
            points.push(MountPoint {
                region_id: region.id.clone(),
                region_key: region.key.clone(),
                region_value: region.value.clone(),
                polity_id: None,
                polity_key: String::new(),
                polity_value: String::new(),
            });
            continue;
        }
        for polity in polities {
            points.push(MountPoint {
                region_id: region.id.clone(),
                region_key: region.key.clone(),
                region_value: region.value.clone(),
                polity_id: Some(polity.id.clone()),
                polity_key: polity.key.clone(),
                polity_value: polity.value.clone(),
            });
        }
    }
    points
}

/// In-memory roster ordered by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<CharacterRecord>", into = "Vec<CharacterRecord>")]
pub struct CharacterRoster {
    records: BTreeMap<String, CharacterRecord>,
}

impl CharacterRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Insert or replace a record directly (fixtures, snapshot loading).
    pub fn insert(&mut self, record: CharacterRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn records(&self) -> impl Iterator<Item = &CharacterRecord> {
        self.records.values()
    }
}

impl From<Vec<CharacterRecord>> for CharacterRoster {
    fn from(records: Vec<CharacterRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }
}

impl From<CharacterRoster> for Vec<CharacterRecord> {
    fn from(roster: CharacterRoster) -> Self {
        roster.records.into_values().collect()
    }
}

impl CharacterStore for CharacterRoster {
    fn list_records(&self) -> Vec<&CharacterRecord> {
        self.records.values().collect()
    }

    fn get_record(&self, id: &str) -> Option<&CharacterRecord> {
        self.records.get(id)
    }

    fn add_record(
        &mut self,
        id: &str,
        region_id: Option<String>,
        polity_id: Option<String>,
        profile: Profile,
    ) -> Result<CharacterRecord, CharacterError> {
        if self.records.contains_key(id) {
            return Err(CharacterError::Duplicate(id.to_string()));
        }
        let record = CharacterRecord {
            id: id.to_string(),
            region_id,
            polity_id,
            profile,
        };
        self.records.insert(id.to_string(), record.clone());
        Ok(record)
    }

    fn update_profile(
        &mut self,
        id: &str,
        profile: Profile,
    ) -> Result<CharacterRecord, CharacterError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| CharacterError::NotFound(id.to_string()))?;
        record.profile = profile;
        Ok(record.clone())
    }

    fn set_affiliation(
        &mut self,
        id: &str,
        region_id: Option<String>,
        polity_id: Option<String>,
    ) -> Result<CharacterRecord, CharacterError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| CharacterError::NotFound(id.to_string()))?;
        record.region_id = region_id;
        record.polity_id = polity_id;
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldTree;

    fn roster() -> CharacterRoster {
        CharacterRoster::from(vec![
            CharacterRecord::new("c1", Profile::from_fields([("name", "Ilsa")]))
                .with_affiliation(Some("micro.r1"), Some("micro.r1.p1")),
            CharacterRecord::new("c7", Profile::from_fields([("name", "Bram")]))
                .with_affiliation(Some("micro.r1"), Some("micro.r1.p2")),
            CharacterRecord::new("hero", Profile::Text("nameless".into())),
        ])
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let mut roster = roster();
        assert!(matches!(
            roster.add_record("c1", None, None, Profile::default()),
            Err(CharacterError::Duplicate(_))
        ));
        let added = roster.add_record("c8", None, None, Profile::default()).unwrap();
        assert_eq!(added.id, "c8");
        assert_eq!(roster.len(), 4);
    }

    #[test]
    fn test_update_unknown_fails() {
        let mut roster = roster();
        assert!(matches!(
            roster.update_profile("c99", Profile::default()),
            Err(CharacterError::NotFound(_))
        ));
    }

    #[test]
    fn test_next_identifier_skips_reserved() {
        let roster = roster();
        let mut reserved = HashSet::new();
        let first = roster.next_identifier(&reserved);
        assert_eq!(first, "c8");
        reserved.insert(first);
        assert_eq!(roster.next_identifier(&reserved), "c9");
        assert_eq!(CharacterRoster::new().next_identifier(&HashSet::new()), "c1");
    }

    #[test]
    fn test_next_identifier_after_max_id() {
        let mut roster = roster();
        roster.add_record(&format!("c{}", u64::MAX), None, None, Profile::default()).unwrap();
        assert_eq!(roster.next_identifier(&HashSet::new()), "c2");

        let reserved: HashSet<String> = ["c2".to_string(), "c3".to_string()].into();
        assert_eq!(roster.next_identifier(&reserved), "c4");
    }

    #[test]
    fn test_affiliated_with() {
        let roster = roster();
        let found = roster.affiliated_with(&["micro.r1.p2".to_string()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "c7");
    }

    #[test]
    fn test_roster_serde_as_list() {
        let json = serde_json::to_string(&roster()).unwrap();
        assert!(json.starts_with('['));
        let back: CharacterRoster = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.get_record("c7").unwrap().name().as_deref(), Some("Bram"));
    }

    #[test]
    fn test_mount_points() {
        let mut world = WorldTree::new();
        world.add_child("micro", "r1", "North").unwrap();
        world.add_child("micro.r1", "p1", "Frost Crown").unwrap();
        world.add_child("micro", "r2", "Dunes").unwrap();
        let points = mount_points(&world);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].polity_id.as_deref(), Some("micro.r1.p1"));
        assert_eq!(points[1].region_key, "Dunes");
        assert!(points[1].polity_id.is_none());
    }
}
