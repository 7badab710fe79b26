//! Audit trail of update cycles.
//!
//! Every cycle that reaches the recording step yields one [`HistoryEntry`]
//! with a before/after pair per applied action. Entries are appended to a
//! JSON Lines log and optionally written as standalone snapshot files.

use crate::character::{CharacterAction, CharacterSnapshot, CharacterStore};
use crate::game::UpdateResult;
use crate::oracle::Oracle;
use crate::world::{NodeSnapshot, WorldAction, WorldStore};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize change logs.";

/// Errors from reading the history log.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which store a change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    World,
    Character,
}

/// One applied action, with the entity as it was and as it is.
///
/// `before` is absent only for additions, `after` only for removals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryChange {
    pub kind: ChangeKind,
    pub action: String,
    pub identifier: String,
    #[serde(default)]
    pub before: Option<Value>,
    #[serde(default)]
    pub after: Option<Value>,
    #[serde(default)]
    pub note: String,
}

impl HistoryChange {
    /// Display name from the snapshot: node key or character name.
    fn name(snapshot: Option<&Value>) -> String {
        let Some(snapshot) = snapshot else {
            return String::new();
        };
        snapshot
            .get("key")
            .or_else(|| snapshot.get("profile").and_then(|p| p.get("name")))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    /// `ACTION id(name)`, with ` old->new` when the name changed.
    pub fn describe(&self) -> String {
        let old = Self::name(self.before.as_ref());
        let new = Self::name(self.after.as_ref());
        let name = if new.is_empty() { &old } else { &new };
        let label = if name.is_empty() {
            self.identifier.clone()
        } else {
            format!("{}({})", self.identifier, name)
        };
        if !old.is_empty() && !new.is_empty() && old != new {
            format!("{} {} {}->{}", self.action, label, old, new)
        } else {
            format!("{} {}", self.action, label)
        }
    }
}

/// The record of one update cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub created_at: String,
    pub update_text: String,
    pub decision: Value,
    #[serde(default)]
    pub world_changes: Vec<HistoryChange>,
    #[serde(default)]
    pub character_changes: Vec<HistoryChange>,
    #[serde(default)]
    pub summary: String,
}

impl HistoryEntry {
    /// `world: ..; characters: ..`, or `no changes`.
    pub fn deterministic_summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.world_changes.is_empty() {
            let changes: Vec<String> = self.world_changes.iter().map(HistoryChange::describe).collect();
            parts.push(format!("world: {}", changes.join(", ")));
        }
        if !self.character_changes.is_empty() {
            let changes: Vec<String> = self.character_changes.iter().map(HistoryChange::describe).collect();
            parts.push(format!("characters: {}", changes.join(", ")));
        }
        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join("; ")
        }
    }

    fn line(&self) -> String {
        let summary = if self.summary.is_empty() {
            self.deterministic_summary()
        } else {
            self.summary.clone()
        };
        format!("{} {}: {}", self.created_at, self.id, summary)
    }
}

/// Both stores as they were before a cycle mutated anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSnapshot {
    pub world: BTreeMap<String, NodeSnapshot>,
    pub characters: BTreeMap<String, CharacterSnapshot>,
}

impl CycleSnapshot {
    pub fn capture(world: &dyn WorldStore, characters: &dyn CharacterStore) -> Self {
        Self {
            world: world
                .list_nodes()
                .into_iter()
                .map(|n| (n.id.clone(), n.snapshot()))
                .collect(),
            characters: characters
                .list_records()
                .into_iter()
                .map(|r| (r.id.clone(), r.snapshot()))
                .collect(),
        }
    }
}

fn to_value<T: Serialize>(snapshot: &T) -> Option<Value> {
    serde_json::to_value(snapshot).ok()
}

/// Short raw tags (`heuristic`, `polity_merge`, ...) are kept as notes; full
/// oracle replies are not.
fn note_from_raw(raw: &str) -> String {
    let raw = raw.trim();
    if !raw.is_empty() && raw.len() <= 32 && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        raw.to_string()
    } else {
        String::new()
    }
}

/// World changes of a result, diffed against `before`.
pub fn world_changes(result: &UpdateResult, before: &CycleSnapshot, world: &dyn WorldStore) -> Vec<HistoryChange> {
    result
        .world_actions
        .iter()
        .zip(&result.world_nodes)
        .map(|(action, node)| {
            let current = || world.snapshot_node(&node.id).unwrap_or_else(|| node.snapshot());
            let (identifier, before_state, after_state, note) = match action.flag {
                WorldAction::AddNode => (
                    node.id.clone(),
                    None,
                    to_value(&current()),
                    format!("parent {}", action.target_id),
                ),
                WorldAction::UpdateNode => (
                    action.target_id.clone(),
                    before
                        .world
                        .get(&action.target_id)
                        .and_then(to_value)
                        .or_else(|| to_value(&node.snapshot())),
                    to_value(&current()),
                    note_from_raw(&action.raw),
                ),
                WorldAction::RemoveNode => (
                    action.target_id.clone(),
                    before
                        .world
                        .get(&action.target_id)
                        .and_then(to_value)
                        .or_else(|| to_value(&node.snapshot())),
                    None,
                    note_from_raw(&action.raw),
                ),
            };
            HistoryChange {
                kind: ChangeKind::World,
                action: action.flag.to_string(),
                identifier,
                before: before_state,
                after: after_state,
                note,
            }
        })
        .collect()
}

/// Character changes of a result, diffed against `before`.
pub fn character_changes(
    result: &UpdateResult,
    before: &CycleSnapshot,
    characters: &dyn CharacterStore,
) -> Vec<HistoryChange> {
    result
        .character_actions
        .iter()
        .zip(&result.character_records)
        .map(|(action, record)| {
            let after = characters
                .snapshot_record(&record.id)
                .unwrap_or_else(|| record.snapshot());
            let before_state = match action.flag {
                CharacterAction::AddCharacter => None,
                CharacterAction::UpdateCharacter => before
                    .characters
                    .get(&record.id)
                    .and_then(to_value)
                    .or_else(|| to_value(&record.snapshot())),
            };
            HistoryChange {
                kind: ChangeKind::Character,
                action: action.flag.to_string(),
                identifier: record.id.clone(),
                before: before_state,
                after: to_value(&after),
                note: note_from_raw(&action.raw),
            }
        })
        .collect()
}

/// Builds, keeps and persists history entries.
#[derive(Debug, Default)]
pub struct HistoryRecorder {
    log_path: Option<PathBuf>,
    snapshot_dir: Option<PathBuf>,
    entries: Vec<HistoryEntry>,
    last_snapshot: Option<PathBuf>,
}

impl HistoryRecorder {
    /// A recorder that only keeps entries in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every entry to a JSON Lines log.
    pub fn with_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Also write each entry to `history_{timestamp}_{id}.json` in `dir`.
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    /// Entries recorded by this recorder, oldest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Path of the most recent snapshot file written.
    pub fn last_snapshot(&self) -> Option<&Path> {
        self.last_snapshot.as_deref()
    }

    /// Record one cycle. Write failures are logged and never fail the call.
    ///
    /// With `summarizer` the summary is oracle prose, falling back to the
    /// deterministic form when the call fails or returns nothing.
    pub async fn record(
        &mut self,
        text: &str,
        result: &UpdateResult,
        before: &CycleSnapshot,
        world: &dyn WorldStore,
        characters: &dyn CharacterStore,
        summarizer: Option<&Oracle>,
    ) -> HistoryEntry {
        let mut entry = HistoryEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            created_at: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            update_text: text.to_string(),
            decision: serde_json::to_value(&result.decision).unwrap_or(Value::Null),
            world_changes: world_changes(result, before, world),
            character_changes: character_changes(result, before, characters),
            summary: String::new(),
        };
        entry.summary = match summarizer {
            Some(oracle) => oracle_summary(oracle, std::slice::from_ref(&entry))
                .await
                .unwrap_or_else(|| entry.deterministic_summary()),
            None => entry.deterministic_summary(),
        };

        self.write_entry(&entry).await;
        self.write_snapshot(&entry).await;
        info!(
            id = %entry.id,
            world = entry.world_changes.len(),
            characters = entry.character_changes.len(),
            summary_len = entry.summary.len(),
            "history record"
        );
        self.entries.push(entry.clone());
        entry
    }

    async fn write_entry(&self, entry: &HistoryEntry) {
        let Some(path) = &self.log_path else {
            return;
        };
        if let Err(err) = append_line(path, entry).await {
            warn!(id = %entry.id, path = %path.display(), error = %err, "history write failed");
        }
    }

    async fn write_snapshot(&mut self, entry: &HistoryEntry) {
        let Some(dir) = &self.snapshot_dir else {
            return;
        };
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("history_{stamp}_{}.json", entry.id));
        let written = async {
            fs::create_dir_all(dir).await?;
            fs::write(&path, serde_json::to_string(entry)?).await?;
            Ok::<_, HistoryError>(())
        }
        .await;
        match written {
            Ok(()) => self.last_snapshot = Some(path),
            Err(err) => warn!(id = %entry.id, path = %path.display(), error = %err, "history snapshot write failed"),
        }
    }

    /// The last `limit` entries of the log (all when `limit` is 0), oldest first.
    /// Blank and malformed lines are skipped; a missing log is empty.
    pub async fn load_entries(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        let Some(path) = &self.log_path else {
            return Ok(Vec::new());
        };
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut entries: Vec<HistoryEntry> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        if limit > 0 && entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        Ok(entries)
    }

    /// One line per recent entry, or oracle prose when `summarizer` is given.
    ///
    /// Uses the in-memory entries, or the log when none were recorded here.
    pub async fn summarize_recent(&self, limit: usize, summarizer: Option<&Oracle>) -> Result<String, HistoryError> {
        let mut entries = if self.entries.is_empty() {
            self.load_entries(0).await?
        } else {
            self.entries.clone()
        };
        if limit > 0 && entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        if entries.is_empty() {
            return Ok("No history recorded.".to_string());
        }
        if let Some(oracle) = summarizer {
            if let Some(summary) = oracle_summary(oracle, &entries).await {
                return Ok(summary);
            }
        }
        Ok(entries.iter().map(HistoryEntry::line).collect::<Vec<_>>().join("\n"))
    }
}

async fn append_line(path: &Path, entry: &HistoryEntry) -> Result<(), HistoryError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

async fn oracle_summary(oracle: &Oracle, entries: &[HistoryEntry]) -> Option<String> {
    let mut lines = vec!["Summarize the following change log in 2-4 sentences.".to_string()];
    for entry in entries {
        lines.push(format!("Story: {}", entry.update_text));
        if !entry.world_changes.is_empty() {
            lines.push("World changes:".to_string());
            lines.extend(entry.world_changes.iter().map(HistoryChange::describe));
        }
        if !entry.character_changes.is_empty() {
            lines.push("Character changes:".to_string());
            lines.extend(entry.character_changes.iter().map(HistoryChange::describe));
        }
    }
    match oracle.ask(&lines.join("\n"), SUMMARY_SYSTEM_PROMPT, "HISTORY_SUMMARY").await {
        Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
        Ok(_) => None,
        Err(err) => {
            warn!(error = %err, "history summary failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::{CharacterActionDecision, CharacterRoster, Profile};
    use crate::game::UpdateDecision;
    use crate::testing::{sample_roster, sample_world, ScriptedOracle};
    use crate::world::ActionDecision;

    fn renamed_cycle() -> (CycleSnapshot, UpdateResult, crate::world::WorldTree, CharacterRoster) {
        let mut world = sample_world();
        let mut roster = sample_roster();
        let before = CycleSnapshot::capture(&world, &roster);

        world.update_content("micro.r1.p1", "A crown of ice.").unwrap();
        let added = world.add_child("micro.r1", "p3", "Tide Pact").unwrap();
        let ilsa = roster
            .update_profile("c1", Profile::parse("{\"name\": \"Ilsa the Bold\"}"))
            .unwrap();
        let ada = roster
            .add_record("c4", None, None, Profile::parse("{\"name\": \"Ada\"}"))
            .unwrap();

        let mut result = UpdateResult::new(UpdateDecision::new(true, true, "", ""));
        result.push_world(
            ActionDecision::new(WorldAction::UpdateNode, "micro.r1.p1", "heuristic"),
            world.get_node("micro.r1.p1").unwrap().clone(),
        );
        result.push_world(ActionDecision::new(WorldAction::AddNode, "micro.r1", "<|ADD_NODE|>:micro.r1"), added);
        result.push_character(CharacterActionDecision::new(CharacterAction::UpdateCharacter, "c1", ""), ilsa);
        result.push_character(CharacterActionDecision::new(CharacterAction::AddCharacter, "c4", ""), ada);
        (before, result, world, roster)
    }

    #[test]
    fn test_changes_follow_actions() {
        let (before, result, world, roster) = renamed_cycle();
        let world_changes = world_changes(&result, &before, &world);
        let character_changes = character_changes(&result, &before, &roster);

        assert_eq!(world_changes.len(), 2);
        assert!(world_changes[0].before.is_some());
        assert_eq!(world_changes[0].note, "heuristic");
        assert!(world_changes[1].before.is_none());
        assert_eq!(world_changes[1].identifier, "micro.r1.p3");
        assert_eq!(world_changes[1].note, "parent micro.r1");
        assert_eq!(character_changes[0].describe(), "UPDATE_CHARACTER c1(Ilsa the Bold) Ilsa->Ilsa the Bold");
        assert!(character_changes[1].before.is_none());
    }

    #[test]
    fn test_deterministic_summary() {
        let (before, result, world, roster) = renamed_cycle();
        let entry = HistoryEntry {
            id: "x".into(),
            created_at: "t".into(),
            update_text: String::new(),
            decision: Value::Null,
            world_changes: world_changes(&result, &before, &world),
            character_changes: character_changes(&result, &before, &roster),
            summary: String::new(),
        };
        assert_eq!(
            entry.deterministic_summary(),
            "world: UPDATE_NODE micro.r1.p1(Frost Crown), ADD_NODE micro.r1.p3(Tide Pact); \
             characters: UPDATE_CHARACTER c1(Ilsa the Bold) Ilsa->Ilsa the Bold, ADD_CHARACTER c4(Ada)"
        );

        let empty = HistoryEntry {
            world_changes: Vec::new(),
            character_changes: Vec::new(),
            ..entry
        };
        assert_eq!(empty.deterministic_summary(), "no changes");
    }

    #[tokio::test]
    async fn test_record_appends_log_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log").join("history.jsonl");
        let snapshots = dir.path().join("saves");
        let mut recorder = HistoryRecorder::new().with_log(&log).with_snapshot_dir(&snapshots);

        let (before, result, world, roster) = renamed_cycle();
        let first = recorder.record("first", &result, &before, &world, &roster, None).await;
        let empty = UpdateResult::new(UpdateDecision::new(false, false, "", ""));
        recorder.record("second", &empty, &before, &world, &roster, None).await;

        assert_eq!(first.id.len(), 32);
        assert_eq!(first.created_at.len(), "2024-01-01T00:00:00".len());
        let loaded = recorder.load_entries(0).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], first);
        assert_eq!(loaded[1].summary, "no changes");
        let tail = recorder.load_entries(1).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].update_text, "second");

        let snapshot = recorder.last_snapshot().unwrap();
        let name = snapshot.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("history_") && name.ends_with(".json"));

        let recent = recorder.summarize_recent(1, None).await.unwrap();
        assert!(recent.ends_with(": no changes"));
    }

    #[tokio::test]
    async fn test_oracle_summary_falls_back() {
        let oracle = ScriptedOracle::new();
        oracle.push("HISTORY_SUMMARY", "Error in chat_completion: overloaded");
        let mut recorder = HistoryRecorder::new();
        let (before, result, world, roster) = renamed_cycle();
        let entry = recorder
            .record("x", &result, &before, &world, &roster, Some(&oracle.handle()))
            .await;
        assert!(entry.summary.starts_with("world: UPDATE_NODE"));
    }

    #[tokio::test]
    async fn test_missing_log_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = HistoryRecorder::new().with_log(dir.path().join("absent.jsonl"));
        assert!(recorder.load_entries(5).await.unwrap().is_empty());
        assert_eq!(recorder.summarize_recent(5, None).await.unwrap(), "No history recorded.");
    }
}
