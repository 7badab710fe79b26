//! Testing utilities.
//!
//! - [`ScriptedOracle`] for deterministic runs without API calls
//! - [`sample_world`] and [`sample_roster`], a small two-region setting

use crate::character::{CharacterRecord, CharacterRoster, Profile};
use crate::oracle::{Oracle, OracleError, TextOracle};
use crate::world::{WorldTree, POLITY_ASPECTS};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One call the scripted oracle answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub label: String,
    pub prompt: String,
    pub system_prompt: String,
}

#[derive(Debug, Default)]
struct Script {
    by_label: HashMap<String, VecDeque<String>>,
    fallback: VecDeque<String>,
    calls: Vec<RecordedCall>,
}

/// An oracle that answers from per-label queues.
///
/// Replies pushed for a label are served in order to calls with that label.
/// Calls with nothing queued take the default queue, whose last reply
/// repeats once the rest are used up. With no default either the reply is
/// empty. Every call is recorded. Clones share the same script, so keep one
/// clone for assertions and hand [`ScriptedOracle::handle`] to the agents.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOracle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a reply for calls labelled `label`.
    pub fn push(&self, label: &str, reply: impl Into<String>) -> &Self {
        self.script()
            .by_label
            .entry(label.to_string())
            .or_default()
            .push_back(reply.into());
        self
    }

    /// Queue a reply for calls with nothing scripted under their label.
    pub fn push_default(&self, reply: impl Into<String>) -> &Self {
        self.script().fallback.push_back(reply.into());
        self
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.script().calls.clone()
    }

    /// Labels of every call so far, oldest first.
    pub fn labels(&self) -> Vec<String> {
        self.script().calls.iter().map(|c| c.label.clone()).collect()
    }

    /// Replies still queued under `label`.
    pub fn pending(&self, label: &str) -> usize {
        self.script().by_label.get(label).map_or(0, VecDeque::len)
    }

    /// An [`Oracle`] backed by this script.
    pub fn handle(&self) -> Oracle {
        Oracle::new(self.clone())
    }
}

#[async_trait]
impl TextOracle for ScriptedOracle {
    async fn ask(&self, prompt: &str, system_prompt: &str, label: &str) -> Result<String, OracleError> {
        let mut script = self.script();
        script.calls.push(RecordedCall {
            label: label.to_string(),
            prompt: prompt.to_string(),
            system_prompt: system_prompt.to_string(),
        });
        if let Some(reply) = script.by_label.get_mut(label).and_then(VecDeque::pop_front) {
            return Ok(reply);
        }
        let reply = if script.fallback.len() > 1 {
            script.fallback.pop_front()
        } else {
            script.fallback.front().cloned()
        };
        Ok(reply.unwrap_or_default())
    }
}

/// A pitch, one macro theme and two regions.
///
/// - `micro.r1` North: `p1` Frost Crown, `p2` Ember League
/// - `micro.r2` Dunes: `p1` Salt Khanate
///
/// Every polity carries the seven aspect children.
pub fn sample_world() -> WorldTree {
    let mut world = WorldTree::new().with_pitch("A frozen north and a desert south, bound by old trade roads.");
    world.upsert_node("1", "Magic", "Magic is rare and feared.", Some("macro"));
    world.upsert_node("micro.r1", "North", "A frozen frontier of fjords.", Some("micro"));
    world.upsert_node(
        "micro.r1.p1",
        "Frost Crown",
        "A stern monarchy ruling the fjords.",
        Some("micro.r1"),
    );
    world.upsert_node(
        "micro.r1.p2",
        "Ember League",
        "A merchant league of forge towns.",
        Some("micro.r1"),
    );
    world.upsert_node("micro.r2", "Dunes", "A sea of sand crossed by caravans.", Some("micro"));
    world.upsert_node(
        "micro.r2.p1",
        "Salt Khanate",
        "Nomad clans sworn to a khan.",
        Some("micro.r2"),
    );
    for polity in ["micro.r1.p1", "micro.r1.p2", "micro.r2.p1"] {
        for (aspect, title) in POLITY_ASPECTS {
            world.upsert_node(&format!("{polity}.{aspect}"), title, "", Some(polity));
        }
    }
    world
}

/// Three characters, one per polity of [`sample_world`].
pub fn sample_roster() -> CharacterRoster {
    let mut roster = CharacterRoster::new();
    roster.insert(
        CharacterRecord::new(
            "c1",
            Profile::from_fields([
                ("name", "Ilsa"),
                ("summary", "A ranger sworn to the crown."),
                ("profession", "ranger"),
                ("faction", "Frost Crown"),
            ]),
        )
        .with_affiliation(Some("micro.r1"), Some("micro.r1.p1")),
    );
    roster.insert(
        CharacterRecord::new(
            "c2",
            Profile::from_fields([
                ("name", "Bram"),
                ("summary", "A blacksmith with debts."),
                ("profession", "smith"),
                ("faction", "Ember League"),
            ]),
        )
        .with_affiliation(Some("micro.r1"), Some("micro.r1.p2")),
    );
    roster.insert(
        CharacterRecord::new(
            "c3",
            Profile::from_fields([
                ("name", "Yusuf"),
                ("summary", "A caravan master of the salt roads."),
                ("profession", "merchant"),
                ("faction", "Salt Khanate"),
            ]),
        )
        .with_affiliation(Some("micro.r2"), Some("micro.r2.p1")),
    );
    roster
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::CharacterStore;
    use crate::world::WorldStore;

    #[tokio::test]
    async fn test_label_queues_then_sticky_default() {
        let oracle = ScriptedOracle::new();
        oracle.push("A", "a1").push("A", "a2");
        oracle.push_default("d1").push_default("d2");
        let handle = oracle.handle();

        assert_eq!(handle.ask("p", "s", "A").await.unwrap(), "a1");
        assert_eq!(handle.ask("p", "s", "B").await.unwrap(), "d1");
        assert_eq!(handle.ask("p", "s", "A").await.unwrap(), "a2");
        assert_eq!(handle.ask("p", "s", "A").await.unwrap(), "d2");
        assert_eq!(handle.ask("p", "s", "B").await.unwrap(), "d2");
        assert_eq!(oracle.labels(), vec!["A", "B", "A", "A", "B"]);
        assert_eq!(oracle.calls()[0].system_prompt, "s");
    }

    #[tokio::test]
    async fn test_unscripted_reply_is_empty() {
        let oracle = ScriptedOracle::new();
        assert_eq!(oracle.handle().ask("p", "", "X").await.unwrap(), "");
        assert_eq!(oracle.calls().len(), 1);
        assert_eq!(oracle.pending("X"), 0);
    }

    #[test]
    fn test_fixtures_are_linked() {
        let world = sample_world();
        assert_eq!(world.polities().len(), 3);
        assert!(world.is_region("micro.r2"));
        assert_eq!(world.children("micro.r1.p2").len(), POLITY_ASPECTS.len());

        let roster = sample_roster();
        for record in roster.list_records() {
            let polity = record.polity_id.as_deref().unwrap();
            assert!(world.is_polity(polity));
        }
    }
}
