//! Which stores an update touches.

use crate::character::CharacterStore;
use crate::config::{any_keyword, AgentConfig};
use crate::parse::{coerce_bool, json_objects, json_str, tagged_bool};
use crate::resolve::{mentioned_characters, mentions};
use crate::world::{is_root_id, WorldStore};
use serde::{Deserialize, Serialize};

/// Reason recorded when the keyword heuristic decided.
pub const HEURISTIC_REASON: &str = "heuristic";

/// Nodes the heuristic scans for verbatim keys.
const HEURISTIC_NODE_SCAN: usize = 50;

/// Whether the world tree and/or the roster must change.
///
/// Never mutated; a later stage that needs a different answer builds a new
/// value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDecision {
    pub update_world: bool,
    pub update_characters: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub raw: String,
}

impl UpdateDecision {
    pub fn new(update_world: bool, update_characters: bool, reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            update_world,
            update_characters,
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Copy with `update_characters` forced on and `tag` appended to the reason.
    pub fn with_characters(&self, tag: &str) -> Self {
        let reason = format!("{};{}", self.reason, tag);
        Self {
            update_world: self.update_world,
            update_characters: true,
            reason: reason.trim_matches(';').to_string(),
            raw: self.raw.clone(),
        }
    }
}

/// Parse a decision reply: JSON with both flags, then the
/// `WORLD=..; CHARACTER=..` line, then the keyword heuristic.
pub fn parse_decision(
    reply: &str,
    text: &str,
    config: &AgentConfig,
    world: &dyn WorldStore,
    characters: &dyn CharacterStore,
) -> UpdateDecision {
    for obj in json_objects(reply) {
        let flags = obj
            .get("update_world")
            .and_then(coerce_bool)
            .zip(obj.get("update_characters").and_then(coerce_bool));
        if let Some((update_world, update_characters)) = flags {
            return UpdateDecision::new(update_world, update_characters, json_str(&obj, "reason"), reply);
        }
    }

    if let (Some(update_world), Some(update_characters)) =
        (tagged_bool(reply, "WORLD"), tagged_bool(reply, "CHARACTER"))
    {
        return UpdateDecision::new(update_world, update_characters, "", reply);
    }

    let (update_world, update_characters) = heuristic_decision(text, config, world, characters);
    UpdateDecision::new(update_world, update_characters, HEURISTIC_REASON, reply)
}

/// Keyword and mention signals; a long text with no signal updates both.
pub fn heuristic_decision(
    text: &str,
    config: &AgentConfig,
    world: &dyn WorldStore,
    characters: &dyn CharacterStore,
) -> (bool, bool) {
    let text = text.trim();
    let mut update_world = any_keyword(text, &config.keywords.world);
    let update_characters = any_keyword(text, &config.keywords.character)
        || !mentioned_characters(characters, text).is_empty();

    if !update_world {
        update_world = world
            .nodes_prefer_micro()
            .into_iter()
            .filter(|n| !is_root_id(&n.id))
            .take(HEURISTIC_NODE_SCAN)
            .any(|n| mentions(text, &n.key));
    }

    if !update_world && !update_characters && text.chars().count() > config.long_text_threshold {
        return (true, true);
    }
    (update_world, update_characters)
}
