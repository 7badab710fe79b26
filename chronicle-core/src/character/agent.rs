//! Oracle-driven character roster mutations.

use super::record::{CharacterRecord, MountPoint, Profile};
use super::store::{mount_points, CharacterError, CharacterStore};
use crate::config::{any_keyword, KeywordSets};
use crate::oracle::{compact, truncate, Oracle};
use crate::parse::{dedupe, json_array_objects, json_objects, json_str_any, split_identifiers, tagged_lines};
use crate::resolve::{mentioned_characters, resolve_character};
use crate::world::{pick_identifier, WorldStore, MACRO_ROOT, WORLD_ROOT};
use crate::NO_RELEVANT_INFO;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::info;

const SYSTEM_PROMPT: &str = "You are a precise character-writing assistant. \
Follow formatting instructions exactly and avoid extra commentary.";

/// Fields every generated profile carries.
pub const PROFILE_FIELDS: &[&str] = &[
    "name",
    "summary",
    "background",
    "motivation",
    "conflict",
    "abilities",
    "weaknesses",
    "relationships",
    "hooks",
    "faction",
    "profession",
    "species",
    "tier",
];

/// Placeholder the oracle uses for "assign me an id".
const NEW_ID_MARKER: &str = "NEW";

/// A character mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CharacterAction {
    AddCharacter,
    UpdateCharacter,
}

impl CharacterAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddCharacter => "ADD_CHARACTER",
            Self::UpdateCharacter => "UPDATE_CHARACTER",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim().trim_start_matches("<|").trim_end_matches("|>");
        match token.to_ascii_uppercase().as_str() {
            "ADD_CHARACTER" | "ADD" => Some(Self::AddCharacter),
            "UPDATE_CHARACTER" | "UPDATE" => Some(Self::UpdateCharacter),
            _ => None,
        }
    }
}

impl fmt::Display for CharacterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One proposed character mutation.
///
/// For UPDATE the target exists; for ADD it is a fresh id reserved for the
/// new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterActionDecision {
    pub flag: CharacterAction,
    pub target_id: String,
    pub raw: String,
}

impl CharacterActionDecision {
    pub fn new(flag: CharacterAction, target_id: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            flag,
            target_id: target_id.into(),
            raw: raw.into(),
        }
    }
}

/// What one parse strategy proposed.
#[derive(Debug, Default)]
struct Proposals {
    updates: Vec<String>,
    /// One entry per ADD; `None` when the oracle left the id to us.
    adds: Vec<Option<String>>,
}

/// Agent that turns story text into roster mutations.
#[derive(Debug, Clone)]
pub struct CharacterAgent {
    oracle: Oracle,
    intro_keywords: Vec<String>,
}

impl CharacterAgent {
    pub fn new(oracle: Oracle) -> Self {
        Self {
            oracle,
            intro_keywords: KeywordSets::default().character_intro,
        }
    }

    /// Words that let the heuristic fallback propose a new character.
    pub fn with_intro_keywords(mut self, keywords: Vec<String>) -> Self {
        self.intro_keywords = keywords;
        self
    }

    /// Profile of the character most relevant to `query`, or the
    /// no-information sentinel. An empty roster never calls the oracle.
    pub async fn extract_info(
        &self,
        characters: &dyn CharacterStore,
        query: &str,
    ) -> Result<String, CharacterError> {
        if characters.is_empty() {
            return Ok(NO_RELEVANT_INFO.to_string());
        }
        let prompt = format!(
            "Task: pick the character most relevant to the query.\n\
             Output only the character id, nothing else.\n\
             If nothing is relevant, output exactly: {NO_RELEVANT_INFO}\n\
             Query: {}\n\
             Available characters:\n{}",
            query.trim(),
            roster_listing(characters)
        );
        let reply = self.oracle.ask(&prompt, SYSTEM_PROMPT, "CHARACTER_EXTRACT").await?;

        let ids: Vec<&str> = characters.list_records().into_iter().map(|r| r.id.as_str()).collect();
        let profile = pick_identifier(&reply, ids.into_iter())
            .and_then(|id| characters.get_record(&id))
            .map(|record| record.profile.render())
            .filter(|rendered| !rendered.trim().is_empty() && rendered != "{}");
        match profile {
            Some(profile) => Ok(profile),
            None => {
                info!(query_len = query.len(), "character extract miss");
                Ok(NO_RELEVANT_INFO.to_string())
            }
        }
    }

    /// Ask for exactly one action. UPDATE naming an unknown character fails.
    pub async fn decide_action(
        &self,
        characters: &dyn CharacterStore,
        text: &str,
    ) -> Result<CharacterActionDecision, CharacterError> {
        let prompt = format!(
            "Task: decide whether to add a character or update one.\n\
             Answer with exactly two lines:\n\
             1) <|ADD_CHARACTER|>:ID or <|UPDATE_CHARACTER|>:ID\n\
             2) {{\"action\":\"ADD_CHARACTER\"|\"UPDATE_CHARACTER\",\"id\":\"ID\"}}\n\
             For UPDATE the id must exist; for ADD give a new id or {NEW_ID_MARKER}.\n\
             Story update: {}\n\
             Available characters:\n{}",
            text.trim(),
            roster_listing(characters)
        );
        let reply = self.oracle.ask(&prompt, SYSTEM_PROMPT, "CHARACTER_DECIDE").await?;

        let tags = parse_tag_proposals(&reply);
        let json = parse_json_proposals(&reply);
        let decision = if let Some(token) = tags.updates.first().or(json.updates.first()) {
            let target = resolve_character(characters, token)
                .ok_or_else(|| CharacterError::NotFound(token.clone()))?;
            CharacterActionDecision::new(CharacterAction::UpdateCharacter, target, reply.clone())
        } else if let Some(suggested) = tags.adds.first().or(json.adds.first()) {
            let id = fresh_identifier(characters, suggested.as_deref(), &HashSet::new());
            CharacterActionDecision::new(CharacterAction::AddCharacter, id, reply.clone())
        } else {
            return Err(CharacterError::Parse(truncate(&reply, 200)));
        };
        info!(flag = %decision.flag, id = %decision.target_id, "character decide_action");
        Ok(decision)
    }

    /// Ask for every roster change the text implies.
    ///
    /// UPDATE targets are resolved or dropped. ADD ids are reserved in order so
    /// no two actions in the batch share one. With nothing usable from the
    /// oracle, characters mentioned by id or name are updated; failing that, a
    /// character-introduction keyword yields one ADD.
    pub async fn collect_actions(
        &self,
        characters: &dyn CharacterStore,
        text: &str,
        cap: usize,
    ) -> Result<Vec<CharacterActionDecision>, CharacterError> {
        let prompt = format!(
            "Task: list every character change the story update requires (at most {cap}).\n\
             Answer with both encodings:\n\
             1) one line per action: <|UPDATE_CHARACTER|>:ID1,ID2 or <|ADD_CHARACTER|>:{NEW_ID_MARKER}\n\
             2) a JSON array: [{{\"action\":\"UPDATE_CHARACTER\",\"id\":\"ID\"}}]\n\
             If nothing needs to change output <|UPDATE_CHARACTER|>:NONE and [].\n\
             Story update: {}\n\
             Available characters:\n{}",
            text.trim(),
            roster_listing(characters)
        );
        let reply = self.oracle.ask(&prompt, SYSTEM_PROMPT, "CHARACTER_COLLECT").await?;

        let tags = parse_tag_proposals(&reply);
        let json = parse_json_proposals(&reply);

        let updates = dedupe(
            tags.updates
                .iter()
                .chain(&json.updates)
                .filter_map(|token| resolve_character(characters, token)),
        );

        // Both encodings restate the same set of additions, so the count is
        // the larger of the two rather than their sum.
        let named = dedupe(tags.adds.iter().chain(&json.adds).flatten().cloned());
        let add_count = tags.adds.len().max(json.adds.len()).max(named.len());

        let mut actions: Vec<CharacterActionDecision> = updates
            .into_iter()
            .take(cap)
            .map(|id| CharacterActionDecision::new(CharacterAction::UpdateCharacter, id, reply.clone()))
            .collect();

        let mut reserved = HashSet::new();
        let mut named = named.into_iter();
        for _ in 0..add_count.min(cap.saturating_sub(actions.len())) {
            let id = fresh_identifier(characters, named.next().as_deref(), &reserved);
            reserved.insert(id.clone());
            actions.push(CharacterActionDecision::new(CharacterAction::AddCharacter, id, reply.clone()));
        }

        if actions.is_empty() {
            actions = self.heuristic_actions(characters, text, cap);
        }
        info!(count = actions.len(), cap, "character collect_actions");
        Ok(actions)
    }

    fn heuristic_actions(
        &self,
        characters: &dyn CharacterStore,
        text: &str,
        cap: usize,
    ) -> Vec<CharacterActionDecision> {
        let updates: Vec<CharacterActionDecision> = mentioned_characters(characters, text)
            .into_iter()
            .take(cap)
            .map(|r| CharacterActionDecision::new(CharacterAction::UpdateCharacter, r.id.clone(), "heuristic"))
            .collect();
        if !updates.is_empty() || cap == 0 {
            return updates;
        }
        if any_keyword(text, &self.intro_keywords) {
            let id = characters.next_identifier(&HashSet::new());
            return vec![CharacterActionDecision::new(CharacterAction::AddCharacter, id, "heuristic")];
        }
        Vec::new()
    }

    /// Apply one action and return the resulting record.
    pub async fn apply_action(
        &self,
        characters: &mut dyn CharacterStore,
        world: &dyn WorldStore,
        action: &CharacterActionDecision,
        text: &str,
    ) -> Result<CharacterRecord, CharacterError> {
        match action.flag {
            CharacterAction::AddCharacter => {
                self.create_character(characters, world, text, Some(action.target_id.as_str()))
                    .await
            }
            CharacterAction::UpdateCharacter => {
                self.update_profile(characters, &action.target_id, text).await
            }
        }
    }

    /// Apply actions in order; the result is aligned with `actions`.
    pub async fn apply_actions(
        &self,
        characters: &mut dyn CharacterStore,
        world: &dyn WorldStore,
        actions: &[CharacterActionDecision],
        text: &str,
    ) -> Result<Vec<CharacterRecord>, CharacterError> {
        let mut records = Vec::with_capacity(actions.len());
        for action in actions {
            records.push(self.apply_action(characters, world, action, text).await?);
        }
        Ok(records)
    }

    /// Rewrite a character's profile from `context`.
    pub async fn update_profile(
        &self,
        characters: &mut dyn CharacterStore,
        id: &str,
        context: &str,
    ) -> Result<CharacterRecord, CharacterError> {
        let record = characters.require_record(id)?;
        let prompt = format!(
            "Task: update the character profile.\n\
             Output only the updated profile as JSON, no explanation or markdown.\n\
             JSON fields: {}.\n\
             Character id: {}\n\
             Current profile: {}\n\
             Story update: {}",
            PROFILE_FIELDS.join(", "),
            record.id,
            record.profile.render(),
            context.trim()
        );
        let reply = self.oracle.ask(&prompt, SYSTEM_PROMPT, "CHARACTER_UPDATE").await?;
        let updated = characters.update_profile(id, Profile::parse(&reply))?;
        info!(id, "character update");
        Ok(updated)
    }

    /// Generate and insert a new character anchored where the text points.
    ///
    /// A requested id is used when it is free; otherwise the next `cN` id.
    pub async fn create_character(
        &self,
        characters: &mut dyn CharacterStore,
        world: &dyn WorldStore,
        text: &str,
        id: Option<&str>,
    ) -> Result<CharacterRecord, CharacterError> {
        let id = fresh_identifier(characters, id, &HashSet::new());
        let mount = match_mount_point(world, text);

        let mut prompt = vec![
            "Task: create a new character for this world.".to_string(),
            "Output only the profile as JSON, no explanation or markdown.".to_string(),
            format!("JSON fields: {}.", PROFILE_FIELDS.join(", ")),
            "World outline:".to_string(),
            world_outline(world),
            format!("Character id: {id}"),
        ];
        if let Some(mount) = &mount {
            prompt.push(mount.describe());
        }
        prompt.push(format!("Character pitch: {}", text.trim()));

        let reply = self
            .oracle
            .ask(&prompt.join("\n"), SYSTEM_PROMPT, "CHARACTER_ADD")
            .await?;
        let record = characters.add_record(
            &id,
            mount.as_ref().map(|m| m.region_id.clone()),
            mount.and_then(|m| m.polity_id),
            Profile::parse(&reply),
        )?;
        info!(id = %record.id, polity = ?record.polity_id, "character add");
        Ok(record)
    }
}

fn roster_listing(characters: &dyn CharacterStore) -> String {
    let records = characters.list_records();
    if records.is_empty() {
        return "- none".to_string();
    }
    records
        .into_iter()
        .map(summarize)
        .collect::<Vec<_>>()
        .join("\n")
}

fn summarize(record: &CharacterRecord) -> String {
    let mut labels = Vec::new();
    for field in ["faction", "profession", "summary"] {
        let value = record.profile.field(field);
        if !value.is_empty() {
            labels.push(format!("{field}: {}", compact(&value)));
        }
    }
    if labels.is_empty() {
        format!("- {}", record.label())
    } else {
        format!("- {} | {}", record.label(), labels.join(" | "))
    }
}

fn parse_tag_proposals(reply: &str) -> Proposals {
    let mut proposals = Proposals::default();
    for line in tagged_lines(reply, &["ADD_CHARACTER", "UPDATE_CHARACTER"]) {
        match CharacterAction::parse(&line.tag) {
            Some(CharacterAction::UpdateCharacter) => {
                proposals.updates.extend(split_identifiers(&line.value));
            }
            Some(CharacterAction::AddCharacter) => {
                let tokens = split_identifiers(&line.value);
                if tokens.is_empty() && !is_none_value(&line.value) {
                    proposals.adds.push(None);
                }
                proposals.adds.extend(tokens.into_iter().map(suggested_id));
            }
            None => {}
        }
    }
    proposals
}

fn parse_json_proposals(reply: &str) -> Proposals {
    let mut proposals = Proposals::default();
    let objects = dedupe(json_array_objects(reply).into_iter().chain(json_objects(reply)));
    for obj in objects {
        let id = json_str_any(&obj, &["id", "target", "index"]);
        match CharacterAction::parse(&json_str_any(&obj, &["action", "flag"])) {
            Some(CharacterAction::UpdateCharacter) if !id.is_empty() => proposals.updates.push(id),
            Some(CharacterAction::AddCharacter) => proposals.adds.push(suggested_id(id)),
            _ => {}
        }
    }
    proposals
}

fn is_none_value(value: &str) -> bool {
    matches!(value.trim().to_ascii_uppercase().as_str(), "NONE" | "NULL" | "N/A")
}

/// `NEW` and empty mean "assign one".
fn suggested_id(token: String) -> Option<String> {
    let token = token.trim();
    if token.is_empty() || token.eq_ignore_ascii_case(NEW_ID_MARKER) {
        None
    } else {
        Some(token.to_string())
    }
}

/// `suggested` when it is free in the store and the batch, else the next `cN`.
fn fresh_identifier(
    characters: &dyn CharacterStore,
    suggested: Option<&str>,
    reserved: &HashSet<String>,
) -> String {
    match suggested.map(str::trim) {
        Some(id)
            if !id.is_empty()
                && !id.eq_ignore_ascii_case(NEW_ID_MARKER)
                && characters.get_record(id).is_none()
                && !reserved.contains(id) =>
        {
            id.to_string()
        }
        _ => characters.next_identifier(reserved),
    }
}

/// First mount point whose polity key appears in the text, else the first
/// whose region key does.
fn match_mount_point(world: &dyn WorldStore, text: &str) -> Option<MountPoint> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let points = mount_points(world);
    points
        .iter()
        .find(|m| !m.polity_key.trim().is_empty() && text.contains(m.polity_key.trim()))
        .or_else(|| {
            points
                .iter()
                .find(|m| !m.region_key.trim().is_empty() && text.contains(m.region_key.trim()))
        })
        .cloned()
}

/// The world pitch followed by the macro themes.
fn world_outline(world: &dyn WorldStore) -> String {
    let mut lines = Vec::new();
    if let Some(root) = world.get_node(WORLD_ROOT) {
        if !root.value.trim().is_empty() {
            lines.push(format!("World pitch: {}", root.value.trim()));
        }
    }
    for theme in world.children(MACRO_ROOT) {
        if theme.value.trim().is_empty() {
            lines.push(format!("- {} {}", theme.id, theme.key));
        } else {
            lines.push(format!("- {} {}: {}", theme.id, theme.key, theme.value.trim()));
        }
    }
    if lines.is_empty() {
        "No world outline available.".to_string()
    } else {
        lines.join("\n")
    }
}
