//! Bounded search-and-read rounds that build the working context.

use crate::character::{CharacterRecord, CharacterStore};
use crate::config::AgentConfig;
use crate::oracle::{compact, truncate, Oracle};
use crate::parse::{coerce_id_list, json_bool, json_objects, split_identifiers, tagged_bool, tagged_value};
use crate::resolve::{mentioned_characters, mentioned_nodes, resolve_character_many, resolve_world_many};
use crate::world::{WorldNode, WorldStore};
use std::collections::BTreeMap;
use tracing::info;

use super::SYSTEM_PROMPT;

/// Entities read during one update cycle.
///
/// Keyed by id, so reading an entity twice is a no-op and the context only
/// grows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingContext {
    pub read_world: BTreeMap<String, WorldNode>,
    pub read_characters: BTreeMap<String, CharacterRecord>,
}

impl WorkingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read_world.len() + self.read_characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read nodes into the context; returns the ids that were new.
    pub fn read_nodes(&mut self, world: &dyn WorldStore, ids: &[String]) -> Vec<String> {
        let mut added = Vec::new();
        for id in ids {
            if self.read_world.contains_key(id) {
                continue;
            }
            if let Some(node) = world.get_node(id) {
                self.read_world.insert(id.clone(), node.clone());
                added.push(id.clone());
            }
        }
        added
    }

    /// Read records into the context; returns the ids that were new.
    pub fn read_records(&mut self, characters: &dyn CharacterStore, ids: &[String]) -> Vec<String> {
        let mut added = Vec::new();
        for id in ids {
            if self.read_characters.contains_key(id) {
                continue;
            }
            if let Some(record) = characters.get_record(id) {
                self.read_characters.insert(id.clone(), record.clone());
                added.push(id.clone());
            }
        }
        added
    }

    /// Line-packed rendering used in decision and validation prompts.
    pub fn pack(&self, limit: usize) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.read_world.is_empty() {
            let items: Vec<String> = self
                .read_world
                .values()
                .map(|n| world_context_item(n, limit))
                .collect();
            lines.extend(pack_items(&format!("W({})", items.len()), &items, limit));
        }
        if !self.read_characters.is_empty() {
            let items: Vec<String> = self
                .read_characters
                .values()
                .map(|r| character_context_item(r, limit))
                .collect();
            lines.extend(pack_items(&format!("C({})", items.len()), &items, limit));
        }
        lines
    }
}

/// What one search round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRound {
    pub round: usize,
    pub world_added: usize,
    pub characters_added: usize,
    /// Context size after the round.
    pub context_size: usize,
    pub should_continue: bool,
}

/// Join items into `LABEL: a | b | c` lines no longer than `max_line_len`,
/// unless a single item is longer on its own.
pub fn pack_items(label: &str, items: &[String], max_line_len: usize) -> Vec<String> {
    let prefix = format!("{label}: ");
    let mut lines = Vec::new();
    let mut current = prefix.clone();

    for item in items.iter().map(|i| i.trim()).filter(|i| !i.is_empty()) {
        let candidate = if current == prefix {
            format!("{prefix}{item}")
        } else {
            format!("{current} | {item}")
        };
        if candidate.chars().count() > max_line_len && current != prefix {
            lines.push(std::mem::replace(&mut current, format!("{prefix}{item}")));
        } else {
            current = candidate;
        }
    }
    if current != prefix {
        lines.push(current);
    }
    lines
}

/// `id/key=summary`.
pub fn world_context_item(node: &WorldNode, limit: usize) -> String {
    let value = compact(&node.value);
    if value.is_empty() {
        node.label()
    } else {
        format!("{}={}", node.label(), truncate(&value, limit))
    }
}

/// `id/name=summary | profession=..,faction=..,species=..,tier=..`.
pub fn character_context_item(record: &CharacterRecord, limit: usize) -> String {
    let summary = record.profile.summary();
    let extras: Vec<String> = ["profession", "faction", "species", "tier"]
        .iter()
        .filter_map(|key| {
            let value = compact(&record.profile.field(key));
            (!value.is_empty()).then(|| format!("{key}={value}"))
        })
        .collect();

    let mut detail = Vec::new();
    if !summary.is_empty() {
        detail.push(summary);
    }
    if !extras.is_empty() {
        detail.push(extras.join(","));
    }
    if detail.is_empty() {
        record.label()
    } else {
        format!("{}={}", record.label(), truncate(&detail.join(" | "), limit))
    }
}

/// Packed `W(n)` listing of the whole tree, micro branch first.
pub fn world_listing(world: &dyn WorldStore, limit: usize, with_content: bool) -> Vec<String> {
    let items: Vec<String> = world
        .nodes_prefer_micro()
        .into_iter()
        .map(|n| if with_content { world_context_item(n, limit) } else { n.label() })
        .collect();
    pack_items(&format!("W({})", items.len()), &items, limit)
}

/// Packed `C(n)` listing of the whole roster.
pub fn roster_listing(characters: &dyn CharacterStore, limit: usize, with_content: bool) -> Vec<String> {
    let items: Vec<String> = characters
        .list_records()
        .into_iter()
        .map(|r| if with_content { character_context_item(r, limit) } else { r.label() })
        .collect();
    pack_items(&format!("C({})", items.len()), &items, limit)
}

/// Runs search-and-read rounds against both stores.
pub struct ContextGatherer<'a> {
    oracle: &'a Oracle,
    config: &'a AgentConfig,
}

impl<'a> ContextGatherer<'a> {
    pub fn new(oracle: &'a Oracle, config: &'a AgentConfig) -> Self {
        Self { oracle, config }
    }

    /// Grow `context` with what the oracle (or the text itself) points at.
    ///
    /// Stops when the oracle says it has enough, when a round reads nothing
    /// new, or after the configured number of rounds. `hint` carries the
    /// reason a previous validation failed.
    pub async fn gather(
        &self,
        text: &str,
        hint: Option<&str>,
        context: &mut WorkingContext,
        world: &dyn WorldStore,
        characters: &dyn CharacterStore,
    ) -> Result<Vec<SearchRound>, crate::oracle::OracleError> {
        let mut rounds = Vec::new();
        if text.trim().is_empty() {
            return Ok(rounds);
        }
        let limit = self.config.search_limit;

        for round in 1..=self.config.search_rounds {
            let prompt = self.search_prompt(text, hint, context, world, characters);
            let reply = self
                .oracle
                .ask(&prompt, SYSTEM_PROMPT, &format!("GAME_SEARCH_{round}"))
                .await?;

            let (world_tokens, character_tokens) = parse_search(&reply);
            let mut world_ids = resolve_world_many(world, &world_tokens, limit);
            let mut character_ids = resolve_character_many(characters, &character_tokens, limit);
            if world_ids.is_empty() && character_ids.is_empty() {
                world_ids = mentioned_nodes(world, text)
                    .into_iter()
                    .take(limit)
                    .map(|n| n.id.clone())
                    .collect();
                character_ids = mentioned_characters(characters, text)
                    .into_iter()
                    .take(limit)
                    .map(|r| r.id.clone())
                    .collect();
            }
            let world_added = context.read_nodes(world, &world_ids).len();
            let characters_added = context.read_records(characters, &character_ids).len();

            let prompt = self.continue_prompt(text, context);
            let reply = self
                .oracle
                .ask(&prompt, SYSTEM_PROMPT, &format!("GAME_SEARCH_DECIDE_{round}"))
                .await?;
            let should_continue = parse_continue(&reply);

            info!(
                round,
                world_added,
                characters_added,
                context_size = context.len(),
                should_continue,
                "search round"
            );
            rounds.push(SearchRound {
                round,
                world_added,
                characters_added,
                context_size: context.len(),
                should_continue,
            });
            if !should_continue || world_added + characters_added == 0 {
                break;
            }
        }
        Ok(rounds)
    }

    fn search_prompt(
        &self,
        text: &str,
        hint: Option<&str>,
        context: &WorkingContext,
        world: &dyn WorldStore,
        characters: &dyn CharacterStore,
    ) -> String {
        let limit = self.config.context_line_limit;
        let mut lines = vec![
            "Task: choose which world nodes and characters to read before deciding.".to_string(),
            format!(
                "Pick at most {n} world nodes and {n} characters per round, only ones you need.",
                n = self.config.search_limit
            ),
            "Prefer micro.* nodes for regions, polities and cities; macro nodes only for world laws and themes.".to_string(),
            "Answer with exactly two lines:".to_string(),
            "1) WORLD=id1,id2; CHARACTER=c1,c2".to_string(),
            "2) {\"world\":[\"id1\",\"id2\"],\"characters\":[\"c1\",\"c2\"],\"reason\":\"...\"}".to_string(),
            format!("Story update: {}", text.trim()),
            format!("Already read nodes: {}", id_list(context.read_world.keys())),
            format!("Already read characters: {}", id_list(context.read_characters.keys())),
        ];
        if let Some(hint) = hint.filter(|h| !h.trim().is_empty()) {
            lines.push(format!("Context still missing: {}", hint.trim()));
        }
        let nodes = world_listing(world, limit, false);
        if nodes.is_empty() {
            lines.push("Available nodes: none".to_string());
        } else {
            lines.push("Available nodes:".to_string());
            lines.extend(nodes);
        }
        let roster = roster_listing(characters, limit, false);
        if roster.is_empty() {
            lines.push("Available characters: none".to_string());
        } else {
            lines.push("Available characters:".to_string());
            lines.extend(roster);
        }
        lines.join("\n")
    }

    fn continue_prompt(&self, text: &str, context: &WorkingContext) -> String {
        let mut lines = vec![
            "Task: decide whether to keep searching.".to_string(),
            "If what has been read is enough for the next decision, answer NO.".to_string(),
            "Answer with exactly two lines:".to_string(),
            "1) CONTINUE=YES/NO".to_string(),
            "2) {\"continue\":true|false,\"reason\":\"...\"}".to_string(),
            format!("Story update: {}", text.trim()),
        ];
        let packed = context.pack(self.config.context_line_limit);
        if packed.is_empty() {
            lines.push("Read so far: none".to_string());
        } else {
            lines.push("Read so far:".to_string());
            lines.extend(packed);
        }
        lines.join("\n")
    }
}

fn id_list<'a>(ids: impl Iterator<Item = &'a String>) -> String {
    let ids: Vec<&str> = ids.map(String::as_str).collect();
    if ids.is_empty() {
        "none".to_string()
    } else {
        ids.join(", ")
    }
}

/// World and character tokens from a search reply: JSON first, then the
/// tagged line.
fn parse_search(reply: &str) -> (Vec<String>, Vec<String>) {
    let mut world = Vec::new();
    let mut characters = Vec::new();
    for obj in json_objects(reply) {
        world.extend(coerce_id_list(obj.get("world")));
        characters.extend(coerce_id_list(obj.get("characters").or_else(|| obj.get("character"))));
    }
    if world.is_empty() && characters.is_empty() {
        if let Some(value) = tagged_value(reply, "WORLD") {
            world = split_identifiers(&value);
        }
        if let Some(value) = tagged_value(reply, "CHARACTER") {
            characters = split_identifiers(&value);
        }
    }
    (world, characters)
}

/// Unparseable means stop.
fn parse_continue(reply: &str) -> bool {
    json_bool(reply, "continue")
        .map(|(value, _)| value)
        .or_else(|| tagged_bool(reply, "CONTINUE"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_roster, sample_world, ScriptedOracle};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pack_items_respects_limit() {
        let items: Vec<String> = vec!["aaaa".into(), "bbbb".into(), "".into(), "cccc".into()];
        assert_eq!(pack_items("W(3)", &items, 17), vec!["W(3): aaaa | bbbb", "W(3): cccc"]);
        let long = vec!["x".repeat(40)];
        assert_eq!(pack_items("C(1)", &long, 10), vec![format!("C(1): {}", "x".repeat(40))]);
        assert!(pack_items("C(0)", &[], 10).is_empty());
    }

    #[test]
    fn test_context_items() {
        let world = sample_world();
        let roster = sample_roster();
        let node = world.get_node("micro.r1.p2").unwrap();
        assert_eq!(
            world_context_item(node, 320),
            "micro.r1.p2/Ember League=A merchant league of forge towns."
        );
        let record = roster.get_record("c2").unwrap();
        assert_eq!(
            character_context_item(record, 320),
            "c2/Bram=A blacksmith with debts. | profession=smith,faction=Ember League"
        );
    }

    #[test]
    fn test_read_is_idempotent() {
        let world = sample_world();
        let mut context = WorkingContext::new();
        let ids = vec!["micro.r1".to_string(), "missing".to_string()];
        assert_eq!(context.read_nodes(&world, &ids), vec!["micro.r1"]);
        assert!(context.read_nodes(&world, &ids).is_empty());
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn test_parse_search_and_continue() {
        let (w, c) = parse_search("WORLD=micro.r1, North; CHARACTER=c1\n");
        assert_eq!(w, vec!["micro.r1", "North"]);
        assert_eq!(c, vec!["c1"]);
        let (w, c) = parse_search("{\"world\":[\"micro.r2\"],\"character\":\"c3\"}");
        assert_eq!((w, c), (vec!["micro.r2".to_string()], vec!["c3".to_string()]));

        assert!(parse_continue("CONTINUE=YES"));
        assert!(!parse_continue("{\"continue\": false}\nCONTINUE=YES"));
        assert!(!parse_continue("maybe"));
    }

    #[tokio::test]
    async fn test_gather_grows_monotonically_and_stops_on_no_progress() {
        let world = sample_world();
        let roster = sample_roster();
        let oracle = ScriptedOracle::new();
        oracle.push("GAME_SEARCH_1", "WORLD=micro.r1; CHARACTER=c1");
        oracle.push("GAME_SEARCH_DECIDE_1", "CONTINUE=YES");
        oracle.push("GAME_SEARCH_2", "WORLD=micro.r1; CHARACTER=c1");
        oracle.push("GAME_SEARCH_DECIDE_2", "CONTINUE=YES");

        let config = AgentConfig::default().with_search_rounds(3);
        let handle = oracle.handle();
        let gatherer = ContextGatherer::new(&handle, &config);
        let mut context = WorkingContext::new();
        let rounds = gatherer
            .gather("Ilsa rides north.", None, &mut context, &world, &roster)
            .await
            .unwrap();

        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0].context_size, 2);
        assert_eq!(rounds[1].context_size, 2);
        assert_eq!(rounds[1].world_added + rounds[1].characters_added, 0);
        assert!(rounds.windows(2).all(|w| w[0].context_size <= w[1].context_size));
    }

    #[tokio::test]
    async fn test_gather_falls_back_to_mentions() {
        let world = sample_world();
        let roster = sample_roster();
        let oracle = ScriptedOracle::new();
        oracle.push("GAME_SEARCH_1", "I cannot tell.");
        oracle.push("GAME_SEARCH_DECIDE_1", "no");

        let config = AgentConfig::default();
        let handle = oracle.handle();
        let mut context = WorkingContext::new();
        ContextGatherer::new(&handle, &config)
            .gather("Bram visits the Frost Crown.", None, &mut context, &world, &roster)
            .await
            .unwrap();
        assert!(context.read_world.contains_key("micro.r1.p1"));
        assert!(context.read_characters.contains_key("c2"));
    }

    #[tokio::test]
    async fn test_gather_empty_text_makes_no_calls() {
        let oracle = ScriptedOracle::new();
        let config = AgentConfig::default();
        let handle = oracle.handle();
        let mut context = WorkingContext::new();
        let rounds = ContextGatherer::new(&handle, &config)
            .gather("   ", None, &mut context, &sample_world(), &sample_roster())
            .await
            .unwrap();
        assert!(rounds.is_empty());
        assert!(oracle.calls().is_empty());
    }
}
