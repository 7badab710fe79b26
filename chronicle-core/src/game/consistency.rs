//! Passes that keep the world tree and the roster coherent after (or instead
//! of) the regular apply step.

use super::agent::{UpdateError, UpdateResult};
use super::context::world_context_item;
use super::decision::UpdateDecision;
use super::SYSTEM_PROMPT;
use crate::character::{CharacterAction, CharacterActionDecision, CharacterAgent, CharacterStore};
use crate::config::{any_keyword, AgentConfig};
use crate::oracle::{truncate, Oracle};
use crate::parse::{
    coerce_bool, coerce_id_list, dedupe, first_bool_token, json_bool, json_objects, json_str_any,
    split_identifiers, tagged_line_value, tagged_value,
};
use crate::resolve::{mentions, resolve_character, resolve_polity};
use crate::world::{polity_prefix, ActionDecision, NodeSnapshot, WorldAction, WorldAgent, WorldNode, WorldStore};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use tracing::info;

/// Reason and raw tag of a merger cycle.
pub const POLITY_MERGE: &str = "polity_merge";
/// Raw tag of children updated by a region cascade.
pub const REGION_CHILDREN: &str = "region_children";
/// Raw tag of characters updated because their polity changed.
pub const POLITY_CHECK: &str = "polity_check";
/// Raw tag of characters whose polity was removed.
pub const POLITY_REMOVE: &str = "polity_remove";

/// Snapshot value excerpts shown to the oracle.
const EXCERPT_LIMIT: usize = 240;

lazy_static! {
    static ref MERGE_SEPARATOR: Regex = Regex::new(r"[;,，]+").expect("merge separator regex");
}

/// Runs the consistency passes with the agents of one orchestrator.
pub struct ConsistencyResolver<'a> {
    oracle: &'a Oracle,
    world_agent: &'a WorldAgent,
    character_agent: &'a CharacterAgent,
    config: &'a AgentConfig,
}

impl<'a> ConsistencyResolver<'a> {
    pub fn new(
        oracle: &'a Oracle,
        world_agent: &'a WorldAgent,
        character_agent: &'a CharacterAgent,
        config: &'a AgentConfig,
    ) -> Self {
        Self {
            oracle,
            world_agent,
            character_agent,
            config,
        }
    }

    /// Detect and carry out a merger of two polities.
    ///
    /// `None` when the text is not a merger candidate or the oracle gives
    /// nothing usable. On success the stores reflect the merger and the
    /// returned result replaces the regular cycle.
    pub async fn try_merge(
        &self,
        text: &str,
        world: &mut dyn WorldStore,
        characters: &mut dyn CharacterStore,
    ) -> Result<Option<UpdateResult>, UpdateError> {
        let (keep, remove, reply) = {
            let polities = world.polities();
            if polities.len() < 2 || !is_merge_candidate(text, &polities, &self.config.keywords.merger) {
                return Ok(None);
            }
            let prompt = merge_prompt(text, world, &polities);
            let reply = self.oracle.ask(&prompt, SYSTEM_PROMPT, "GAME_POLITY_MERGE").await?;
            let Some((keep_token, remove_token)) = parse_merge(&reply) else {
                info!("merger declined");
                return Ok(None);
            };
            let keep = resolve_polity(&polities, &keep_token);
            let remove = resolve_polity(&polities, &remove_token);
            match keep.zip(remove) {
                Some((keep, remove)) if keep != remove => (keep, remove, reply),
                _ => {
                    info!(keep = %keep_token, remove = %remove_token, "merger parties unresolved");
                    return Ok(None);
                }
            }
        };

        let keep_node = world.require_node(&keep)?.clone();
        let remove_node = world.require_node(&remove)?.clone();
        let merge_context = self.merge_context(&keep_node, &remove_node);
        let mut result = UpdateResult::new(UpdateDecision::new(true, true, POLITY_MERGE, reply.as_str()));

        let payload = format!(
            "{}\n{}\nRewrite the surviving polity to reflect the merger.",
            text.trim(),
            merge_context
        );
        let node = self.world_agent.update_node(world, &keep, &payload).await?;
        result.push_world(ActionDecision::new(WorldAction::UpdateNode, keep.clone(), reply.as_str()), node);

        let aspects: Vec<(String, String)> = world
            .children(&keep)
            .into_iter()
            .map(|c| (c.id.clone(), c.key.clone()))
            .collect();
        for (aspect_id, aspect_key) in aspects {
            let payload = format!(
                "{}\n{}\nRewrite the polity's {} to reflect the merger.",
                text.trim(),
                merge_context,
                aspect_key
            );
            let node = self.world_agent.update_node(world, &aspect_id, &payload).await?;
            result.push_world(ActionDecision::new(WorldAction::UpdateNode, aspect_id, POLITY_MERGE), node);
        }

        let removed = self.world_agent.remove_polity(world, &remove, None)?;
        result.push_world(
            ActionDecision::new(WorldAction::RemoveNode, remove.clone(), POLITY_MERGE),
            remove_node.clone(),
        );

        let impacted: Vec<(String, Option<String>, Option<String>)> = characters
            .list_records()
            .into_iter()
            .filter(|r| r.polity_id.as_deref().is_some_and(|p| p == keep || p == remove))
            .map(|r| (r.id.clone(), r.region_id.clone(), r.polity_id.clone()))
            .collect();
        for (id, region_id, polity_id) in impacted {
            let moved = polity_id.as_deref() == Some(remove.as_str());
            let affiliation_line = if moved {
                characters.set_affiliation(
                    &id,
                    keep_node.parent_id.clone().or(region_id),
                    Some(keep.clone()),
                )?;
                format!(
                    "Former polity: {} {}; now belongs to: {} {}",
                    remove_node.id, remove_node.key, keep_node.id, keep_node.key
                )
            } else {
                format!(
                    "Polity {} {} absorbed {} {}",
                    keep_node.id, keep_node.key, remove_node.id, remove_node.key
                )
            };
            let payload = format!(
                "{}\n{}\n{}\nUpdate the profile to reflect the merger.",
                text.trim(),
                merge_context,
                affiliation_line
            );
            let record = self.character_agent.update_profile(characters, &id, &payload).await?;
            result.push_character(
                CharacterActionDecision::new(CharacterAction::UpdateCharacter, id, POLITY_MERGE),
                record,
            );
        }

        info!(
            keep = %keep,
            remove = %remove,
            removed = removed.len(),
            characters = result.character_records.len(),
            "polity merge"
        );
        Ok(Some(result))
    }

    fn merge_context(&self, keep: &WorldNode, remove: &WorldNode) -> String {
        let limit = self.config.context_line_limit;
        format!(
            "Polity merger: {} {} joins {} {}\n{}\n{}",
            remove.id,
            remove.key,
            keep.id,
            keep.key,
            world_context_item(keep, limit),
            world_context_item(remove, limit)
        )
    }

    /// Offer to propagate a changed region to its children.
    ///
    /// Considers regions updated this cycle whose key or value differs from
    /// `before`; children already touched are skipped.
    pub async fn cascade_regions(
        &self,
        text: &str,
        before: &BTreeMap<String, NodeSnapshot>,
        world: &mut dyn WorldStore,
        result: &mut UpdateResult,
    ) -> Result<(), UpdateError> {
        let view: &dyn WorldStore = &*world;
        let regions: Vec<String> = dedupe(
            result
                .world_actions
                .iter()
                .filter(|a| a.flag == WorldAction::UpdateNode && view.is_region(&a.target_id))
                .filter(|a| region_changed(view, before.get(&a.target_id), &a.target_id))
                .map(|a| a.target_id.clone()),
        );
        if regions.is_empty() {
            return Ok(());
        }
        let mut touched: HashSet<String> = result.world_actions.iter().map(|a| a.target_id.clone()).collect();

        for region_id in regions {
            let children: Vec<(String, String)> = world
                .children(&region_id)
                .into_iter()
                .map(|c| (c.id.clone(), c.key.clone()))
                .collect();
            if children.is_empty() {
                continue;
            }
            let region = world.require_node(&region_id)?;
            let snapshot = before.get(&region_id);
            let old_key = snapshot.map(|s| s.key.trim()).unwrap_or_default();
            let old_value = snapshot.map(|s| s.value.trim()).unwrap_or_default();
            let child_list = children
                .iter()
                .map(|(id, key)| format!("{id} {key}"))
                .collect::<Vec<_>>()
                .join(", ");
            let prompt = [
                "Task: a region changed; decide whether every child node must change with it.".to_string(),
                "Output one line of JSON:".to_string(),
                "{\"update_children\":true|false,\"reason\":\"...\"}".to_string(),
                format!("Region: {} {}", region.id, region.key),
                format!("Before: {}", or_none(&truncate(old_value, EXCERPT_LIMIT))),
                format!("After: {}", or_none(&truncate(region.value.trim(), EXCERPT_LIMIT))),
                format!("Children: {child_list}"),
                format!("Story update: {}", text.trim()),
            ]
            .join("\n");
            let key_line = if !old_key.is_empty() && old_key != region.key {
                format!("Region changed: {} -> {}", old_key, region.key)
            } else {
                format!("Region: {}", region.key)
            };
            let payload = format!(
                "{}\n{}\nBefore: {}\nAfter: {}\nRewrite this node to follow the region's change.",
                text.trim(),
                key_line,
                or_none(&truncate(old_value, EXCERPT_LIMIT)),
                or_none(&truncate(region.value.trim(), EXCERPT_LIMIT))
            );

            let reply = self.oracle.ask(&prompt, SYSTEM_PROMPT, "GAME_REGION_CHILDREN").await?;
            let (update, reason) = parse_region_children(&reply);
            if !update {
                info!(region = %region_id, reason = %reason, "region cascade skipped");
                continue;
            }

            let mut updated = 0;
            for (child_id, _) in children {
                if !touched.insert(child_id.clone()) {
                    continue;
                }
                let node = self.world_agent.update_node(world, &child_id, &payload).await?;
                result.push_world(ActionDecision::new(WorldAction::UpdateNode, child_id, REGION_CHILDREN), node);
                updated += 1;
            }
            info!(region = %region_id, children = updated, "region cascade");
        }
        Ok(())
    }

    /// Offer profile updates to characters whose polity was updated.
    pub async fn sync_polity_characters(
        &self,
        text: &str,
        world: &dyn WorldStore,
        characters: &mut dyn CharacterStore,
        result: &mut UpdateResult,
    ) -> Result<(), UpdateError> {
        let polity_ids: Vec<String> = dedupe(
            result
                .world_actions
                .iter()
                .filter(|a| a.flag == WorldAction::UpdateNode)
                .filter_map(|a| world.polity_of(&a.target_id))
                .map(|p| p.id.clone()),
        );
        if polity_ids.is_empty() {
            return Ok(());
        }
        let touched = result.character_targets();
        let candidates: Vec<String> = characters
            .affiliated_with(&polity_ids)
            .into_iter()
            .filter(|r| !touched.contains(&r.id))
            .map(|r| r.id.clone())
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }

        let limit = self.config.context_line_limit;
        let polity_lines: Vec<String> = polity_ids
            .iter()
            .filter_map(|id| world.get_node(id))
            .map(|n| format!("- {}", world_context_item(n, limit)))
            .collect();
        let mut lines = vec![
            "Task: these polities just changed; pick the characters whose profiles must change too.".to_string(),
            "Answer with exactly two lines:".to_string(),
            "1) UPDATE=c1,c2 or UPDATE=NONE".to_string(),
            "2) {\"update\":[\"c1\",\"c2\"],\"reason\":\"...\"}".to_string(),
            format!("Story update: {}", text.trim()),
            "Changed polities:".to_string(),
        ];
        lines.extend(polity_lines.iter().cloned());
        lines.push("Candidates:".to_string());
        for id in &candidates {
            if let Some(record) = characters.get_record(id) {
                lines.push(format!(
                    "- {} (polity {})",
                    record.label(),
                    record.polity_id.as_deref().unwrap_or("none")
                ));
            }
        }
        let reply = self
            .oracle
            .ask(&lines.join("\n"), SYSTEM_PROMPT, "GAME_POLITY_CHARACTERS")
            .await?;

        let chosen: Vec<String> = dedupe(
            parse_update_list(&reply)
                .iter()
                .filter_map(|token| resolve_character(&*characters, token))
                .filter(|id| candidates.contains(id)),
        );
        if chosen.is_empty() {
            info!(candidates = candidates.len(), "polity character sync: none chosen");
            return Ok(());
        }

        let payload = format!(
            "{}\nPolity changes:\n{}\nUpdate the profile where the polity change affects this character.",
            text.trim(),
            polity_lines.join("\n")
        );
        for id in &chosen {
            let record = self.character_agent.update_profile(characters, id, &payload).await?;
            result.push_character(
                CharacterActionDecision::new(CharacterAction::UpdateCharacter, id.clone(), POLITY_CHECK),
                record,
            );
        }
        info!(updated = chosen.len(), "polity character sync");
        Ok(())
    }

    /// Detach characters from polities removed this cycle.
    ///
    /// The polity pointer is cleared (the region pointer too when that region
    /// is gone). Characters not already updated get a profile rewrite.
    pub async fn sync_removed_polities(
        &self,
        text: &str,
        world: &dyn WorldStore,
        characters: &mut dyn CharacterStore,
        result: &mut UpdateResult,
    ) -> Result<(), UpdateError> {
        let removed: Vec<String> = result
            .world_actions
            .iter()
            .filter(|a| a.flag == WorldAction::RemoveNode)
            .map(|a| a.target_id.clone())
            .collect();
        if removed.is_empty() {
            return Ok(());
        }

        let orphans: Vec<(String, String, Option<String>)> = characters
            .list_records()
            .into_iter()
            .filter_map(|r| {
                let polity = r.polity_id.as_deref()?;
                let dangling = world.get_node(polity).is_none()
                    && removed.iter().any(|target| removes_polity(target, polity));
                dangling.then(|| (r.id.clone(), polity.to_string(), r.region_id.clone()))
            })
            .collect();
        if orphans.is_empty() {
            return Ok(());
        }

        let touched = result.character_targets();
        for (id, polity, region_id) in orphans {
            let region_id = region_id.filter(|r| world.get_node(r).is_some());
            let mut record = characters.set_affiliation(&id, region_id, None)?;
            if !touched.contains(&id) {
                let label = result
                    .world_nodes
                    .iter()
                    .find(|n| n.id == polity)
                    .map_or_else(|| polity.clone(), |n| format!("{} {}", n.id, n.key));
                let payload = format!(
                    "{}\nPolity dissolved: {}\nThe character no longer belongs to it. Update the profile accordingly.",
                    text.trim(),
                    label
                );
                record = self.character_agent.update_profile(characters, &id, &payload).await?;
            }
            result.push_character(
                CharacterActionDecision::new(CharacterAction::UpdateCharacter, id, POLITY_REMOVE),
                record,
            );
        }
        Ok(())
    }
}

/// A merger needs a merger keyword and two distinct polities named by id or
/// key.
fn is_merge_candidate(text: &str, polities: &[&WorldNode], keywords: &[String]) -> bool {
    let text = text.trim();
    if text.is_empty() || !any_keyword(text, keywords) {
        return false;
    }
    polities
        .iter()
        .filter(|n| mentions(text, &n.id) || mentions(text, &n.key))
        .take(2)
        .count()
        == 2
}

fn merge_prompt(text: &str, world: &dyn WorldStore, polities: &[&WorldNode]) -> String {
    let mut lines = vec![
        "Task: decide whether the story update merges two polities, and which one survives.".to_string(),
        "Choose only from the polities listed. If it is not a merger, answer NONE.".to_string(),
        "Answer with exactly two lines:".to_string(),
        "1) MERGE=KEEP_ID; REMOVE_ID or MERGE=NONE".to_string(),
        "2) {\"keep\":\"ID\",\"remove\":\"ID\",\"reason\":\"...\"} or {\"merge\":false,\"reason\":\"...\"}".to_string(),
        format!("Story update: {}", text.trim()),
        "Polities:".to_string(),
    ];
    for node in polities {
        match world.parent(&node.id) {
            Some(region) if !region.key.trim().is_empty() => {
                lines.push(format!("- {} {} (region: {})", node.id, node.key, region.key.trim()))
            }
            _ => lines.push(format!("- {} {}", node.id, node.key)),
        }
    }
    lines.join("\n")
}

fn is_none_token(token: &str) -> bool {
    matches!(token.trim().to_ascii_uppercase().as_str(), "" | "NONE" | "NO" | "无")
}

/// `(keep, remove)` tokens, or `None` when the reply declines or is unusable.
fn parse_merge(reply: &str) -> Option<(String, String)> {
    for obj in json_objects(reply) {
        if obj.get("merge").and_then(coerce_bool) == Some(false) {
            return None;
        }
        let keep = json_str_any(&obj, &["keep", "keep_id", "target"]);
        let remove = json_str_any(&obj, &["remove", "remove_id", "source"]);
        let keep = if is_none_token(&keep) { String::new() } else { keep };
        let remove = if is_none_token(&remove) { String::new() } else { remove };
        if keep.is_empty() && remove.is_empty() {
            continue;
        }
        return (!keep.is_empty() && !remove.is_empty()).then_some((keep, remove));
    }

    let raw = tagged_line_value(reply, "MERGE")?;
    if is_none_token(&raw) {
        return None;
    }
    let mut parts = MERGE_SEPARATOR
        .split(&raw)
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let keep = parts.next()?.to_string();
    let remove = parts.next()?.to_string();
    Some((keep, remove))
}

fn region_changed(world: &dyn WorldStore, before: Option<&NodeSnapshot>, id: &str) -> bool {
    let (Some(before), Some(node)) = (before, world.get_node(id)) else {
        return true;
    };
    before.key.trim() != node.key.trim() || before.value.trim() != node.value.trim()
}

/// `{"update_children":..}` first, then any boolean token; default no.
fn parse_region_children(reply: &str) -> (bool, String) {
    if let Some(found) = json_bool(reply, "update_children") {
        return found;
    }
    (first_bool_token(reply).unwrap_or(false), String::new())
}

/// Character tokens from `{"update":[..]}`, then `UPDATE=..`.
fn parse_update_list(reply: &str) -> Vec<String> {
    if let Some(ids) = json_objects(reply)
        .iter()
        .find(|obj| obj.contains_key("update"))
        .map(|obj| coerce_id_list(obj.get("update")))
    {
        return ids;
    }
    tagged_value(reply, "UPDATE")
        .map(|raw| split_identifiers(&raw))
        .unwrap_or_default()
}

/// Whether removing `target` takes `polity` with it.
fn removes_polity(target: &str, polity: &str) -> bool {
    polity_prefix(target).as_deref() == Some(polity)
        || polity.strip_prefix(target).is_some_and(|rest| rest.starts_with('.'))
}

fn or_none(text: &str) -> &str {
    if text.is_empty() {
        "none"
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_roster, sample_world, ScriptedOracle};

    #[test]
    fn test_parse_merge() {
        assert_eq!(
            parse_merge("MERGE=micro.r1.p1; micro.r1.p2"),
            Some(("micro.r1.p1".into(), "micro.r1.p2".into()))
        );
        assert_eq!(
            parse_merge("MERGE=NONE\n{\"keep_id\":\"Frost Crown\",\"source\":\"Ember League\"}"),
            Some(("Frost Crown".into(), "Ember League".into()))
        );
        assert_eq!(parse_merge("{\"merge\": false, \"reason\": \"trade pact\"}\nMERGE=a;b"), None);
        assert_eq!(parse_merge("MERGE=NONE"), None);
        assert_eq!(parse_merge("MERGE=micro.r1.p1"), None);
        assert_eq!(parse_merge("I am not sure."), None);
    }

    #[test]
    fn test_merge_candidate_needs_two_polities_and_keyword() {
        let world = sample_world();
        let polities = world.polities();
        let keywords = AgentConfig::default().keywords.merger;
        assert!(is_merge_candidate("The Frost Crown annexes the Ember League.", &polities, &keywords));
        assert!(!is_merge_candidate("The Frost Crown annexes the hills.", &polities, &keywords));
        assert!(!is_merge_candidate("The Frost Crown trades with the Ember League.", &polities, &keywords));
    }

    #[test]
    fn test_region_children_parse() {
        assert_eq!(
            parse_region_children("{\"update_children\": \"yes\", \"reason\": \"famine\"}"),
            (true, "famine".into())
        );
        assert!(parse_region_children("Yes, every polity suffers.").0);
        assert!(!parse_region_children("hard to say").0);
    }

    #[test]
    fn test_removes_polity() {
        assert!(removes_polity("micro.r1.p2", "micro.r1.p2"));
        assert!(removes_polity("micro.r1", "micro.r1.p2"));
        assert!(!removes_polity("micro.r1.p1", "micro.r1.p12"));
        assert!(!removes_polity("micro.r2", "micro.r1.p2"));
    }

    #[tokio::test]
    async fn test_merge_moves_characters_and_removes_polity() {
        let oracle = ScriptedOracle::new();
        oracle.push("GAME_POLITY_MERGE", "MERGE=micro.r1.p1; Ember League");
        oracle.push_default("Rewritten after the merger.");
        let handle = oracle.handle();
        let world_agent = WorldAgent::new(handle.clone());
        let character_agent = CharacterAgent::new(handle.clone());
        let config = AgentConfig::default();
        let resolver = ConsistencyResolver::new(&handle, &world_agent, &character_agent, &config);

        let mut world = sample_world();
        let mut roster = sample_roster();
        let result = resolver
            .try_merge("The Frost Crown annexes the Ember League.", &mut world, &mut roster)
            .await
            .unwrap()
            .expect("merger");

        assert_eq!(result.decision.reason, POLITY_MERGE);
        assert!(world.get_node("micro.r1.p2").is_none());
        assert_eq!(roster.get_record("c2").unwrap().polity_id.as_deref(), Some("micro.r1.p1"));
        assert_eq!(roster.get_record("c3").unwrap().polity_id.as_deref(), Some("micro.r2.p1"));

        let flags: Vec<(WorldAction, &str)> = result
            .world_actions
            .iter()
            .map(|a| (a.flag, a.target_id.as_str()))
            .collect();
        assert_eq!(flags[0], (WorldAction::UpdateNode, "micro.r1.p1"));
        assert_eq!(flags.len(), 1 + 7 + 1);
        assert_eq!(flags[8], (WorldAction::RemoveNode, "micro.r1.p2"));
        let updated: Vec<&str> = result.character_actions.iter().map(|a| a.target_id.as_str()).collect();
        assert_eq!(updated, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_merge_declined_changes_nothing() {
        let oracle = ScriptedOracle::new();
        oracle.push("GAME_POLITY_MERGE", "{\"merge\": false}");
        let handle = oracle.handle();
        let world_agent = WorldAgent::new(handle.clone());
        let character_agent = CharacterAgent::new(handle.clone());
        let config = AgentConfig::default();
        let resolver = ConsistencyResolver::new(&handle, &world_agent, &character_agent, &config);

        let mut world = sample_world();
        let mut roster = sample_roster();
        let before = world.len();
        let merged = resolver
            .try_merge("The Frost Crown annexes the Ember League.", &mut world, &mut roster)
            .await
            .unwrap();
        assert!(merged.is_none());
        assert_eq!(world.len(), before);
        assert_eq!(oracle.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_removed_polity_clears_pointer() {
        let oracle = ScriptedOracle::new();
        oracle.push_default("{\"name\": \"Bram\", \"summary\": \"A smith without a league.\"}");
        let handle = oracle.handle();
        let world_agent = WorldAgent::new(handle.clone());
        let character_agent = CharacterAgent::new(handle.clone());
        let config = AgentConfig::default();
        let resolver = ConsistencyResolver::new(&handle, &world_agent, &character_agent, &config);

        let mut world = sample_world();
        let mut roster = sample_roster();
        let node = world.get_node("micro.r1.p2").unwrap().clone();
        world.remove_subtree("micro.r1.p2").unwrap();
        let mut result = UpdateResult::new(UpdateDecision::new(true, false, "", ""));
        result.push_world(ActionDecision::new(WorldAction::RemoveNode, "micro.r1.p2", ""), node);

        resolver
            .sync_removed_polities("The Ember League dissolves.", &world, &mut roster, &mut result)
            .await
            .unwrap();

        let bram = roster.get_record("c2").unwrap();
        assert_eq!(bram.polity_id, None);
        assert_eq!(bram.region_id.as_deref(), Some("micro.r1"));
        assert_eq!(result.character_actions.len(), 1);
        assert_eq!(result.character_actions[0].raw, POLITY_REMOVE);
        assert!(oracle.calls()[0].prompt.contains("Polity dissolved: micro.r1.p2 Ember League"));
    }
}
