//! Oracle-driven world tree mutations.

use super::node::{is_root_id, WorldNode, MICRO_ROOT, POLITY_ASPECTS};
use super::store::{WorldError, WorldStore};
use crate::config::keyword_matches;
use crate::oracle::{compact, truncate, Oracle};
use crate::parse::{
    dedupe, json_array_objects, json_objects, json_str_any, split_identifiers, tagged_lines,
};
use crate::resolve::{mentioned_nodes, resolve_world};
use crate::NO_RELEVANT_INFO;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are a precise world-building assistant. \
Follow formatting instructions exactly and avoid extra commentary.";

/// Characters kept from an inferred node title.
const INFERRED_KEY_LEN: usize = 30;

lazy_static! {
    static ref KEY_LINE: Regex = Regex::new(r"^\s*<\|KEY\|>\s*[:：]?\s*(.*)$").expect("key line regex");
    static ref VALUE_LINE: Regex =
        Regex::new(r"^\s*<\|VALUE\|>\s*[:：]?\s*(.*)$").expect("value line regex");
    static ref KEY_HINT: Regex =
        Regex::new(r"(?i)(?:name|key|title|名称)\s*[:：]\s*([^\n]+)").expect("key hint regex");
    static ref PREFIXED_KEY: Regex = Regex::new(r"^([A-Za-z_]+)(\d+)$").expect("prefixed key regex");
}

/// A world mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorldAction {
    /// Create a child under the target.
    AddNode,
    /// Rewrite the target's content.
    UpdateNode,
    /// Remove the target and its subtree.
    RemoveNode,
}

impl WorldAction {
    pub const ALL: [WorldAction; 3] = [Self::AddNode, Self::UpdateNode, Self::RemoveNode];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddNode => "ADD_NODE",
            Self::UpdateNode => "UPDATE_NODE",
            Self::RemoveNode => "REMOVE_NODE",
        }
    }

    /// Accepts `ADD_NODE`, `<|ADD_NODE|>` and bare `add` forms.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim().trim_start_matches("<|").trim_end_matches("|>");
        match token.to_ascii_uppercase().as_str() {
            "ADD_NODE" | "ADD" => Some(Self::AddNode),
            "UPDATE_NODE" | "UPDATE" => Some(Self::UpdateNode),
            "REMOVE_NODE" | "REMOVE" | "DELETE" => Some(Self::RemoveNode),
            _ => None,
        }
    }
}

impl fmt::Display for WorldAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One proposed world mutation.
///
/// ADD targets the parent; UPDATE and REMOVE target the node itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDecision {
    pub flag: WorldAction,
    pub target_id: String,
    /// Oracle reply (or a tag such as `heuristic`) the action came from.
    pub raw: String,
}

impl ActionDecision {
    pub fn new(flag: WorldAction, target_id: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            flag,
            target_id: target_id.into(),
            raw: raw.into(),
        }
    }
}

/// Agent that turns story text into world tree mutations.
#[derive(Debug, Clone)]
pub struct WorldAgent {
    oracle: Oracle,
}

impl WorldAgent {
    pub fn new(oracle: Oracle) -> Self {
        Self { oracle }
    }

    /// Content of the node most relevant to `query`, or the no-information
    /// sentinel.
    pub async fn extract_info(&self, world: &dyn WorldStore, query: &str) -> Result<String, WorldError> {
        let mut lines = vec![
            "Task: pick the node most relevant to the query.".to_string(),
            "Output only the node id, nothing else.".to_string(),
            format!("If nothing is relevant, output exactly: {NO_RELEVANT_INFO}"),
            format!("Query: {}", query.trim()),
            "Available nodes:".to_string(),
        ];
        lines.extend(world.list_nodes().iter().map(|n| format!("- {} {}", n.id, n.key)));

        let reply = self
            .oracle
            .ask(&lines.join("\n"), SYSTEM_PROMPT, "WORLD_EXTRACT")
            .await?;
        let Some(id) = pick_identifier(&reply, world.list_nodes().iter().map(|n| n.id.as_str())) else {
            info!(query_len = query.len(), "world extract miss");
            return Ok(NO_RELEVANT_INFO.to_string());
        };
        match world.get_node(&id) {
            Some(node) if !node.value.trim().is_empty() => {
                info!(id = %id, value_len = node.value.len(), "world extract hit");
                Ok(node.value.clone())
            }
            _ => Ok(NO_RELEVANT_INFO.to_string()),
        }
    }

    /// Ask for exactly one action. An unresolvable target is an error.
    pub async fn decide_action(&self, world: &dyn WorldStore, text: &str) -> Result<ActionDecision, WorldError> {
        let prompt = format!(
            "Task: decide whether to add a node or update one.\n\
             Answer with exactly two lines:\n\
             1) <|ADD_NODE|>:INDEX or <|UPDATE_NODE|>:INDEX\n\
             2) {{\"action\":\"ADD_NODE\"|\"UPDATE_NODE\",\"index\":\"INDEX\"}}\n\
             INDEX must be an existing node id.\n\
             Story update: {}\n\
             Available nodes:\n{}",
            text.trim(),
            node_listing(world)
        );
        let reply = self.oracle.ask(&prompt, SYSTEM_PROMPT, "WORLD_DECIDE").await?;

        let (flag, token) = parse_proposals(&reply)
            .into_iter()
            .next()
            .ok_or_else(|| WorldError::Parse(truncate(&reply, 200)))?;
        let target = resolve_world(world, &token).ok_or(WorldError::NodeNotFound(token))?;
        info!(flag = %flag, target = %target, "world decide_action");
        Ok(ActionDecision::new(flag, target, reply))
    }

    /// Ask for every action the text implies, resolved, deduplicated and
    /// capped. Falls back to updating nodes whose key the text mentions.
    pub async fn collect_actions(
        &self,
        world: &dyn WorldStore,
        text: &str,
        cap: usize,
    ) -> Result<Vec<ActionDecision>, WorldError> {
        let prompt = format!(
            "Task: list every world tree change the story update requires (at most {cap}).\n\
             Prefer micro.* nodes for concrete regions, polities and cities; macro nodes only for world laws and themes.\n\
             Answer with both encodings:\n\
             1) one line per action: <|ADD_NODE|>:PARENT_ID, <|UPDATE_NODE|>:ID1,ID2 or <|REMOVE_NODE|>:ID\n\
             2) a JSON array: [{{\"action\":\"UPDATE_NODE\",\"index\":\"ID\"}}]\n\
             If nothing needs to change output <|UPDATE_NODE|>:NONE and [].\n\
             Story update: {}\n\
             Available nodes:\n{}",
            text.trim(),
            node_listing(world)
        );
        let reply = self.oracle.ask(&prompt, SYSTEM_PROMPT, "WORLD_COLLECT").await?;

        let mut seen = HashSet::new();
        let mut proposed = Vec::new();
        for (flag, token) in parse_proposals(&reply) {
            let Some(target) = resolve_world(world, &token) else {
                continue;
            };
            if flag != WorldAction::AddNode && is_root_id(&target) {
                continue;
            }
            if seen.insert((flag, target.clone())) {
                proposed.push(ActionDecision::new(flag, target, reply.clone()));
            }
        }
        let mut actions = drop_removed_targets(world, proposed);
        actions.truncate(cap);

        if actions.is_empty() {
            actions = mentioned_nodes(world, text)
                .into_iter()
                .take(cap)
                .map(|node| ActionDecision::new(WorldAction::UpdateNode, node.id.clone(), "heuristic"))
                .collect();
        }
        info!(count = actions.len(), cap, "world collect_actions");
        Ok(actions)
    }

    /// Apply one action and return the affected node (for REMOVE, the node as
    /// it was before removal).
    pub async fn apply_action(
        &self,
        world: &mut dyn WorldStore,
        action: &ActionDecision,
        text: &str,
    ) -> Result<WorldNode, WorldError> {
        let node = match action.flag {
            WorldAction::AddNode => self.add_node(world, &action.target_id, text).await?,
            WorldAction::UpdateNode => self.update_node(world, &action.target_id, text).await?,
            WorldAction::RemoveNode => {
                let node = world.require_node(&action.target_id)?.clone();
                let removed = world.remove_subtree(&node.id)?;
                info!(id = %node.id, removed = removed.len(), "world remove");
                node
            }
        };
        Ok(node)
    }

    /// Apply actions in order and return the applied ones with their nodes.
    /// An action whose target an earlier removal took away is skipped.
    pub async fn apply_actions(
        &self,
        world: &mut dyn WorldStore,
        actions: Vec<ActionDecision>,
        text: &str,
    ) -> Result<(Vec<ActionDecision>, Vec<WorldNode>), WorldError> {
        let mut applied = Vec::with_capacity(actions.len());
        let mut nodes = Vec::with_capacity(actions.len());
        for action in actions {
            if world.get_node(&action.target_id).is_none() {
                warn!(flag = %action.flag, target = %action.target_id, "world target gone, skipping");
                continue;
            }
            nodes.push(self.apply_action(world, &action, text).await?);
            applied.push(action);
        }
        Ok((applied, nodes))
    }

    /// Rewrite a node's content from `context`. An empty reply keeps the old
    /// content.
    pub async fn update_node(
        &self,
        world: &mut dyn WorldStore,
        id: &str,
        context: &str,
    ) -> Result<WorldNode, WorldError> {
        let node = world.require_node(id)?;
        let original = if node.value.trim().is_empty() { "none" } else { node.value.trim() };
        let prompt = format!(
            "Task: rewrite the node content using the story update.\n\
             Output only the new content, no explanation.\n\
             Node: {} {}\n\
             Story update: {}\n\
             Current content: {}",
            node.id,
            node.key,
            context.trim(),
            original
        );
        let reply = self.oracle.ask(&prompt, SYSTEM_PROMPT, "UPDATE_NODE").await?;
        let content = reply.trim();
        if content.is_empty() {
            warn!(id, "empty node rewrite, keeping previous content");
        } else {
            world.update_content(id, content)?;
        }
        info!(id, "world update");
        Ok(world.require_node(id)?.clone())
    }

    async fn add_node(
        &self,
        world: &mut dyn WorldStore,
        parent_id: &str,
        text: &str,
    ) -> Result<WorldNode, WorldError> {
        let parent = world.require_node(parent_id)?;
        let siblings: Vec<&str> = world.children(parent_id).iter().map(|c| c.key.as_str()).collect();
        let prompt = format!(
            "Task: write a new child node.\n\
             Output exactly two lines:\n\
             <|KEY|>:node title\n\
             <|VALUE|>:node content\n\
             Parent: {} {}\n\
             Parent content: {}\n\
             Existing children: {}\n\
             Story update: {}",
            parent.id,
            parent.key,
            if parent.value.trim().is_empty() { "none" } else { parent.value.trim() },
            if siblings.is_empty() { "none".to_string() } else { siblings.join(", ") },
            text.trim()
        );
        let reply = self.oracle.ask(&prompt, SYSTEM_PROMPT, "ADD_NODE").await?;
        let (title, content) = parse_key_and_value(&reply, text);

        let node = if world.is_region(parent_id) {
            self.add_polity(world, parent_id, &title)?
        } else {
            let child_key = choose_child_key(world, parent_id);
            world.add_child(parent_id, &child_key, &title)?
        };
        world.update_content(&node.id, &content)?;
        info!(parent = parent_id, child = %node.id, "world add");
        Ok(world.require_node(&node.id)?.clone())
    }

    /// Create a polity `pN` under a region, with the standard aspect children.
    pub fn add_polity(
        &self,
        world: &mut dyn WorldStore,
        region: &str,
        name: &str,
    ) -> Result<WorldNode, WorldError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WorldError::Invalid("polity name is required".to_string()));
        }
        let region_id = resolve_region(world, region)?;
        let key = increment_key("p1", &child_keys(world, &region_id));
        let polity = world.add_child(&region_id, &key, name)?;
        for (aspect, title) in POLITY_ASPECTS {
            world.add_child(&polity.id, aspect, title)?;
        }
        info!(region = %region_id, polity = %polity.id, "add polity");
        Ok(world.require_node(&polity.id)?.clone())
    }

    /// Remove a polity named by id, or by key within `region` (or any region).
    pub fn remove_polity(
        &self,
        world: &mut dyn WorldStore,
        polity: &str,
        region: Option<&str>,
    ) -> Result<Vec<String>, WorldError> {
        let polity_id = resolve_polity_id(world, polity, region)?;
        if !world.is_polity(&polity_id) {
            return Err(WorldError::Invalid(format!("{polity_id} is not a polity")));
        }
        let removed = world.remove_subtree(&polity_id)?;
        info!(polity = %polity_id, removed = removed.len(), "remove polity");
        Ok(removed)
    }
}

fn node_listing(world: &dyn WorldStore) -> String {
    world
        .nodes_prefer_micro()
        .iter()
        .map(|n| format!("- {} {}", n.id, n.key))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `(flag, target token)` pairs from tag lines, then JSON, in reply order.
fn parse_proposals(reply: &str) -> Vec<(WorldAction, String)> {
    let tags: Vec<&str> = WorldAction::ALL.iter().map(|a| a.as_str()).collect();
    let mut proposals = Vec::new();
    for line in tagged_lines(reply, &tags) {
        let Some(flag) = WorldAction::parse(&line.tag) else {
            continue;
        };
        for token in split_identifiers(&line.value) {
            proposals.push((flag, token));
        }
    }

    let objects = dedupe(json_array_objects(reply).into_iter().chain(json_objects(reply)));
    for obj in objects {
        let Some(flag) = WorldAction::parse(&json_str_any(&obj, &["action", "flag"])) else {
            continue;
        };
        let target = json_str_any(&obj, &["index", "id", "target"]);
        if !target.is_empty() {
            proposals.push((flag, target));
        }
    }
    proposals
}

/// Drop every action aimed at a node that an earlier REMOVE_NODE in the
/// batch deletes, the removed node's subtree included.
pub fn drop_removed_targets(world: &dyn WorldStore, actions: Vec<ActionDecision>) -> Vec<ActionDecision> {
    let mut removed: Vec<String> = Vec::new();
    let mut kept = Vec::with_capacity(actions.len());
    for action in actions {
        if removed.iter().any(|gone| world.within(&action.target_id, gone)) {
            warn!(flag = %action.flag, target = %action.target_id, "dropping action under a removed node");
            continue;
        }
        if action.flag == WorldAction::RemoveNode {
            removed.push(action.target_id.clone());
        }
        kept.push(action);
    }
    kept
}

/// The node id a free-form extract reply names: exact, else the longest id
/// contained in the reply.
pub(crate) fn pick_identifier<'a>(reply: &str, ids: impl Iterator<Item = &'a str>) -> Option<String> {
    let cleaned = reply.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if cleaned.is_empty()
        || keyword_matches(cleaned, NO_RELEVANT_INFO)
        || matches!(cleaned, "无相关信息" | "无" | "NONE" | "none")
    {
        return None;
    }
    let ids: Vec<&str> = ids.collect();
    if ids.contains(&cleaned) {
        return Some(cleaned.to_string());
    }
    ids.into_iter()
        .filter(|id| !id.is_empty() && cleaned.contains(id))
        .max_by_key(|id| id.len())
        .map(str::to_string)
}

/// Title and content from a `<|KEY|>` / `<|VALUE|>` reply.
///
/// Content runs from the VALUE line to the end; without one the whole reply is
/// the content. A missing title is inferred from the story text.
fn parse_key_and_value(reply: &str, text: &str) -> (String, String) {
    let mut key: Option<String> = None;
    let mut content: Vec<String> = Vec::new();
    let mut capturing = false;

    for line in reply.lines() {
        if key.is_none() {
            if let Some(caps) = KEY_LINE.captures(line) {
                key = Some(caps[1].trim().to_string());
                continue;
            }
        }
        if let Some(caps) = VALUE_LINE.captures(line) {
            capturing = true;
            content.push(caps[1].trim().to_string());
            continue;
        }
        if capturing {
            content.push(line.trim().to_string());
        }
    }

    let mut content = content
        .into_iter()
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if content.is_empty() {
        content = reply.trim().to_string();
    }
    let key = key.filter(|k| !k.is_empty()).unwrap_or_else(|| infer_key(text));
    (key, content)
}

fn infer_key(text: &str) -> String {
    let hint = KEY_HINT
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .or_else(|| text.trim().lines().next().map(|l| l.trim().to_string()))
        .filter(|h| !h.is_empty());
    match hint {
        Some(hint) => hint.chars().take(INFERRED_KEY_LEN).collect(),
        None => "New node".to_string(),
    }
}

/// Last id segment of every child of `parent_id`.
fn child_keys(world: &dyn WorldStore, parent_id: &str) -> HashSet<String> {
    world
        .children(parent_id)
        .iter()
        .filter_map(|c| c.id.rsplit('.').next())
        .map(str::to_string)
        .collect()
}

/// Pick the next child key: numeric siblings continue the count, prefixed
/// siblings (`r1`, `r2`) continue their dominant prefix, anything else gets
/// `new1`.
fn choose_child_key(world: &dyn WorldStore, parent_id: &str) -> String {
    let existing = child_keys(world, parent_id);
    if existing.is_empty() {
        return "1".to_string();
    }

    if let Some(max) = existing.iter().filter_map(|k| k.parse::<u64>().ok()).max() {
        return increment_key(&(max + 1).to_string(), &existing);
    }

    // prefix -> (count, max number)
    let mut prefixes: Vec<(String, usize, u64)> = Vec::new();
    for key in &existing {
        let Some(caps) = PREFIXED_KEY.captures(key) else {
            continue;
        };
        let Ok(number) = caps[2].parse::<u64>() else {
            continue;
        };
        match prefixes.iter_mut().find(|(p, _, _)| p == &caps[1]) {
            Some(entry) => {
                entry.1 += 1;
                entry.2 = entry.2.max(number);
            }
            None => prefixes.push((caps[1].to_string(), 1, number)),
        }
    }
    prefixes.sort_by(|a, b| a.0.cmp(&b.0));

    match prefixes.iter().max_by_key(|(_, count, max)| (*count, *max)) {
        Some((prefix, _, max)) => increment_key(&format!("{prefix}{}", max + 1), &existing),
        None => increment_key("new1", &existing),
    }
}

/// Bump `base` until it is not in `existing`.
fn increment_key(base: &str, existing: &HashSet<String>) -> String {
    if let Ok(mut number) = base.parse::<u64>() {
        while existing.contains(&number.to_string()) {
            number += 1;
        }
        return number.to_string();
    }

    if let Some(caps) = PREFIXED_KEY.captures(base) {
        if let Ok(mut counter) = caps[2].parse::<u64>() {
            let prefix = &caps[1];
            while existing.contains(&format!("{prefix}{counter}")) {
                counter += 1;
            }
            return format!("{prefix}{counter}");
        }
    }

    let mut candidate = base.to_string();
    let mut counter = 1;
    while existing.contains(&candidate) {
        candidate = format!("{base}{counter}");
        counter += 1;
    }
    candidate
}

fn resolve_region(world: &dyn WorldStore, region: &str) -> Result<String, WorldError> {
    let region = region.trim();
    let id = if world.get_node(region).is_some() {
        region.to_string()
    } else {
        world
            .children(MICRO_ROOT)
            .iter()
            .find(|r| r.key.trim() == region)
            .map(|r| r.id.clone())
            .ok_or_else(|| WorldError::NodeNotFound(region.to_string()))?
    };
    if !world.is_region(&id) {
        return Err(WorldError::Invalid(format!("{id} is not a region")));
    }
    Ok(id)
}

fn resolve_polity_id(
    world: &dyn WorldStore,
    polity: &str,
    region: Option<&str>,
) -> Result<String, WorldError> {
    let name = polity.trim();
    if world.get_node(name).is_some() {
        return Ok(name.to_string());
    }
    if name.is_empty() {
        return Err(WorldError::Invalid("polity identifier is required".to_string()));
    }

    let regions = match region {
        Some(region) => vec![resolve_region(world, region)?],
        None => world.children(MICRO_ROOT).iter().map(|r| r.id.clone()).collect(),
    };
    let matches: Vec<String> = regions
        .iter()
        .flat_map(|r| world.children(r))
        .filter(|p| p.key.trim() == name)
        .map(|p| p.id.clone())
        .collect();
    match matches.as_slice() {
        [only] => Ok(only.clone()),
        [] => Err(WorldError::NodeNotFound(name.to_string())),
        _ => Err(WorldError::Invalid(format!(
            "several polities are named {name}; give a region"
        ))),
    }
}

/// Short `FLAG target label` line used in validation prompts.
pub fn describe_action(world: &dyn WorldStore, action: &ActionDecision) -> String {
    let label = world
        .get_node(&action.target_id)
        .map(|n| n.key.clone())
        .unwrap_or_default();
    compact(&format!("- {} {} {}", action.flag, action.target_id, label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_world, ScriptedOracle};
    use crate::world::WorldTree;
    use pretty_assertions::assert_eq;

    fn agent(oracle: &ScriptedOracle) -> WorldAgent {
        WorldAgent::new(oracle.handle())
    }

    #[test]
    fn test_world_action_parse() {
        assert_eq!(WorldAction::parse("<|ADD_NODE|>"), Some(WorldAction::AddNode));
        assert_eq!(WorldAction::parse("update_node"), Some(WorldAction::UpdateNode));
        assert_eq!(WorldAction::parse("remove"), Some(WorldAction::RemoveNode));
        assert_eq!(WorldAction::parse("rename"), None);
        assert_eq!(
            serde_json::to_string(&WorldAction::RemoveNode).unwrap(),
            "\"REMOVE_NODE\""
        );
    }

    #[test]
    fn test_choose_child_key() {
        let mut world = WorldTree::new();
        assert_eq!(choose_child_key(&world, "macro"), "1");
        world.add_child("macro", "1", "Magic").unwrap();
        world.add_child("macro", "3", "Faith").unwrap();
        assert_eq!(choose_child_key(&world, "macro"), "4");

        world.add_child("micro", "r1", "North").unwrap();
        world.add_child("micro", "r2", "South").unwrap();
        world.add_child("micro", "x9", "Odd").unwrap();
        assert_eq!(choose_child_key(&world, "micro"), "r3");

        world.add_child("micro.r1", "capital", "Capital").unwrap();
        assert_eq!(choose_child_key(&world, "micro.r1"), "new1");
    }

    #[test]
    fn test_increment_key() {
        let existing: HashSet<String> = ["p1", "p2", "new1"].iter().map(|s| s.to_string()).collect();
        assert_eq!(increment_key("p1", &existing), "p3");
        assert_eq!(increment_key("new1", &existing), "new2");
        assert_eq!(increment_key("harbor", &existing), "harbor");
    }

    #[test]
    fn test_parse_key_and_value() {
        let (key, value) = parse_key_and_value("<|KEY|>: Salt Road\n<|VALUE|>: A trade route\nthrough dunes", "x");
        assert_eq!(key, "Salt Road");
        assert_eq!(value, "A trade route\nthrough dunes");

        let (key, value) = parse_key_and_value("Only prose here", "name: Glass Tower\nmore");
        assert_eq!(key, "Glass Tower");
        assert_eq!(value, "Only prose here");

        let long = "A very long first line that keeps going past thirty characters";
        let (key, _) = parse_key_and_value("", long);
        assert_eq!(key.chars().count(), 30);
    }

    #[test]
    fn test_pick_identifier() {
        let ids = ["micro.r1", "micro.r1.p1", "1"];
        assert_eq!(pick_identifier("micro.r1.p1", ids.iter().copied()).as_deref(), Some("micro.r1.p1"));
        assert_eq!(
            pick_identifier("I think micro.r1.p1 fits", ids.iter().copied()).as_deref(),
            Some("micro.r1.p1")
        );
        assert_eq!(pick_identifier("no relevant information", ids.iter().copied()), None);
        assert_eq!(pick_identifier("无相关信息", ids.iter().copied()), None);
    }

    #[tokio::test]
    async fn test_collect_actions_merges_tags_and_json() {
        let world = sample_world();
        let oracle = ScriptedOracle::new();
        oracle.push(
            "WORLD_COLLECT",
            "<|UPDATE_NODE|>:micro.r1.p1, micro.r1.p2\n<|REMOVE_NODE|>:micro.r9\n\
             [{\"action\":\"UPDATE_NODE\",\"index\":\"micro.r1.p1\"},{\"action\":\"ADD_NODE\",\"index\":\"micro.r2\"}]",
        );
        let actions = agent(&oracle).collect_actions(&world, "war", 3).await.unwrap();
        let pairs: Vec<(WorldAction, &str)> =
            actions.iter().map(|a| (a.flag, a.target_id.as_str())).collect();
        assert_eq!(
            pairs,
            vec![
                (WorldAction::UpdateNode, "micro.r1.p1"),
                (WorldAction::UpdateNode, "micro.r1.p2"),
                (WorldAction::AddNode, "micro.r2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_collect_actions_heuristic_fallback() {
        let world = sample_world();
        let oracle = ScriptedOracle::new();
        oracle.push("WORLD_COLLECT", "I am not sure.");
        let actions = agent(&oracle)
            .collect_actions(&world, "Snow buries the Frost Crown.", 3)
            .await
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].target_id, "micro.r1.p1");
        assert_eq!(actions[0].raw, "heuristic");
    }

    #[tokio::test]
    async fn test_decide_action_rejects_unknown_target() {
        let world = sample_world();
        let oracle = ScriptedOracle::new();
        oracle.push("WORLD_DECIDE", "<|UPDATE_NODE|>:micro.r7");
        let err = agent(&oracle).decide_action(&world, "x").await.unwrap_err();
        assert!(matches!(err, WorldError::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_add_under_region_creates_polity_with_aspects() {
        let mut world = sample_world();
        let oracle = ScriptedOracle::new();
        oracle.push("ADD_NODE", "<|KEY|>:Salt Compact\n<|VALUE|>:Caravan city-states.");
        let action = ActionDecision::new(WorldAction::AddNode, "micro.r2", "test");
        let node = agent(&oracle)
            .apply_action(&mut world, &action, "Caravan towns band together.")
            .await
            .unwrap();
        assert_eq!(node.id, "micro.r2.p2");
        assert_eq!(node.key, "Salt Compact");
        assert_eq!(node.value, "Caravan city-states.");
        assert_eq!(world.children("micro.r2.p2").len(), POLITY_ASPECTS.len());
    }

    #[tokio::test]
    async fn test_update_keeps_content_on_empty_reply() {
        let mut world = sample_world();
        let before = world.get_node("micro.r1").unwrap().value.clone();
        let oracle = ScriptedOracle::new();
        oracle.push("UPDATE_NODE", "   ");
        let node = agent(&oracle).update_node(&mut world, "micro.r1", "x").await.unwrap();
        assert_eq!(node.value, before);
    }

    #[tokio::test]
    async fn test_remove_returns_pre_removal_node() {
        let mut world = sample_world();
        let oracle = ScriptedOracle::new();
        let action = ActionDecision::new(WorldAction::RemoveNode, "micro.r1.p2", "test");
        let node = agent(&oracle).apply_action(&mut world, &action, "").await.unwrap();
        assert_eq!(node.key, "Ember League");
        assert!(world.get_node("micro.r1.p2").is_none());
        assert!(oracle.calls().is_empty());
    }

    #[tokio::test]
    async fn test_collect_drops_actions_under_removed_node() {
        let world = sample_world();
        let oracle = ScriptedOracle::new();
        oracle.push(
            "WORLD_COLLECT",
            "<|UPDATE_NODE|>:micro.r1.p2\n<|REMOVE_NODE|>:micro.r1.p2\n\
             <|UPDATE_NODE|>:micro.r1.p2.culture\n<|ADD_NODE|>:micro.r1.p2\n<|UPDATE_NODE|>:micro.r1.p1",
        );
        let actions = agent(&oracle).collect_actions(&world, "", 8).await.unwrap();
        let targets: Vec<(WorldAction, &str)> = actions.iter().map(|a| (a.flag, a.target_id.as_str())).collect();
        assert_eq!(
            targets,
            vec![
                (WorldAction::UpdateNode, "micro.r1.p2"),
                (WorldAction::RemoveNode, "micro.r1.p2"),
                (WorldAction::UpdateNode, "micro.r1.p1"),
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_actions_skips_vanished_targets() {
        let mut world = sample_world();
        let oracle = ScriptedOracle::new();
        oracle.push("UPDATE_NODE", "Frozen solid.");
        let actions = vec![
            ActionDecision::new(WorldAction::RemoveNode, "micro.r1.p2", "test"),
            ActionDecision::new(WorldAction::UpdateNode, "micro.r1.p2.economy", "test"),
            ActionDecision::new(WorldAction::UpdateNode, "micro.r1", "test"),
        ];
        let (applied, nodes) = agent(&oracle).apply_actions(&mut world, actions, "").await.unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(nodes.len(), 2);
        assert_eq!(applied[1].target_id, "micro.r1");
        assert_eq!(nodes[1].value, "Frozen solid.");
    }

    #[test]
    fn test_within_follows_parents() {
        let world = sample_world();
        assert!(world.within("micro.r1.p2.culture", "micro.r1.p2"));
        assert!(world.within("micro.r1.p2", "micro.r1.p2"));
        assert!(world.within("micro.r1.p2", "micro"));
        assert!(!world.within("micro.r1.p1", "micro.r1.p2"));
        assert!(!world.within("missing", "micro"));
    }

    #[tokio::test]
    async fn test_extract_info() {
        let world = sample_world();
        let oracle = ScriptedOracle::new();
        oracle.push("WORLD_EXTRACT", "micro.r1");
        oracle.push("WORLD_EXTRACT", "no relevant information");
        let agent = agent(&oracle);
        let hit = agent.extract_info(&world, "the north").await.unwrap();
        assert_eq!(hit, world.get_node("micro.r1").unwrap().value);
        let miss = agent.extract_info(&world, "the moon").await.unwrap();
        assert_eq!(miss, NO_RELEVANT_INFO);
    }

    #[test]
    fn test_polity_helpers() {
        let mut world = sample_world();
        let oracle = ScriptedOracle::new();
        let agent = agent(&oracle);
        let polity = agent.add_polity(&mut world, "Dunes", "Glass Court").unwrap();
        assert_eq!(polity.id, "micro.r2.p2");
        assert!(agent.add_polity(&mut world, "micro.r1.p1", "Nope").is_err());

        let removed = agent.remove_polity(&mut world, "Glass Court", Some("Dunes")).unwrap();
        assert_eq!(removed.len(), 1 + POLITY_ASPECTS.len());
        assert!(matches!(
            agent.remove_polity(&mut world, "Glass Court", None),
            Err(WorldError::NodeNotFound(_))
        ));
    }
}
