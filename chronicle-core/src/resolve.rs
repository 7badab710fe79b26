//! Mapping oracle-supplied tokens onto canonical store identifiers.
//!
//! Tokens that do not resolve are dropped: they are usually ids the oracle
//! invented. Ambiguous names resolve to nothing rather than to a guess.

use crate::character::{CharacterRecord, CharacterStore};
use crate::parse::dedupe;
use crate::world::{is_micro_id, is_root_id, WorldNode, WorldStore};

fn clean(token: &str) -> &str {
    token
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '-' | '*'))
        .trim()
}

/// `micro.r1/North` style tokens carry the id before the slash.
fn slash_head(token: &str) -> Option<&str> {
    token.split_once('/').map(|(head, _)| head.trim())
}

/// Resolve one token against the world store.
///
/// Exact id first; then a display key that is unique across the store; when a
/// key collides, a single match under the micro branch wins.
pub fn resolve_world(world: &dyn WorldStore, token: &str) -> Option<String> {
    let token = clean(token);
    if token.is_empty() {
        return None;
    }
    if world.get_node(token).is_some() {
        return Some(token.to_string());
    }
    if let Some(head) = slash_head(token) {
        if world.get_node(head).is_some() {
            return Some(head.to_string());
        }
    }

    let matches: Vec<&WorldNode> = world
        .list_nodes()
        .into_iter()
        .filter(|n| n.key.trim() == token)
        .collect();
    match matches.as_slice() {
        [] => None,
        [only] => Some(only.id.clone()),
        many => {
            let micro: Vec<&&WorldNode> = many.iter().filter(|n| is_micro_id(&n.id)).collect();
            match micro.as_slice() {
                [only] => Some(only.id.clone()),
                _ => None,
            }
        }
    }
}

/// Resolve many tokens, deduplicated and capped.
pub fn resolve_world_many(
    world: &dyn WorldStore,
    tokens: &[String],
    limit: usize,
) -> Vec<String> {
    let resolved = tokens.iter().filter_map(|t| resolve_world(world, t));
    dedupe(resolved).into_iter().take(limit).collect()
}

/// Resolve one token against the roster: exact id, then unique name.
pub fn resolve_character(characters: &dyn CharacterStore, token: &str) -> Option<String> {
    let token = clean(token);
    if token.is_empty() {
        return None;
    }
    if characters.get_record(token).is_some() {
        return Some(token.to_string());
    }
    if let Some(head) = slash_head(token) {
        if characters.get_record(head).is_some() {
            return Some(head.to_string());
        }
    }

    let matches: Vec<&CharacterRecord> = characters
        .list_records()
        .into_iter()
        .filter(|r| r.name().is_some_and(|name| name == token))
        .collect();
    match matches.as_slice() {
        [only] => Some(only.id.clone()),
        _ => None,
    }
}

/// Resolve many character tokens, deduplicated and capped.
pub fn resolve_character_many(
    characters: &dyn CharacterStore,
    tokens: &[String],
    limit: usize,
) -> Vec<String> {
    let resolved = tokens.iter().filter_map(|t| resolve_character(characters, t));
    dedupe(resolved).into_iter().take(limit).collect()
}

/// Lenient polity lookup used when the oracle names merger parties.
///
/// Tries, in order: exact id, `id/label` head, unique key after stripping
/// brackets, the longest candidate id contained in the token, and finally a
/// unique candidate key contained in the token.
pub fn resolve_polity(candidates: &[&WorldNode], token: &str) -> Option<String> {
    let token = clean(token);
    if token.is_empty() {
        return None;
    }
    let find = |id: &str| candidates.iter().find(|n| n.id == id).map(|n| n.id.clone());

    if let Some(id) = find(token) {
        return Some(id);
    }
    if let Some(head) = slash_head(token) {
        if let Some(id) = find(head) {
            return Some(id);
        }
    }

    let bare = token.trim_matches(|c: char| matches!(c, '(' | ')' | '（' | '）')).trim();
    let key_matches: Vec<&&WorldNode> = candidates.iter().filter(|n| n.key.trim() == bare).collect();
    if let [only] = key_matches.as_slice() {
        return Some(only.id.clone());
    }

    if let Some(node) = candidates
        .iter()
        .filter(|n| !n.id.is_empty() && bare.contains(n.id.as_str()))
        .max_by_key(|n| n.id.len())
    {
        return Some(node.id.clone());
    }

    let contained: Vec<&&WorldNode> = candidates
        .iter()
        .filter(|n| !n.key.trim().is_empty() && bare.contains(n.key.trim()))
        .collect();
    match contained.as_slice() {
        [only] => Some(only.id.clone()),
        _ => None,
    }
}

/// Whether `needle` appears verbatim in `text`.
///
/// Case-sensitive. ASCII needles must sit on word boundaries so that `c1`
/// does not match inside `c12`; other needles match as substrings.
pub fn mentions(text: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    if !needle.is_ascii() {
        return text.contains(needle);
    }
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    text.match_indices(needle).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + needle.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Non-root nodes whose key is mentioned in `text`, micro branch first.
pub fn mentioned_nodes<'a>(world: &'a dyn WorldStore, text: &str) -> Vec<&'a WorldNode> {
    world
        .nodes_prefer_micro()
        .into_iter()
        .filter(|n| !is_root_id(&n.id) && mentions(text, &n.key))
        .collect()
}

/// Characters whose id or name is mentioned in `text`, in id order.
pub fn mentioned_characters<'a>(
    characters: &'a dyn CharacterStore,
    text: &str,
) -> Vec<&'a CharacterRecord> {
    characters
        .list_records()
        .into_iter()
        .filter(|r| mentions(text, &r.id) || r.name().is_some_and(|name| mentions(text, &name)))
        .collect()
}

/// Distinct known entities mentioned in `text`.
pub fn count_mentions(world: &dyn WorldStore, characters: &dyn CharacterStore, text: &str) -> usize {
    mentioned_nodes(world, text).len() + mentioned_characters(characters, text).len()
}
