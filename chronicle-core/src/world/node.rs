//! World tree node types and identifier conventions.

use serde::{Deserialize, Serialize};

/// Identifier of the tree root.
pub const WORLD_ROOT: &str = "world";
/// Identifier of the abstract, thematic branch.
pub const MACRO_ROOT: &str = "macro";
/// Identifier of the concrete, geographic branch.
pub const MICRO_ROOT: &str = "micro";

/// Structured aspects every polity carries, as `(child key, display key)`.
pub const POLITY_ASPECTS: &[(&str, &str)] = &[
    ("culture", "Culture"),
    ("economy", "Economy"),
    ("politics", "Politics"),
    ("population", "Population"),
    ("geography", "Geography"),
    ("technology", "Technology"),
    ("resources", "Resources"),
];

/// One node of the world tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldNode {
    /// Canonical id, e.g. `micro.r1.p2.culture`.
    pub id: String,
    /// Display key (title).
    pub key: String,
    /// Descriptive content.
    #[serde(default)]
    pub value: String,
    /// Parent id; `None` only for the root.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Child ids, kept sorted.
    #[serde(default)]
    pub child_ids: Vec<String>,
}

impl WorldNode {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            value: String::new(),
            parent_id: None,
            child_ids: Vec::new(),
        }
    }

    /// Capture the fields the history log diffs.
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            key: self.key.clone(),
            value: self.value.clone(),
            children: self.child_ids.clone(),
        }
    }

    /// `id/key`, the compact form used in listings.
    pub fn label(&self) -> String {
        format!("{}/{}", self.id, self.key)
    }
}

/// Serialized view of a node: what snapshots and history changes store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub children: Vec<String>,
}

/// Whether `id` is one of the three structural roots.
pub fn is_root_id(id: &str) -> bool {
    matches!(id, WORLD_ROOT | MACRO_ROOT | MICRO_ROOT)
}

/// Whether `id` lives in the micro branch.
pub fn is_micro_id(id: &str) -> bool {
    id == MICRO_ROOT || id.starts_with("micro.")
}

/// Whether `id` lives in the macro branch (bare ids starting with a digit).
pub fn is_macro_id(id: &str) -> bool {
    id == MACRO_ROOT || id.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Sort rank: micro first, then everything else, then macro.
pub fn micro_rank(id: &str) -> u8 {
    if is_micro_id(id) {
        0
    } else if is_macro_id(id) {
        2
    } else {
        1
    }
}

/// The polity id (`micro.rX.pY`) an id belongs to, judged from its path.
pub fn polity_prefix(id: &str) -> Option<String> {
    if !id.starts_with("micro.") {
        return None;
    }
    let parts: Vec<&str> = id.split('.').collect();
    if parts.len() >= 3 && parts[2].starts_with('p') {
        Some(parts[..3].join("."))
    } else {
        None
    }
}

/// Id of a new child: bare key under `world`/`macro`, `parent.key` elsewhere.
pub fn child_id(parent_id: &str, child_key: &str) -> String {
    if parent_id == WORLD_ROOT || parent_id == MACRO_ROOT {
        child_key.to_string()
    } else {
        format!("{parent_id}.{child_key}")
    }
}

/// Parent implied by an id's shape.
pub fn inferred_parent(id: &str) -> String {
    match id.rsplit_once('.') {
        Some((parent, _)) => parent.to_string(),
        None if id == MACRO_ROOT || id == MICRO_ROOT => WORLD_ROOT.to_string(),
        None => MACRO_ROOT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_classification() {
        assert!(is_micro_id("micro.r1.p2"));
        assert!(!is_micro_id("microscope"));
        assert!(is_macro_id("1"));
        assert!(is_macro_id("macro"));
        assert!(is_root_id("world"));
        assert!(!is_root_id("micro.r1"));
        assert_eq!(micro_rank("micro.r1"), 0);
        assert_eq!(micro_rank("world"), 1);
        assert_eq!(micro_rank("2.1"), 2);
    }

    #[test]
    fn test_polity_prefix() {
        assert_eq!(polity_prefix("micro.r1.p2.culture").as_deref(), Some("micro.r1.p2"));
        assert_eq!(polity_prefix("micro.r1.p2").as_deref(), Some("micro.r1.p2"));
        assert_eq!(polity_prefix("micro.r1"), None);
        assert_eq!(polity_prefix("micro.r1.x3"), None);
        assert_eq!(polity_prefix("1.2.p3"), None);
    }

    #[test]
    fn test_child_and_parent_ids() {
        assert_eq!(child_id("macro", "3"), "3");
        assert_eq!(child_id("micro", "r4"), "micro.r4");
        assert_eq!(inferred_parent("micro.r4.p1"), "micro.r4");
        assert_eq!(inferred_parent("3"), "macro");
        assert_eq!(inferred_parent("micro"), "world");
    }
}
