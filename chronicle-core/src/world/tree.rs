//! In-memory world tree stored as an arena of nodes keyed by id.

use super::node::{
    child_id, inferred_parent, is_root_id, NodeSnapshot, WorldNode, MACRO_ROOT, MICRO_ROOT,
    WORLD_ROOT,
};
use super::store::{WorldError, WorldStore};
use std::collections::{BTreeMap, HashMap};

/// Flat map of nodes; parent/child links are ids, never references.
#[derive(Debug, Clone)]
pub struct WorldTree {
    nodes: HashMap<String, WorldNode>,
}

impl Default for WorldTree {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldTree {
    /// A tree holding only the `world`, `macro` and `micro` roots.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        let mut root = WorldNode::new(WORLD_ROOT, "World");
        root.child_ids = vec![MACRO_ROOT.to_string(), MICRO_ROOT.to_string()];

        for (id, key) in [(MACRO_ROOT, "Macro"), (MICRO_ROOT, "Micro")] {
            let mut node = WorldNode::new(id, key);
            node.parent_id = Some(WORLD_ROOT.to_string());
            nodes.insert(id.to_string(), node);
        }
        nodes.insert(WORLD_ROOT.to_string(), root);

        Self { nodes }
    }

    /// Set the root's content (the world pitch).
    pub fn with_pitch(mut self, pitch: impl Into<String>) -> Self {
        if let Some(root) = self.nodes.get_mut(WORLD_ROOT) {
            root.value = pitch.into();
        }
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Insert or overwrite a node at an explicit id.
    ///
    /// The parent is taken from `parent_id` or inferred from the id's shape;
    /// missing ancestors are created as placeholders.
    pub fn upsert_node(
        &mut self,
        id: &str,
        key: &str,
        value: &str,
        parent_id: Option<&str>,
    ) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.key = key.to_string();
            node.value = value.to_string();
            return;
        }

        let parent = parent_id
            .map(str::to_string)
            .unwrap_or_else(|| inferred_parent(id));
        self.ensure_node(&parent);
        let mut node = WorldNode::new(id, key);
        node.value = value.to_string();
        node.parent_id = Some(parent.clone());
        self.link_child(&parent, id);
        self.nodes.insert(id.to_string(), node);
    }

    fn ensure_node(&mut self, id: &str) {
        if self.nodes.contains_key(id) {
            return;
        }
        let parent = inferred_parent(id);
        self.ensure_node(&parent);
        let mut placeholder = WorldNode::new(id, format!("Placeholder {id}"));
        placeholder.parent_id = Some(parent.clone());
        self.link_child(&parent, id);
        self.nodes.insert(id.to_string(), placeholder);
    }

    fn link_child(&mut self, parent_id: &str, child: &str) {
        if let Some(parent) = self.nodes.get_mut(parent_id) {
            if let Err(pos) = parent.child_ids.binary_search_by(|c| c.as_str().cmp(child)) {
                parent.child_ids.insert(pos, child.to_string());
            }
        }
    }

    /// `{id: {key, value, children}}` for every node.
    pub fn as_snapshot(&self) -> BTreeMap<String, NodeSnapshot> {
        self.nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.snapshot()))
            .collect()
    }

    /// Rebuild a tree from a snapshot map.
    ///
    /// Parents are inferred from ids, so snapshot order does not matter.
    pub fn from_snapshot(snapshot: &BTreeMap<String, NodeSnapshot>) -> Self {
        let mut tree = Self::new();
        for (id, node) in snapshot {
            let key = if node.key.is_empty() { id.as_str() } else { node.key.as_str() };
            tree.upsert_node(id, key, &node.value, None);
        }
        tree
    }
}

impl WorldStore for WorldTree {
    fn get_node(&self, id: &str) -> Option<&WorldNode> {
        self.nodes.get(id)
    }

    fn list_nodes(&self) -> Vec<&WorldNode> {
        let mut nodes: Vec<&WorldNode> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    fn add_child(
        &mut self,
        parent_id: &str,
        child_key: &str,
        title: &str,
    ) -> Result<WorldNode, WorldError> {
        if !self.nodes.contains_key(parent_id) {
            return Err(WorldError::NodeNotFound(parent_id.to_string()));
        }
        let child_key = child_key.trim();
        if child_key.is_empty() || child_key.contains('.') {
            return Err(WorldError::Invalid(format!(
                "child key {child_key:?} must be non-empty and contain no '.'"
            )));
        }
        let id = child_id(parent_id, child_key);
        if self.nodes.contains_key(&id) {
            return Err(WorldError::NodeExists(id));
        }

        let mut node = WorldNode::new(&id, title);
        node.parent_id = Some(parent_id.to_string());
        self.link_child(parent_id, &id);
        self.nodes.insert(id, node.clone());
        Ok(node)
    }

    fn update_content(&mut self, id: &str, value: &str) -> Result<(), WorldError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| WorldError::NodeNotFound(id.to_string()))?;
        node.value = value.to_string();
        Ok(())
    }

    fn remove_subtree(&mut self, id: &str) -> Result<Vec<String>, WorldError> {
        if is_root_id(id) {
            return Err(WorldError::Invalid(format!("cannot remove root node {id}")));
        }
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| WorldError::NodeNotFound(id.to_string()))?;

        if let Some(parent_id) = node.parent_id.clone() {
            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                parent.child_ids.retain(|c| c != id);
            }
        }

        let mut removed = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.child_ids.iter().cloned());
                removed.push(current);
            }
        }
        removed.sort();
        Ok(removed)
    }
}
