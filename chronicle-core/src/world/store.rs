//! The world store contract.

use super::node::{micro_rank, NodeSnapshot, WorldNode, MICRO_ROOT};
use crate::oracle::OracleError;
use thiserror::Error;

/// Errors from world store operations and the world agent.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("world node {0} not found")]
    NodeNotFound(String),

    #[error("world node {0} already exists")]
    NodeExists(String),

    #[error("invalid world operation: {0}")]
    Invalid(String),

    #[error("could not parse world decision: {0}")]
    Parse(String),

    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),
}

/// A mutable tree of world nodes keyed by canonical id.
///
/// Implementors provide the five primitives; the provided methods derive the
/// structural queries the orchestrator needs from them.
pub trait WorldStore: Send + Sync {
    /// Look up a node.
    fn get_node(&self, id: &str) -> Option<&WorldNode>;

    /// Every node, sorted by id.
    fn list_nodes(&self) -> Vec<&WorldNode>;

    /// Attach a new child. Fails if the parent is unknown or the id is taken.
    fn add_child(
        &mut self,
        parent_id: &str,
        child_key: &str,
        title: &str,
    ) -> Result<WorldNode, WorldError>;

    /// Replace a node's descriptive content.
    fn update_content(&mut self, id: &str, value: &str) -> Result<(), WorldError>;

    /// Remove a node and all descendants, detaching it from its parent.
    fn remove_subtree(&mut self, id: &str) -> Result<Vec<String>, WorldError>;

    fn require_node(&self, id: &str) -> Result<&WorldNode, WorldError> {
        self.get_node(id)
            .ok_or_else(|| WorldError::NodeNotFound(id.to_string()))
    }

    /// Direct children, sorted by id.
    fn children(&self, id: &str) -> Vec<&WorldNode> {
        let Some(node) = self.get_node(id) else {
            return Vec::new();
        };
        let mut children: Vec<&WorldNode> = node
            .child_ids
            .iter()
            .filter_map(|child| self.get_node(child))
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        children
    }

    fn parent(&self, id: &str) -> Option<&WorldNode> {
        let parent_id = self.get_node(id)?.parent_id.as_deref()?;
        self.get_node(parent_id)
    }

    /// Whether `id` is `ancestor` or lies somewhere beneath it.
    fn within(&self, id: &str, ancestor: &str) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == ancestor {
                return true;
            }
            current = self.get_node(node_id).and_then(|n| n.parent_id.as_deref());
        }
        false
    }

    /// A region is a direct child of `micro`.
    fn is_region(&self, id: &str) -> bool {
        self.get_node(id)
            .and_then(|n| n.parent_id.as_deref())
            .is_some_and(|p| p == MICRO_ROOT)
    }

    /// A polity is a child of a region.
    fn is_polity(&self, id: &str) -> bool {
        self.parent(id).is_some_and(|parent| self.is_region(&parent.id))
    }

    /// The node itself if it is a polity, else its parent if that is one.
    fn polity_of(&self, id: &str) -> Option<&WorldNode> {
        if self.is_polity(id) {
            return self.get_node(id);
        }
        let parent = self.parent(id)?;
        if self.is_polity(&parent.id) {
            Some(parent)
        } else {
            None
        }
    }

    /// Every polity, sorted by id.
    fn polities(&self) -> Vec<&WorldNode> {
        self.list_nodes()
            .into_iter()
            .filter(|n| self.is_polity(&n.id))
            .collect()
    }

    /// Every node, micro branch first, macro branch last.
    fn nodes_prefer_micro(&self) -> Vec<&WorldNode> {
        let mut nodes = self.list_nodes();
        nodes.sort_by(|a, b| {
            micro_rank(&a.id)
                .cmp(&micro_rank(&b.id))
                .then_with(|| a.id.cmp(&b.id))
        });
        nodes
    }

    fn snapshot_node(&self, id: &str) -> Option<NodeSnapshot> {
        self.get_node(id).map(WorldNode::snapshot)
    }
}
