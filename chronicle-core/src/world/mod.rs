//! The world tree: node model, store contract, arena store and agent.

mod agent;
mod node;
mod store;
mod tree;

pub use agent::{describe_action, drop_removed_targets, ActionDecision, WorldAction, WorldAgent};
pub(crate) use agent::pick_identifier;
pub use node::*;
pub use store::{WorldError, WorldStore};
pub use tree::WorldTree;
