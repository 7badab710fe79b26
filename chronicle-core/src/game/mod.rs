//! The orchestrator: context gathering, decision, validation, apply and the
//! consistency passes.

mod agent;
mod consistency;
mod context;
mod decision;
mod validate;

pub use agent::{GameAgent, UpdateError, UpdateResult};
pub use consistency::{ConsistencyResolver, POLITY_CHECK, POLITY_MERGE, POLITY_REMOVE, REGION_CHILDREN};
pub use context::{
    character_context_item, pack_items, roster_listing, world_context_item, world_listing, ContextGatherer,
    SearchRound, WorkingContext,
};
pub use decision::{heuristic_decision, parse_decision, UpdateDecision, HEURISTIC_REASON};
pub use validate::{parse_verdict, validate, validation_prompt, Verdict};

pub(crate) const SYSTEM_PROMPT: &str = "You are the coordinator of a story world. \
Keep the world setting and the character profiles consistent with the story. \
Follow formatting instructions exactly and avoid extra commentary.";
