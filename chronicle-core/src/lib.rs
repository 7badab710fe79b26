//! Narrative update orchestrator for a story world.
//!
//! This crate provides:
//! - A world tree (`world` / `macro` / `micro` branches) and a character roster
//! - Oracle-driven agents that turn story text into tree and roster changes
//! - An orchestrator that gathers context, decides, validates, applies and
//!   keeps polities, regions and characters consistent
//! - An append-only change history and JSON persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use chronicle_core::{GameAgent, HistoryRecorder, Oracle, SavedChronicle};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saved = SavedChronicle::load_json("chronicle.json").await?;
//!     let (mut world, mut characters) = saved.restore();
//!
//!     let mut agent = GameAgent::new(Oracle::from_env()?)
//!         .with_history(HistoryRecorder::new().with_log("log/history.jsonl"));
//!     let result = agent
//!         .apply_update("The Frost Crown annexes the Ember League.", &mut world, &mut characters)
//!         .await?;
//!     println!("{} world changes", result.world_actions.len());
//!
//!     SavedChronicle::new(&world, &characters).save_json("chronicle.json").await?;
//!     Ok(())
//! }
//! ```

pub mod character;
pub mod config;
pub mod game;
pub mod history;
pub mod oracle;
pub mod parse;
pub mod persist;
pub mod resolve;
pub mod testing;
pub mod world;

/// Sentinel returned by `extract_info` when nothing relevant is stored.
pub const NO_RELEVANT_INFO: &str = "no relevant information";

// Primary public API
pub use character::{
    CharacterAction, CharacterActionDecision, CharacterAgent, CharacterError, CharacterRecord, CharacterRoster,
    CharacterStore, Profile,
};
pub use config::{AgentConfig, KeywordSets, ValidationPolicy};
pub use game::{GameAgent, UpdateDecision, UpdateError, UpdateResult, WorkingContext};
pub use history::{ChangeKind, HistoryChange, HistoryEntry, HistoryError, HistoryRecorder};
pub use oracle::{Oracle, OracleError, TextOracle};
pub use persist::{PersistError, SavedChronicle};
pub use testing::ScriptedOracle;
pub use world::{ActionDecision, WorldAction, WorldAgent, WorldError, WorldNode, WorldStore, WorldTree};
