//! The character roster: records, store contract and agent.

mod agent;
mod record;
mod store;

pub use agent::{CharacterAction, CharacterActionDecision, CharacterAgent, PROFILE_FIELDS};
pub use record::{CharacterRecord, CharacterSnapshot, MountPoint, Profile};
pub use store::{mount_points, CharacterError, CharacterRoster, CharacterStore};
