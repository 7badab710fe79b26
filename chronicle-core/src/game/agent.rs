//! The update orchestrator.

use super::consistency::{ConsistencyResolver, POLITY_CHECK};
use super::context::{roster_listing, world_listing, ContextGatherer, WorkingContext};
use super::decision::{parse_decision, UpdateDecision};
use super::validate::{validate, validation_prompt};
use super::SYSTEM_PROMPT;
use crate::character::{CharacterActionDecision, CharacterAgent, CharacterError, CharacterRecord, CharacterStore};
use crate::config::{AgentConfig, ValidationPolicy};
use crate::history::{CycleSnapshot, HistoryEntry, HistoryRecorder};
use crate::oracle::{Oracle, OracleError};
use crate::resolve::count_mentions;
use crate::world::{ActionDecision, WorldAgent, WorldError, WorldNode, WorldStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that abort an update cycle.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("world error: {0}")]
    World(#[from] WorldError),

    #[error("character error: {0}")]
    Character(#[from] CharacterError),
}

/// What one update cycle did.
///
/// `world_nodes[i]` is the outcome of `world_actions[i]`, and likewise for
/// characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub decision: UpdateDecision,
    pub world_actions: Vec<ActionDecision>,
    pub world_nodes: Vec<WorldNode>,
    pub character_actions: Vec<CharacterActionDecision>,
    pub character_records: Vec<CharacterRecord>,
}

impl UpdateResult {
    pub fn new(decision: UpdateDecision) -> Self {
        Self {
            decision,
            world_actions: Vec::new(),
            world_nodes: Vec::new(),
            character_actions: Vec::new(),
            character_records: Vec::new(),
        }
    }

    pub fn push_world(&mut self, action: ActionDecision, node: WorldNode) {
        self.world_actions.push(action);
        self.world_nodes.push(node);
    }

    pub fn push_character(&mut self, action: CharacterActionDecision, record: CharacterRecord) {
        self.character_actions.push(action);
        self.character_records.push(record);
    }

    /// Ids of characters already acted on this cycle.
    pub fn character_targets(&self) -> HashSet<String> {
        self.character_actions.iter().map(|a| a.target_id.clone()).collect()
    }

    /// True when nothing was applied.
    pub fn is_empty(&self) -> bool {
        self.world_actions.is_empty() && self.character_actions.is_empty()
    }
}

/// Turns free-form story text into coordinated world and character changes.
///
/// Each cycle gathers context, decides which stores change, collects and
/// validates concrete actions, applies them, runs the consistency passes and
/// records history. Stores are borrowed per call.
pub struct GameAgent {
    oracle: Oracle,
    world_agent: WorldAgent,
    character_agent: CharacterAgent,
    config: AgentConfig,
    history: Option<HistoryRecorder>,
}

impl GameAgent {
    pub fn new(oracle: Oracle) -> Self {
        Self {
            world_agent: WorldAgent::new(oracle.clone()),
            character_agent: CharacterAgent::new(oracle.clone()),
            oracle,
            config: AgentConfig::default(),
            history: None,
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.character_agent = self
            .character_agent
            .with_intro_keywords(config.keywords.character_intro.clone());
        self.config = config;
        self
    }

    pub fn with_history(mut self, history: HistoryRecorder) -> Self {
        self.history = Some(history);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn world_agent(&self) -> &WorldAgent {
        &self.world_agent
    }

    pub fn character_agent(&self) -> &CharacterAgent {
        &self.character_agent
    }

    pub fn history(&self) -> Option<&HistoryRecorder> {
        self.history.as_ref()
    }

    /// Decide whether the world and/or the roster must change.
    ///
    /// `context_hint` is a packed context listing. `None` runs a fresh search
    /// first; an empty listing falls back to the full tree and roster.
    pub async fn decide_updates(
        &self,
        text: &str,
        context_hint: Option<&[String]>,
        world: &dyn WorldStore,
        characters: &dyn CharacterStore,
    ) -> Result<UpdateDecision, UpdateError> {
        let gathered;
        let context_lines = match context_hint {
            Some(lines) => lines,
            None => {
                let mut context = WorkingContext::new();
                ContextGatherer::new(&self.oracle, &self.config)
                    .gather(text, None, &mut context, world, characters)
                    .await?;
                gathered = context.pack(self.config.context_line_limit);
                gathered.as_slice()
            }
        };

        let prompt = self.decision_prompt(text, context_lines, world, characters);
        let reply = self.oracle.ask(&prompt, SYSTEM_PROMPT, "GAME_DECIDE").await?;
        let decision = parse_decision(&reply, text, &self.config, world, characters);
        info!(
            update_world = decision.update_world,
            update_characters = decision.update_characters,
            reason = %decision.reason,
            text_len = text.len(),
            "decide_updates"
        );
        Ok(decision)
    }

    fn decision_prompt(
        &self,
        text: &str,
        context_lines: &[String],
        world: &dyn WorldStore,
        characters: &dyn CharacterStore,
    ) -> String {
        let limit = self.config.context_line_limit;
        let mut lines = vec![
            "Task: decide whether the world setting and/or the character profiles must change.".to_string(),
            "World: geography, factions, polities, institutions or major events change.".to_string(),
            "Characters: a character's state, relationships, motives or abilities change.".to_string(),
            "A story naming a concrete region, country, polity or city means a world update.".to_string(),
            "Answer with exactly two lines:".to_string(),
            "1) WORLD=YES/NO; CHARACTER=YES/NO".to_string(),
            "2) {\"update_world\":true|false,\"update_characters\":true|false,\"reason\":\"...\"}".to_string(),
            format!("Story update: {}", text.trim()),
        ];
        if context_lines.is_empty() {
            let roster = roster_listing(characters, limit, true);
            if !characters.is_empty() {
                lines.push("Characters:".to_string());
                lines.extend(roster);
            }
            let nodes = world_listing(world, limit, true);
            if !world.list_nodes().is_empty() {
                lines.push("World nodes:".to_string());
                lines.extend(nodes);
            }
        } else {
            lines.push("Read so far:".to_string());
            lines.extend(context_lines.iter().cloned());
        }
        lines.join("\n")
    }

    /// Run one full update cycle against the given stores.
    ///
    /// A failed oracle call or store operation aborts the cycle; changes
    /// already applied stay applied and no history entry is written.
    pub async fn apply_update(
        &mut self,
        text: &str,
        world: &mut dyn WorldStore,
        characters: &mut dyn CharacterStore,
    ) -> Result<UpdateResult, UpdateError> {
        let before = CycleSnapshot::capture(&*world, &*characters);
        let resolver = ConsistencyResolver::new(&self.oracle, &self.world_agent, &self.character_agent, &self.config);

        if let Some(result) = resolver.try_merge(text, world, characters).await? {
            self.record(text, &result, &before, &*world, &*characters).await;
            return Ok(result);
        }

        let gatherer = ContextGatherer::new(&self.oracle, &self.config);
        let mut context = WorkingContext::new();
        gatherer
            .gather(text, None, &mut context, &*world, &*characters)
            .await?;
        let mut context_lines = context.pack(self.config.context_line_limit);
        let mut decision = self
            .decide_updates(text, Some(context_lines.as_slice()), &*world, &*characters)
            .await?;

        let cap = self
            .config
            .action_cap_for(count_mentions(&*world, &*characters, text));
        let rounds = self.config.validate_rounds.max(1);
        let mut world_actions = Vec::new();
        let mut character_actions = Vec::new();
        for round in 1..=rounds {
            world_actions = if decision.update_world {
                self.world_agent.collect_actions(&*world, text, cap).await?
            } else {
                Vec::new()
            };
            character_actions = if decision.update_characters {
                self.character_agent
                    .collect_actions(&*characters, text, cap)
                    .await?
            } else {
                Vec::new()
            };
            if world_actions.is_empty() && character_actions.is_empty() {
                break;
            }

            let prompt = validation_prompt(
                text,
                &context_lines,
                &decision,
                &world_actions,
                &character_actions,
                &*world,
                &*characters,
            );
            let verdict = validate(&self.oracle, &prompt, round).await;
            if verdict.valid {
                break;
            }
            if round == rounds {
                match self.config.validation_policy {
                    ValidationPolicy::FailOpen => {
                        warn!(rounds, reason = %verdict.reason, "command validation exhausted, applying last actions");
                    }
                    ValidationPolicy::FailClosed => {
                        warn!(rounds, reason = %verdict.reason, "command validation exhausted, applying nothing");
                        world_actions.clear();
                        character_actions.clear();
                    }
                }
                break;
            }

            gatherer
                .gather(text, Some(&verdict.reason), &mut context, &*world, &*characters)
                .await?;
            context_lines = context.pack(self.config.context_line_limit);
            decision = self
                .decide_updates(text, Some(context_lines.as_slice()), &*world, &*characters)
                .await?;
        }

        let mut result = UpdateResult::new(decision);
        let (applied, nodes) = self.world_agent.apply_actions(world, world_actions, text).await?;
        result.world_actions = applied;
        result.world_nodes = nodes;
        // Regions settle before any character reads them.
        resolver
            .cascade_regions(text, &before.world, world, &mut result)
            .await?;

        let records = self
            .character_agent
            .apply_actions(characters, &*world, &character_actions, text)
            .await?;
        result.character_actions = character_actions;
        result.character_records = records;

        let direct = result.character_actions.len();
        resolver
            .sync_polity_characters(text, &*world, characters, &mut result)
            .await?;
        resolver
            .sync_removed_polities(text, &*world, characters, &mut result)
            .await?;
        if result.character_actions.len() > direct && !result.decision.update_characters {
            result.decision = result.decision.with_characters(POLITY_CHECK);
        }

        info!(
            world_actions = result.world_actions.len(),
            character_actions = result.character_actions.len(),
            "apply_update"
        );
        self.record(text, &result, &before, &*world, &*characters).await;
        Ok(result)
    }

    async fn record(
        &mut self,
        text: &str,
        result: &UpdateResult,
        before: &CycleSnapshot,
        world: &dyn WorldStore,
        characters: &dyn CharacterStore,
    ) -> Option<HistoryEntry> {
        let history = self.history.as_mut()?;
        let summarizer = self.config.oracle_summaries.then_some(&self.oracle);
        Some(
            history
                .record(text, result, before, world, characters, summarizer)
                .await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_roster, sample_world, ScriptedOracle};
    use crate::world::WorldAction;

    #[tokio::test]
    async fn test_decide_updates_with_hint_skips_search() {
        let oracle = ScriptedOracle::new();
        oracle.push("GAME_DECIDE", "WORLD=YES; CHARACTER=NO");
        let agent = GameAgent::new(oracle.handle());
        let decision = agent
            .decide_updates("The North freezes.", Some(&[] as &[String]), &sample_world(), &sample_roster())
            .await
            .unwrap();
        assert!(decision.update_world);
        assert!(!decision.update_characters);

        let calls = oracle.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].prompt.contains("World nodes:"));
        assert!(calls[0].prompt.contains("Characters:"));
    }

    #[tokio::test]
    async fn test_decide_updates_without_hint_searches() {
        let oracle = ScriptedOracle::new();
        oracle.push("GAME_SEARCH_1", "WORLD=micro.r1; CHARACTER=NONE");
        oracle.push("GAME_SEARCH_DECIDE_1", "CONTINUE=NO");
        oracle.push("GAME_DECIDE", "{\"update_world\": true, \"update_characters\": false}");
        let agent = GameAgent::new(oracle.handle());
        agent
            .decide_updates("The North freezes.", None, &sample_world(), &sample_roster())
            .await
            .unwrap();

        let calls = oracle.calls();
        assert_eq!(calls.last().unwrap().label, "GAME_DECIDE");
        assert!(calls.last().unwrap().prompt.contains("micro.r1/North="));
    }

    #[tokio::test]
    async fn test_region_cascade_and_polity_sync() {
        let oracle = ScriptedOracle::new();
        oracle.push("GAME_SEARCH_1", "WORLD=micro.r2");
        oracle.push("GAME_SEARCH_DECIDE_1", "CONTINUE=NO");
        oracle.push("GAME_DECIDE", "WORLD=YES; CHARACTER=NO");
        oracle.push("WORLD_COLLECT", "<|UPDATE_NODE|>:micro.r2");
        oracle.push("GAME_COMMAND_VALIDATE_1", "VALID=YES");
        oracle.push("UPDATE_NODE", "A desert buried by a sandstorm.");
        oracle.push("GAME_REGION_CHILDREN", "{\"update_children\": true, \"reason\": \"storm\"}");
        oracle.push("UPDATE_NODE", "The khanate shelters underground.");
        oracle.push("GAME_POLITY_CHARACTERS", "UPDATE=c3");
        oracle.push("CHARACTER_UPDATE", "{\"name\": \"Yusuf\", \"summary\": \"A caravan master stranded by sand.\"}");

        let mut world = sample_world();
        let mut roster = sample_roster();
        let mut agent = GameAgent::new(oracle.handle());
        let result = agent
            .apply_update("A sandstorm buries the Dunes.", &mut world, &mut roster)
            .await
            .unwrap();

        let targets: Vec<(WorldAction, &str)> = result
            .world_actions
            .iter()
            .map(|a| (a.flag, a.target_id.as_str()))
            .collect();
        assert_eq!(
            targets,
            vec![
                (WorldAction::UpdateNode, "micro.r2"),
                (WorldAction::UpdateNode, "micro.r2.p1"),
            ]
        );
        assert_eq!(result.world_actions[1].raw, "region_children");
        assert_eq!(result.character_actions.len(), 1);
        assert_eq!(result.character_actions[0].target_id, "c3");
        assert_eq!(result.character_actions[0].raw, "polity_check");
        assert!(result.decision.update_characters);
        assert_eq!(result.decision.reason, "polity_check");
        assert_eq!(world.get_node("micro.r2.p1").unwrap().value, "The khanate shelters underground.");
    }
}
