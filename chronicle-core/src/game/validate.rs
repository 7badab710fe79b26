//! Oracle sanity check of proposed actions before they are applied.

use super::decision::UpdateDecision;
use super::SYSTEM_PROMPT;
use crate::character::{CharacterActionDecision, CharacterStore};
use crate::oracle::Oracle;
use crate::parse::{json_bool, tagged_bool};
use crate::world::{describe_action, ActionDecision, WorldStore};
use tracing::{info, warn};

/// Outcome of one validation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub valid: bool,
    /// Why the oracle objected; becomes the next search hint.
    pub reason: String,
}

/// `{"valid":..,"reason":..}` first, then `VALID=YES/NO`. Unparseable means
/// invalid.
pub fn parse_verdict(reply: &str) -> Verdict {
    if let Some((valid, reason)) = json_bool(reply, "valid") {
        return Verdict { valid, reason };
    }
    Verdict {
        valid: tagged_bool(reply, "VALID").unwrap_or(false),
        reason: String::new(),
    }
}

fn describe_character_action(characters: &dyn CharacterStore, action: &CharacterActionDecision) -> String {
    let label = characters
        .get_record(&action.target_id)
        .and_then(|r| r.name())
        .unwrap_or_else(|| "new".to_string());
    format!("- {} {} {}", action.flag, action.target_id, label)
}

/// Build the validation prompt.
pub fn validation_prompt(
    text: &str,
    context_lines: &[String],
    decision: &UpdateDecision,
    world_actions: &[ActionDecision],
    character_actions: &[CharacterActionDecision],
    world: &dyn WorldStore,
    characters: &dyn CharacterStore,
) -> String {
    let mut lines = vec![
        "Task: judge whether the commands about to run fit the story update.".to_string(),
        "If they do not, answer NO and say what context is missing.".to_string(),
        "Answer with exactly two lines:".to_string(),
        "1) VALID=YES/NO".to_string(),
        "2) {\"valid\":true|false,\"reason\":\"...\"}".to_string(),
        format!("Story update: {}", text.trim()),
        format!(
            "Decision: world={}; characters={}",
            decision.update_world, decision.update_characters
        ),
    ];
    if context_lines.is_empty() {
        lines.push("Read so far: none".to_string());
    } else {
        lines.push("Read so far:".to_string());
        lines.extend(context_lines.iter().cloned());
    }

    lines.push("Commands:".to_string());
    if world_actions.is_empty() {
        lines.push("World: none".to_string());
    } else {
        lines.push("World:".to_string());
        lines.extend(world_actions.iter().map(|a| describe_action(world, a)));
    }
    if character_actions.is_empty() {
        lines.push("Characters: none".to_string());
    } else {
        lines.push("Characters:".to_string());
        lines.extend(character_actions.iter().map(|a| describe_character_action(characters, a)));
    }
    lines.join("\n")
}

/// Run one validation round. An oracle failure is a rejection carrying the
/// error as its reason, so the loop can retry.
pub async fn validate(oracle: &Oracle, prompt: &str, round: usize) -> Verdict {
    match oracle
        .ask(prompt, SYSTEM_PROMPT, &format!("GAME_COMMAND_VALIDATE_{round}"))
        .await
    {
        Ok(reply) => {
            let verdict = parse_verdict(&reply);
            info!(round, valid = verdict.valid, reason = %verdict.reason, "command validation");
            verdict
        }
        Err(err) => {
            warn!(round, error = %err, "command validation call failed");
            Verdict {
                valid: false,
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::CharacterAction;
    use crate::testing::{sample_roster, sample_world};
    use crate::world::WorldAction;

    #[test]
    fn test_parse_verdict() {
        assert_eq!(
            parse_verdict("VALID=NO\n{\"valid\": true, \"reason\": \"fine\"}"),
            Verdict { valid: true, reason: "fine".into() }
        );
        assert!(parse_verdict("VALID=yes").valid);
        assert!(!parse_verdict("looks good to me").valid);
        assert_eq!(parse_verdict("{\"valid\":\"no\",\"reason\":\"read micro.r2\"}").reason, "read micro.r2");
    }

    #[test]
    fn test_prompt_lists_each_action() {
        let world = sample_world();
        let roster = sample_roster();
        let prompt = validation_prompt(
            "war",
            &[],
            &UpdateDecision::new(true, true, "", ""),
            &[ActionDecision::new(WorldAction::UpdateNode, "micro.r1.p1", "")],
            &[
                CharacterActionDecision::new(CharacterAction::UpdateCharacter, "c1", ""),
                CharacterActionDecision::new(CharacterAction::AddCharacter, "c4", ""),
            ],
            &world,
            &roster,
        );
        assert!(prompt.contains("- UPDATE_NODE micro.r1.p1 Frost Crown"));
        assert!(prompt.contains("- UPDATE_CHARACTER c1 Ilsa"));
        assert!(prompt.contains("- ADD_CHARACTER c4 new"));
        assert!(prompt.contains("Read so far: none"));
    }
}
