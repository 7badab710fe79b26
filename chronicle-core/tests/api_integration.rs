//! Integration tests that call the real Claude API.
//!
//! These tests require ANTHROPIC_API_KEY to be set (via .env file or environment).
//! Run with: `cargo test -p chronicle-core --test api_integration -- --ignored`
//!
//! They are ignored by default: they cost money, need a key and take seconds.

use chronicle_core::character::CharacterStore;
use chronicle_core::testing::{sample_roster, sample_world};
use chronicle_core::world::WorldStore;
use chronicle_core::{GameAgent, HistoryRecorder, Oracle, NO_RELEVANT_INFO};

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("ANTHROPIC_API_KEY").is_ok()
}

#[tokio::test]
#[ignore] // Run with: cargo test -p chronicle-core --test api_integration -- --ignored
async fn test_decision_for_polity_news() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let agent = GameAgent::new(Oracle::from_env().expect("Failed to create oracle"));
    let decision = agent
        .decide_updates(
            "The Salt Khanate closes every caravan road and declares war on the Frost Crown.",
            None,
            &sample_world(),
            &sample_roster(),
        )
        .await
        .expect("decision should succeed");

    println!("Decision: {decision:?}");
    assert!(decision.update_world, "a war between polities should touch the world");
}

#[tokio::test]
#[ignore]
async fn test_character_extract_finds_named_character() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let agent = GameAgent::new(Oracle::from_env().expect("Failed to create oracle"));
    let info = agent
        .character_agent()
        .extract_info(&sample_roster(), "What does Bram do for a living?")
        .await
        .expect("extract should succeed");

    println!("Info: {info}");
    assert_ne!(info, NO_RELEVANT_INFO);
    assert!(info.to_lowercase().contains("smith"));
}

#[tokio::test]
#[ignore]
async fn test_full_update_cycle_keeps_stores_consistent() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let mut world = sample_world();
    let mut roster = sample_roster();
    let mut agent = GameAgent::new(Oracle::from_env().expect("Failed to create oracle"))
        .with_history(HistoryRecorder::new());

    let result = agent
        .apply_update(
            "A blizzard cuts the North off for a season. Bram the smith leaves the Ember League to serve the Frost Crown.",
            &mut world,
            &mut roster,
        )
        .await
        .expect("update should succeed");

    println!("Decision: {:?}", result.decision);
    for (action, node) in result.world_actions.iter().zip(&result.world_nodes) {
        println!("  {} {} -> {}", action.flag, action.target_id, node.key);
    }

    assert_eq!(result.world_actions.len(), result.world_nodes.len());
    assert_eq!(result.character_actions.len(), result.character_records.len());
    for record in roster.list_records() {
        if let Some(polity) = record.polity_id.as_deref() {
            assert!(world.is_polity(polity), "{} points at missing polity {polity}", record.id);
        }
    }
    assert_eq!(agent.history().unwrap().entries().len(), 1);
}
