//! Apply one story update to a saved chronicle (calls Claude API).
//!
//! Usage: `cargo run -p chronicle-core --example replay_update -- <save.json> "<update>"`
//!
//! A missing save file starts from the built-in two-region sample.

use chronicle_core::testing::{sample_roster, sample_world};
use chronicle_core::{AgentConfig, GameAgent, HistoryRecorder, Oracle, SavedChronicle};
use claude::Claude;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("chronicle_core=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let save_path = args.next().unwrap_or_else(|| "saves/chronicle.json".to_string());
    let text = args
        .next()
        .unwrap_or_else(|| "The Frost Crown annexes the Ember League after a hard winter.".to_string());

    let (mut world, mut characters) = if Path::new(&save_path).exists() {
        println!("Loading {save_path}");
        SavedChronicle::load_json(&save_path).await?.restore()
    } else {
        println!("No save at {save_path}, starting from the sample chronicle");
        (sample_world(), sample_roster())
    };

    let history = HistoryRecorder::new()
        .with_log("log/history.jsonl")
        .with_snapshot_dir("log/history");
    let client = Claude::from_env()?.with_max_retries(4);
    println!("Model: {}", client.model());
    let mut agent = GameAgent::new(Oracle::new(client))
        .with_config(AgentConfig::default().with_oracle_summaries(true))
        .with_history(history);

    println!("\nUpdate: {text}");
    let result = agent.apply_update(&text, &mut world, &mut characters).await?;

    println!(
        "\nDecision: world={} characters={} ({})",
        result.decision.update_world, result.decision.update_characters, result.decision.reason
    );
    for (action, node) in result.world_actions.iter().zip(&result.world_nodes) {
        println!("  {} {} {}", action.flag, node.id, node.key);
    }
    for (action, record) in result.character_actions.iter().zip(&result.character_records) {
        println!("  {} {}", action.flag, record.label());
    }
    if let Some(entry) = agent.history().and_then(|h| h.entries().last()) {
        println!("\nHistory: {}", entry.summary);
    }

    SavedChronicle::new(&world, &characters).save_json(&save_path).await?;
    println!("\nSaved {save_path}");
    Ok(())
}
