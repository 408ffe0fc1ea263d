//! `fableloom play` — run a scenario interactively in the terminal.

use fableloom_config::AppConfig;
use fableloom_core::scenario::ScenarioFile;
use fableloom_engine::{Engine, Session, TurnEvent};
use fableloom_providers::{OpenAiChatProvider, RetryingProvider};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub async fn run(path: &Path, model_override: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let Some(api_key) = config.api_key.clone() else {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    FABLELOOM_API_KEY='sk-...'");
        eprintln!("    OPENAI_API_KEY='sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let scenario: ScenarioFile = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse {}: {e}", path.display()))?;

    let model = model_override.unwrap_or_else(|| config.model.clone());
    let provider = Arc::new(RetryingProvider::new(Arc::new(OpenAiChatProvider::new(
        "openai",
        &config.base_url,
        api_key,
    ))));
    let engine = Engine::new(provider)
        .with_max_tool_steps(config.max_tool_steps)
        .with_context_budget(config.context_budget);
    let session = Session::from_scenario(&scenario, &model)?;

    println!();
    println!("  {}", scenario.title);
    println!("  {}", scenario.description);
    println!();
    println!("  Model: {model}");
    println!("  Say what you do; the narrator answers.");
    println!("  Commands: /continue  /regen  /state  /save <path>  /quit");
    println!();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    prompt_marker()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            prompt_marker()?;
            continue;
        }

        match line.as_str() {
            "/quit" | "/exit" => break,
            "/state" => {
                print_state(&session);
                prompt_marker()?;
                continue;
            }
            _ if line.starts_with("/save") => {
                save_state(&session, line.strip_prefix("/save").unwrap_or("").trim());
                prompt_marker()?;
                continue;
            }
            _ => {}
        }

        let rx = match line.as_str() {
            "/continue" => engine.continue_turn(&session),
            "/regen" => engine.regenerate(&session),
            _ => engine.send(&session, line),
        };

        drain_turn(rx).await?;
        prompt_marker()?;
    }

    println!();
    println!("  The story rests here. Goodbye!");
    println!();
    Ok(())
}

/// Print streamed events until the turn is done.
async fn drain_turn(mut rx: mpsc::Receiver<TurnEvent>) -> Result<(), Box<dyn std::error::Error>> {
    println!();
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Token { text } => {
                print!("{text}");
                std::io::stdout().flush()?;
            }
            TurnEvent::Event { .. } => {} // tool traffic is invisible in the terminal
            TurnEvent::Error { message } => {
                eprintln!();
                eprintln!("  [Error] {message}");
            }
            TurnEvent::Done => break,
        }
    }
    println!();
    println!();
    Ok(())
}

fn prompt_marker() -> Result<(), Box<dyn std::error::Error>> {
    print!("  You > ");
    std::io::stdout().flush()?;
    Ok(())
}

fn print_state(session: &Arc<Session>) {
    let snapshot = session.world().snapshot();
    let player = snapshot.player();
    let here = snapshot
        .cluster(&player.location)
        .map(|c| c.canonical_name.as_str())
        .unwrap_or("Unknown");

    println!();
    println!("  Time:     {} (tick {})", snapshot.time().narrative_time, snapshot.time().tick);
    println!("  Location: {here}");
    let (discovered, undiscovered) = snapshot.present_characters(&player.location);
    if discovered.is_empty() && undiscovered.is_empty() {
        println!("  Alone here.");
    } else {
        for character in discovered {
            println!("  With:     {}", character.name);
        }
        if !undiscovered.is_empty() {
            println!("  (and {} unseen)", undiscovered.len());
        }
    }
    for event in snapshot.recent_events(5) {
        println!("  Recently: {}", event.description);
    }
    println!();
}

fn save_state(session: &Arc<Session>, path: &str) {
    if path.is_empty() {
        eprintln!("  Usage: /save <path>");
        return;
    }
    let file = session.world().snapshot().to_scenario_file();
    match serde_json::to_string_pretty(&file) {
        Ok(json) => match std::fs::write(path, json) {
            Ok(()) => println!("  Saved to {path}"),
            Err(e) => eprintln!("  [Error] Could not write {path}: {e}"),
        },
        Err(e) => eprintln!("  [Error] Could not serialize the world: {e}"),
    }
}
