//! `fableloom inspect` — validate a scenario file and print a summary.

use fableloom_core::scenario::ScenarioFile;
use std::path::Path;

pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let file: ScenarioFile = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse {}: {e}", path.display()))?;

    // importing validates every reference and invariant
    let world = file.to_world_state()?;

    println!();
    println!("  {}", world.scenario().title);
    println!("  {}", world.scenario().description);
    println!();
    println!("  Starts at:  {}", world.time().narrative_time);
    println!("  Locations:  {}", world.clusters().len());
    for cluster in world.clusters() {
        println!("    - {}", cluster.canonical_name);
    }
    println!("  Characters: {}", world.characters().len());
    for character in world.characters() {
        let marker = if character.is_player {
            " (player)"
        } else if character.is_discovered {
            ""
        } else {
            " (hidden)"
        };
        println!("    - {}{marker}", character.name);
    }
    println!();

    Ok(())
}
