//! Prompt assembly — a pure function from a world snapshot to the system
//! prompt and tool schemas.
//!
//! Determinism matters: the same snapshot must always produce the identical
//! string, because the orchestrator rebuilds the prompt after every
//! state-mutating tool call and diffs in behavior should come from the
//! world, never from the builder.

use fableloom_core::provider::ToolDefinition;
use fableloom_core::world::WorldState;
use serde_json::json;

/// Wire names of the tools exposed to the narrator model.
pub const TOOL_MOVE_TO_LOCATION: &str = "moveToLocation";
pub const TOOL_ADVANCE_TIME: &str = "advanceTime";
pub const TOOL_DISCOVER_CHARACTER: &str = "discoverCharacter";

/// How many knowledge entries per character surface in the prompt.
pub const KNOWLEDGE_PROMPT_LIMIT: usize = 3;

/// How many recent events surface in the prompt.
pub const EVENT_PROMPT_LIMIT: usize = 5;

/// Build the system prompt from a world snapshot.
pub fn build_system_prompt(world: &WorldState) -> String {
    let scenario = world.scenario();
    let player = world.player();
    let time = world.time();

    let current_location = world
        .cluster(&player.location)
        .map(|c| c.canonical_name.as_str())
        .unwrap_or("Unknown");

    let other_locations: Vec<&str> = world
        .clusters()
        .iter()
        .filter(|c| c.id != player.location)
        .map(|c| c.canonical_name.as_str())
        .collect();
    let other_locations = if other_locations.is_empty() {
        "None yet".to_string()
    } else {
        other_locations.join(", ")
    };

    let mut prompt = format!(
        "You are the narrator and game master of \"{}\".\n\n{}\n\n\
         CURRENT LOCATION: {}\n\
         OTHER KNOWN LOCATIONS: {}\n\
         TIME: {} (tick {})\n",
        scenario.title,
        scenario.description,
        current_location,
        other_locations,
        time.narrative_time,
        time.tick,
    );

    let (discovered, undiscovered) = world.present_characters(&player.location);

    prompt.push_str("\nCHARACTERS PRESENT:\n");
    if discovered.is_empty() {
        prompt.push_str("(No one else is here)\n");
    } else {
        for character in &discovered {
            prompt.push_str(&format!("- {}: {}\n", character.name, character.description));
            let known = character.recent_knowledge(KNOWLEDGE_PROMPT_LIMIT);
            if !known.is_empty() {
                let joined: Vec<&str> = known.iter().map(|k| k.content.as_str()).collect();
                prompt.push_str(&format!("  Knows: {}\n", joined.join("; ")));
            }
        }
    }

    if !undiscovered.is_empty() {
        let names: Vec<&str> = undiscovered.iter().map(|c| c.name.as_str()).collect();
        prompt.push_str(&format!(
            "\nUnseen, but present at this location: {}.\n",
            names.join(", ")
        ));
    }

    let events = world.recent_events(EVENT_PROMPT_LIMIT);
    if !events.is_empty() {
        prompt.push_str("\nRECENT EVENTS:\n");
        for event in events {
            prompt.push_str(&format!("- {}\n", event.description));
        }
    }

    prompt.push_str(INSTRUCTIONS);
    prompt
}

/// The static instruction sections, appended verbatim after the world state.
const INSTRUCTIONS: &str = "\n\
YOUR ROLE:\n\
Narrate the world in second person, present tense. You control every \
character except the player; the player controls only themselves. React to \
what the player says and does, keep the fiction moving, and ground every \
reply in the world state above.\n\
\n\
TOOL USAGE:\n\
- When the player travels somewhere, call moveToLocation with where they \
are going, the narrative time on arrival, and any companions going along.\n\
- When time passes without travel (resting, waiting, a long conversation), \
call advanceTime.\n\
- Never narrate a journey or a jump in time without the matching tool \
call; the world will not follow.\n\
\n\
CHARACTER DISCOVERY:\n\
Before a character who has not yet been introduced speaks or acts on \
screen, call discoverCharacter with their name, a one-line introduction, \
and what they want. Characters listed as unseen above are in the scene but \
unnoticed; introduce them this way the moment they matter.\n\
\n\
NARRATOR CONSTRAINTS:\n\
- Never speak or decide for the player.\n\
- Keep each reply to a few paragraphs; end on something the player can \
react to.\n\
- Stay consistent with the locations, characters, time, and events above; \
they are the truth of the world.\n\
\n\
EXAMPLES:\n\
1. The player writes \"I head over to the docks.\" You call \
moveToLocation{destination: \"the docks\", narrativeTime: \"Late \
afternoon\", accompaniedBy: []} and then narrate the walk and arrival.\n\
2. The player writes \"We rest until nightfall.\" You call \
advanceTime{narrativeTime: \"Nightfall\", ticks: 12} and then describe the \
camp as night settles.\n\
3. You want a hooded stranger to approach the table. You first call \
discoverCharacter{characterName: \"Vesna\", introduction: \"A courier with \
rain-soaked papers\", goals: \"Deliver a letter and vanish\"} and only then \
let her speak.\n";

/// Build the tool schemas offered to the narrator model.
pub fn build_tools(world: &WorldState) -> Vec<ToolDefinition> {
    let known: Vec<&str> = world
        .clusters()
        .iter()
        .map(|c| c.canonical_name.as_str())
        .collect();

    vec![
        ToolDefinition {
            name: TOOL_MOVE_TO_LOCATION.into(),
            description: format!(
                "Move the player to a destination, named freely. Known places: {}.",
                if known.is_empty() {
                    "none yet".to_string()
                } else {
                    known.join(", ")
                }
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "destination": {
                        "type": "string",
                        "description": "Where the player is going, in their own words"
                    },
                    "narrativeTime": {
                        "type": "string",
                        "description": "Time of day on arrival, e.g. \"Midday\""
                    },
                    "accompaniedBy": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Names of characters travelling with the player"
                    }
                },
                "required": ["destination", "narrativeTime", "accompaniedBy"]
            }),
        },
        ToolDefinition {
            name: TOOL_ADVANCE_TIME.into(),
            description: "Advance in-world time without moving anywhere.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "narrativeTime": {
                        "type": "string",
                        "description": "The new time of day, e.g. \"Nightfall\""
                    },
                    "ticks": {
                        "type": "number",
                        "description": "How many ticks pass"
                    }
                },
                "required": ["narrativeTime", "ticks"]
            }),
        },
        ToolDefinition {
            name: TOOL_DISCOVER_CHARACTER.into(),
            description: "Introduce a character into the scene, new or previously unseen.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "characterName": {
                        "type": "string",
                        "description": "The character's name"
                    },
                    "introduction": {
                        "type": "string",
                        "description": "A one-line description of who they are"
                    },
                    "goals": {
                        "type": "string",
                        "description": "What they currently want"
                    }
                },
                "required": ["characterName", "introduction", "goals"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use fableloom_core::scenario::ScenarioFile;
    use fableloom_core::world::{KnowledgeEntry, KnowledgeSource, World};

    fn tavern_world() -> World {
        let file: ScenarioFile = serde_json::from_value(serde_json::json!({
            "title": "The Dusty Tankard",
            "description": "A roadside tavern with secrets.",
            "initialNarrativeTime": "Early evening",
            "locations": [
                { "canonicalName": "The Dusty Tankard" },
                { "canonicalName": "The Market" }
            ],
            "characters": [
                { "name": "Wren", "description": "A storyteller",
                  "locationRef": "The Dusty Tankard", "isPlayer": true },
                { "name": "Grim", "description": "The taciturn barkeep",
                  "goals": "Keep the peace", "locationRef": "The Dusty Tankard",
                  "isDiscovered": true }
            ],
            "playerStartingLocation": "The Dusty Tankard"
        }))
        .unwrap();
        World::new(file.to_world_state().unwrap())
    }

    #[test]
    fn header_and_location_slots() {
        let prompt = build_system_prompt(&tavern_world().snapshot());
        assert!(prompt.contains("\"The Dusty Tankard\""));
        assert!(prompt.contains("A roadside tavern with secrets."));
        assert!(prompt.contains("CURRENT LOCATION: The Dusty Tankard"));
        assert!(prompt.contains("OTHER KNOWN LOCATIONS: The Market"));
        assert!(prompt.contains("TIME: Early evening (tick 0)"));
    }

    #[test]
    fn no_other_locations_reads_none_yet() {
        let world = tavern_world();
        // a world with just the tavern
        let file: ScenarioFile = serde_json::from_value(serde_json::json!({
            "title": "t", "description": "d", "initialNarrativeTime": "Dawn",
            "locations": [{ "canonicalName": "Home" }],
            "characters": [
                { "name": "Wren", "description": "", "locationRef": "Home", "isPlayer": true }
            ],
            "playerStartingLocation": "Home"
        }))
        .unwrap();
        let lonely = World::new(file.to_world_state().unwrap());
        let prompt = build_system_prompt(&lonely.snapshot());
        assert!(prompt.contains("OTHER KNOWN LOCATIONS: None yet"));
        // sanity: the two-location world does not
        assert!(!build_system_prompt(&world.snapshot()).contains("None yet"));
    }

    #[test]
    fn characters_present_lists_discovered_with_knowledge() {
        let world = tavern_world();
        let grim = world.snapshot().character_by_name("Grim").unwrap().id.clone();
        for i in 0..4 {
            world
                .append_knowledge(
                    &grim,
                    KnowledgeEntry::new(format!("fact {i}"), i, KnowledgeSource::Told, None),
                )
                .unwrap();
        }
        let prompt = build_system_prompt(&world.snapshot());
        assert!(prompt.contains("- Grim: The taciturn barkeep"));
        // exactly the last three, joined by "; "
        assert!(prompt.contains("Knows: fact 1; fact 2; fact 3"));
        assert!(!prompt.contains("fact 0"));
    }

    #[test]
    fn empty_scene_reads_no_one_else_is_here() {
        let world = tavern_world();
        let market = world.snapshot().cluster_by_name("The Market").unwrap().id.clone();
        world.move_player_to(&market).unwrap();
        let prompt = build_system_prompt(&world.snapshot());
        assert!(prompt.contains("(No one else is here)"));
        assert!(!prompt.contains("- Grim:"));
    }

    #[test]
    fn undiscovered_characters_get_the_hidden_hint() {
        let world = tavern_world();
        let at = world.snapshot().player().location.clone();
        world
            .introduce_character("Aldo", "A pickpocket", "", &at, false, None)
            .unwrap();
        let prompt = build_system_prompt(&world.snapshot());
        assert!(prompt.contains("Unseen, but present at this location: Aldo."));
        assert!(!prompt.contains("- Aldo:"));
    }

    #[test]
    fn events_section_absent_when_empty() {
        let prompt = build_system_prompt(&tavern_world().snapshot());
        assert!(!prompt.contains("RECENT EVENTS"));
    }

    #[test]
    fn events_section_shows_exactly_last_five_in_order() {
        let world = tavern_world();
        for i in 0..7 {
            world.append_event(&format!("event {i}"), i);
        }
        let prompt = build_system_prompt(&world.snapshot());
        assert!(!prompt.contains("- event 1\n"));
        assert!(prompt.contains("- event 2\n"));
        assert!(prompt.contains("- event 6\n"));
        let pos2 = prompt.find("- event 2").unwrap();
        let pos6 = prompt.find("- event 6").unwrap();
        assert!(pos2 < pos6, "events appear in chronological order");
    }

    #[test]
    fn prompt_is_deterministic_for_a_snapshot() {
        let snapshot = tavern_world().snapshot();
        assert_eq!(build_system_prompt(&snapshot), build_system_prompt(&snapshot));
    }

    #[test]
    fn tool_schemas_use_exact_field_names() {
        let tools = build_tools(&tavern_world().snapshot());
        assert_eq!(tools.len(), 3);

        let mv = tools.iter().find(|t| t.name == TOOL_MOVE_TO_LOCATION).unwrap();
        let props = &mv.parameters["properties"];
        assert!(props.get("destination").is_some());
        assert!(props.get("narrativeTime").is_some());
        assert!(props.get("accompaniedBy").is_some());

        let advance = tools.iter().find(|t| t.name == TOOL_ADVANCE_TIME).unwrap();
        assert!(advance.parameters["properties"].get("ticks").is_some());

        let discover = tools
            .iter()
            .find(|t| t.name == TOOL_DISCOVER_CHARACTER)
            .unwrap();
        assert!(discover.parameters["properties"].get("characterName").is_some());
        assert!(discover.parameters["properties"].get("introduction").is_some());
        assert!(discover.parameters["properties"].get("goals").is_some());
    }

    #[test]
    fn move_tool_description_names_known_places() {
        let tools = build_tools(&tavern_world().snapshot());
        let mv = tools.iter().find(|t| t.name == TOOL_MOVE_TO_LOCATION).unwrap();
        assert!(mv.description.contains("The Dusty Tankard"));
        assert!(mv.description.contains("The Market"));
    }
}
