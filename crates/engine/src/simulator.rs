//! Off-screen simulation — the lives of characters the player is not
//! watching.
//!
//! When the player changes location after enough ticks have passed, each
//! group of at least two non-player characters sharing a cluster (a cohort)
//! gets a simulation pass: either a one-line summary of what they were up
//! to, or a full pass that scripts a dialogue and then extracts events and
//! movements from it. Outcomes are folded back into the world so the next
//! prompt reflects them.
//!
//! Provider failures here are logged and swallowed: off-screen life must
//! never fail the player's turn.

use crate::COMPLETION_MAX_TOKENS;
use fableloom_core::message::Message;
use fableloom_core::provider::{Provider, ProviderRequest, ToolChoice, ToolDefinition};
use fableloom_core::world::{
    Character, ClusterId, KnowledgeEntry, KnowledgeSource, World, WorldState,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Minimum ticks between simulation passes.
pub const SIM_MIN_ELAPSED_TICKS: u64 = 5;

/// Internal tool used only for extraction; never exposed to the narrator.
const TOOL_REPORT_SIMULATION: &str = "reportSimulation";

/// Upper bound on scripted dialogue exchanges per cohort.
const MAX_DIALOGUE_TURNS: u64 = 8;

/// How deep a simulation pass goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationDepth {
    None,
    Summary,
    Full,
}

/// Pick the simulation depth from the elapsed ticks and the plot-point
/// predicate.
///
/// The predicate is plumbed through from the caller; nothing currently sets
/// it, so the middle band always resolves to a summary in practice.
pub fn depth_for(elapsed_ticks: u64, has_unresolved_plot_points: bool) -> SimulationDepth {
    match elapsed_ticks {
        0..=10 => SimulationDepth::None,
        11..=20 => {
            if has_unresolved_plot_points {
                SimulationDepth::Full
            } else {
                SimulationDepth::Summary
            }
        }
        _ => SimulationDepth::Full,
    }
}

/// Number of scripted exchanges for a full pass.
pub fn dialogue_turns(elapsed_ticks: u64) -> u64 {
    (elapsed_ticks / 2).min(MAX_DIALOGUE_TURNS).max(1)
}

#[derive(Debug, Deserialize)]
struct ReportSimulationArgs {
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    movements: Vec<ReportedMovement>,
}

#[derive(Debug, Deserialize)]
struct ReportedMovement {
    #[serde(rename = "characterName")]
    character_name: String,
    #[serde(rename = "destinationName")]
    destination_name: String,
}

/// Runs simulation passes and writes the outcomes back into the world.
pub struct OffscreenSimulator {
    provider: Arc<dyn Provider>,
    model: String,
}

impl OffscreenSimulator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Run one simulation pass over every cohort.
    ///
    /// `player_was_at` is where the player spent the simulated window —
    /// their location before the move that triggered this pass. Characters
    /// there were on screen, so that cluster forms no cohort even if the
    /// player has since left it.
    ///
    /// Returns true when a pass actually ran (depth was not `None`), so the
    /// caller knows whether to reset its elapsed-tick bookkeeping.
    pub async fn run(
        &self,
        world: &World,
        elapsed_ticks: u64,
        has_unresolved_plot_points: bool,
        player_was_at: &ClusterId,
    ) -> bool {
        let depth = depth_for(elapsed_ticks, has_unresolved_plot_points);
        if depth == SimulationDepth::None {
            debug!(elapsed_ticks, "Too little time has passed for a simulation pass");
            return false;
        }

        let snapshot = world.snapshot();
        let cohorts = cohorts(&snapshot, player_was_at);
        info!(
            elapsed_ticks,
            ?depth,
            cohorts = cohorts.len(),
            "Running off-screen simulation"
        );

        for (cluster_id, members) in cohorts {
            let cluster_name = snapshot
                .cluster(&cluster_id)
                .map(|c| c.canonical_name.clone())
                .unwrap_or_default();
            match depth {
                SimulationDepth::Summary => {
                    self.simulate_summary(world, &snapshot, &cluster_name, &members)
                        .await;
                }
                SimulationDepth::Full => {
                    self.simulate_full(world, &snapshot, &cluster_name, &members, elapsed_ticks)
                        .await;
                }
                SimulationDepth::None => unreachable!(),
            }
        }

        true
    }

    /// Summary mode: one completion, one event.
    async fn simulate_summary(
        &self,
        world: &World,
        snapshot: &WorldState,
        cluster_name: &str,
        members: &[Character],
    ) {
        let user_message = format!(
            "Setting: {}\n\nAt {} are:\n{}\nIn one or two sentences, what \
             have they been doing together while the story looked elsewhere?",
            snapshot.scenario().description,
            cluster_name,
            describe_members(members),
        );

        match self.complete_text(user_message).await {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    world.append_event(text, snapshot.time().tick);
                }
            }
            Err(e) => warn!(error = %e, cluster = cluster_name, "Summary simulation failed"),
        }
    }

    /// Full mode: script a dialogue, then extract events and movements.
    async fn simulate_full(
        &self,
        world: &World,
        snapshot: &WorldState,
        cluster_name: &str,
        members: &[Character],
        elapsed_ticks: u64,
    ) {
        let turns = dialogue_turns(elapsed_ticks);
        let dialogue_prompt = format!(
            "Setting: {}\n\nAt {} are:\n{}\nWrite the conversation they have \
             been having, exactly {} exchanges long. Format every line as \
             CHARACTER_NAME: \"spoken line\" and put physical actions between \
             asterisks. If anyone decides to leave for another place, they \
             must say so out loud in the dialogue.",
            snapshot.scenario().description,
            cluster_name,
            describe_members(members),
            turns,
        );

        let dialogue = match self.complete_text(dialogue_prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, cluster = cluster_name, "Dialogue generation failed");
                return;
            }
        };

        let cluster_names: Vec<&str> = snapshot
            .clusters()
            .iter()
            .map(|c| c.canonical_name.as_str())
            .collect();
        let extraction_prompt = format!(
            "Here is a conversation that took place at {}:\n\n{}\n\n\
             Report the noteworthy events and any movements. A movement's \
             destinationName must be one of: {}.",
            cluster_name,
            dialogue,
            cluster_names.join(", "),
        );

        let request = ProviderRequest {
            model: self.model.clone(),
            messages: vec![Message::user(extraction_prompt)],
            max_tokens: Some(COMPLETION_MAX_TOKENS),
            tools: vec![report_simulation_tool()],
            tool_choice: Some(ToolChoice::Required),
            stream: false,
        };

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, cluster = cluster_name, "Simulation extraction failed");
                return;
            }
        };

        let Some(call) = response
            .message
            .tool_calls
            .iter()
            .find(|tc| tc.name == TOOL_REPORT_SIMULATION)
        else {
            warn!(cluster = cluster_name, "Extraction returned no report, skipping cohort");
            return;
        };

        let report: ReportSimulationArgs = match serde_json::from_str(&call.arguments) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, cluster = cluster_name, "Malformed simulation report");
                return;
            }
        };

        self.apply_report(world, snapshot, cluster_name, members, report);
    }

    /// Fold an extraction report back into the world.
    fn apply_report(
        &self,
        world: &World,
        snapshot: &WorldState,
        cluster_name: &str,
        members: &[Character],
        report: ReportSimulationArgs,
    ) {
        let tick = snapshot.time().tick;

        for event in &report.events {
            let event = event.trim();
            if !event.is_empty() {
                world.append_event(event, tick);
            }
        }

        for movement in &report.movements {
            let Some(destination) = snapshot.cluster_by_name(&movement.destination_name) else {
                debug!(
                    destination = %movement.destination_name,
                    "Ignoring movement to a place that is not on the map"
                );
                continue;
            };
            let Some(character) = members
                .iter()
                .find(|m| m.name.eq_ignore_ascii_case(&movement.character_name))
            else {
                debug!(
                    character = %movement.character_name,
                    "Ignoring movement of someone outside the cohort"
                );
                continue;
            };
            if let Err(e) = world.move_character(&character.id, &destination.id) {
                warn!(error = %e, character = %character.name, "Simulated movement rejected");
            }
        }

        // Everyone in the cohort remembers the exchange.
        let recollection = if report.events.is_empty() {
            format!("Passed the time at {cluster_name} with the others")
        } else {
            report.events.join("; ")
        };
        for member in members {
            let entry =
                KnowledgeEntry::new(recollection.clone(), tick, KnowledgeSource::Witnessed, None);
            if let Err(e) = world.append_knowledge(&member.id, entry) {
                warn!(error = %e, character = %member.name, "Could not record recollection");
            }
        }
    }

    async fn complete_text(
        &self,
        user_message: String,
    ) -> Result<String, fableloom_core::error::ProviderError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: vec![Message::user(user_message)],
            max_tokens: Some(COMPLETION_MAX_TOKENS),
            tools: vec![],
            tool_choice: None,
            stream: false,
        };
        Ok(self.provider.complete(request).await?.message.content)
    }
}

/// Group non-player characters by cluster, skipping the cluster the player
/// occupied during the window and any cluster with fewer than two of them.
fn cohorts(snapshot: &WorldState, player_was_at: &ClusterId) -> Vec<(ClusterId, Vec<Character>)> {
    snapshot
        .clusters()
        .iter()
        .filter(|cluster| &cluster.id != player_was_at)
        .filter_map(|cluster| {
            let members: Vec<Character> = snapshot
                .characters()
                .iter()
                .filter(|c| !c.is_player && c.location == cluster.id)
                .cloned()
                .collect();
            (members.len() >= 2).then(|| (cluster.id.clone(), members))
        })
        .collect()
}

fn describe_members(members: &[Character]) -> String {
    members
        .iter()
        .map(|m| {
            let goals = if m.goals.is_empty() {
                "no particular aims".to_string()
            } else {
                m.goals.clone()
            };
            format!("- {}: {} (wants: {})\n", m.name, m.description, goals)
        })
        .collect()
}

fn report_simulation_tool() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_REPORT_SIMULATION.into(),
        description: "Report the events and movements that came out of the conversation.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "events": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Noteworthy things that happened, one sentence each"
                },
                "movements": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "characterName": { "type": "string" },
                            "destinationName": { "type": "string" }
                        },
                        "required": ["characterName", "destinationName"]
                    },
                    "description": "Characters who left, and where they went"
                }
            },
            "required": ["events", "movements"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fableloom_core::error::ProviderError;
    use fableloom_core::message::MessageToolCall;
    use fableloom_core::provider::ProviderResponse;
    use fableloom_core::scenario::ScenarioFile;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[test]
    fn depth_table() {
        assert_eq!(depth_for(0, false), SimulationDepth::None);
        assert_eq!(depth_for(10, false), SimulationDepth::None);
        assert_eq!(depth_for(11, false), SimulationDepth::Summary);
        assert_eq!(depth_for(20, false), SimulationDepth::Summary);
        assert_eq!(depth_for(21, false), SimulationDepth::Full);
        assert_eq!(depth_for(25, false), SimulationDepth::Full);
    }

    #[test]
    fn plot_pressure_deepens_the_middle_band() {
        assert_eq!(depth_for(15, true), SimulationDepth::Full);
        assert_eq!(depth_for(5, true), SimulationDepth::None);
    }

    #[test]
    fn dialogue_turn_formula() {
        assert_eq!(dialogue_turns(1), 1);
        assert_eq!(dialogue_turns(6), 3);
        assert_eq!(dialogue_turns(25), 8); // min(12, 8)
        assert_eq!(dialogue_turns(100), 8);
    }

    /// Scripted provider: pops canned responses in order.
    struct ScriptedProvider {
        responses: Mutex<VecDeque<ProviderResponse>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ProviderResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProviderError::NotConfigured("script exhausted".into()))
        }
    }

    fn text_response(text: &str) -> ProviderResponse {
        ProviderResponse {
            message: Message::assistant(text),
            model: "test".into(),
        }
    }

    fn report_response(arguments: &str) -> ProviderResponse {
        let mut message = Message::assistant("");
        message.tool_calls = vec![MessageToolCall {
            id: "call_1".into(),
            name: TOOL_REPORT_SIMULATION.into(),
            arguments: arguments.into(),
        }];
        ProviderResponse {
            message,
            model: "test".into(),
        }
    }

    fn two_cluster_world() -> World {
        let file: ScenarioFile = serde_json::from_value(serde_json::json!({
            "title": "The Dusty Tankard",
            "description": "A roadside tavern with secrets.",
            "initialNarrativeTime": "Early evening",
            "locations": [
                { "canonicalName": "The Dusty Tankard" },
                { "canonicalName": "The Market" },
                { "canonicalName": "The Forest" }
            ],
            "characters": [
                { "name": "Wren", "description": "A storyteller",
                  "locationRef": "The Market", "isPlayer": true },
                { "name": "Grim", "description": "The barkeep",
                  "locationRef": "The Dusty Tankard", "isDiscovered": true },
                { "name": "Sera", "description": "A hunter",
                  "locationRef": "The Dusty Tankard", "isDiscovered": true }
            ],
            "playerStartingLocation": "The Market"
        }))
        .unwrap();
        World::new(file.to_world_state().unwrap())
    }

    #[test]
    fn cohort_formation_skips_player_window_and_singletons() {
        let world = two_cluster_world();
        let snapshot = world.snapshot();
        let market = snapshot.cluster_by_name("The Market").unwrap().id.clone();
        let groups = cohorts(&snapshot, &market);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.len(), 2);

        // the cluster the player occupied forms no cohort
        let tankard = snapshot.cluster_by_name("The Dusty Tankard").unwrap().id.clone();
        assert!(cohorts(&snapshot, &tankard).is_empty());

        // move Sera away — no cohort of two remains anywhere
        let sera = snapshot.character_by_name("Sera").unwrap().id.clone();
        let forest = snapshot.cluster_by_name("The Forest").unwrap().id.clone();
        world.move_character(&sera, &forest).unwrap();
        assert!(cohorts(&world.snapshot(), &market).is_empty());
    }

    #[tokio::test]
    async fn summary_mode_appends_one_event() {
        let world = two_cluster_world();
        world.advance_time(15, "Night");
        let provider = ScriptedProvider::new(vec![text_response(
            "Grim and Sera traded rumors about the road.",
        )]);
        let simulator = OffscreenSimulator::new(provider, "test-model");

        let market = world.snapshot().cluster_by_name("The Market").unwrap().id.clone();
        let ran = simulator.run(&world, 15, false, &market).await;
        assert!(ran);

        let snapshot = world.snapshot();
        assert_eq!(snapshot.events().len(), 1);
        assert_eq!(
            snapshot.events()[0].description,
            "Grim and Sera traded rumors about the road."
        );
        assert_eq!(snapshot.events()[0].at_tick, 15);
    }

    #[tokio::test]
    async fn full_mode_extracts_events_movements_and_memories() {
        let world = two_cluster_world();
        world.advance_time(25, "Night");
        let provider = ScriptedProvider::new(vec![
            text_response("GRIM: \"The dragon is real.\"\nSERA: \"Then I hunt it. I'm off to the forest.\" *shoulders her bow*"),
            report_response(
                r#"{"events":["Grim and Sera argued about the dragon"],"movements":[{"characterName":"Sera","destinationName":"the forest"}]}"#,
            ),
        ]);
        let simulator = OffscreenSimulator::new(provider, "test-model");

        let market = world.snapshot().cluster_by_name("The Market").unwrap().id.clone();
        let ran = simulator.run(&world, 25, false, &market).await;
        assert!(ran);

        let snapshot = world.snapshot();
        assert_eq!(snapshot.events().len(), 1);
        assert!(snapshot.events()[0].description.contains("argued about the dragon"));

        // Sera moved (case-insensitive destination match); Grim stayed
        let sera = snapshot.character_by_name("Sera").unwrap();
        let forest = snapshot.cluster_by_name("The Forest").unwrap();
        assert_eq!(sera.location, forest.id);
        let grim = snapshot.character_by_name("Grim").unwrap();
        assert_eq!(
            grim.location,
            snapshot.cluster_by_name("The Dusty Tankard").unwrap().id
        );

        // both remember the exchange as witnessed
        for name in ["Grim", "Sera"] {
            let character = snapshot.character_by_name(name).unwrap();
            assert_eq!(character.knowledge.len(), 1);
            assert_eq!(character.knowledge[0].source, KnowledgeSource::Witnessed);
            assert!(character.knowledge[0].content.contains("dragon"));
        }
    }

    #[tokio::test]
    async fn unmatched_movement_destinations_are_ignored() {
        let world = two_cluster_world();
        world.advance_time(25, "Night");
        let provider = ScriptedProvider::new(vec![
            text_response("GRIM: \"I'm leaving for the capital.\""),
            report_response(
                r#"{"events":[],"movements":[{"characterName":"Grim","destinationName":"The Capital"}]}"#,
            ),
        ]);
        let simulator = OffscreenSimulator::new(provider, "test-model");
        let market = world.snapshot().cluster_by_name("The Market").unwrap().id.clone();
        simulator.run(&world, 25, false, &market).await;

        let snapshot = world.snapshot();
        let grim = snapshot.character_by_name("Grim").unwrap();
        assert_eq!(
            grim.location,
            snapshot.cluster_by_name("The Dusty Tankard").unwrap().id,
            "movement to an unknown place is ignored"
        );
    }

    #[tokio::test]
    async fn provider_failure_never_poisons_the_world() {
        let world = two_cluster_world();
        world.advance_time(15, "Night");
        let provider = ScriptedProvider::new(vec![]); // script exhausted = error
        let simulator = OffscreenSimulator::new(provider, "test-model");

        let market = world.snapshot().cluster_by_name("The Market").unwrap().id.clone();
        let ran = simulator.run(&world, 15, false, &market).await;
        assert!(ran, "the pass ran even though the provider failed");
        assert!(world.snapshot().events().is_empty());
    }

    #[tokio::test]
    async fn below_threshold_elapsed_does_not_run() {
        let world = two_cluster_world();
        let provider = ScriptedProvider::new(vec![]);
        let simulator = OffscreenSimulator::new(provider, "test-model");
        let market = world.snapshot().cluster_by_name("The Market").unwrap().id.clone();
        assert!(!simulator.run(&world, 8, false, &market).await);
    }
}
