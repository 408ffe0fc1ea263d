//! Scenario import/export — the external JSON format a session starts from.
//!
//! The file format references locations by canonical name; ids are minted
//! at import time and are session-local. Export reverses the mapping so a
//! session's world can be carried back out.

use crate::error::WorldError;
use crate::world::{Character, CharacterId, ClusterId, LocationCluster, Scenario, WorldState};
use serde::{Deserialize, Serialize};

/// The on-disk scenario format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioFile {
    pub title: String,
    pub description: String,
    pub initial_narrative_time: String,
    pub locations: Vec<ScenarioLocation>,
    pub characters: Vec<ScenarioCharacter>,
    /// Canonical name of the cluster the player starts at.
    pub player_starting_location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioLocation {
    pub canonical_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioCharacter {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub goals: String,
    /// Canonical name of the cluster this character starts at.
    pub location_ref: String,
    #[serde(default)]
    pub is_player: bool,
    #[serde(default = "default_encounter_chance")]
    pub encounter_chance: f32,
    #[serde(default)]
    pub is_discovered: bool,
}

fn default_encounter_chance() -> f32 {
    1.0
}

impl ScenarioFile {
    /// Mint ids, resolve name references, and build a validated world.
    pub fn to_world_state(&self) -> Result<WorldState, WorldError> {
        let clusters: Vec<LocationCluster> = self
            .locations
            .iter()
            .map(|l| LocationCluster {
                id: ClusterId::new(),
                canonical_name: l.canonical_name.clone(),
            })
            .collect();

        let resolve = |name: &str| -> Result<ClusterId, WorldError> {
            clusters
                .iter()
                .find(|c| c.canonical_name.eq_ignore_ascii_case(name))
                .map(|c| c.id.clone())
                .ok_or_else(|| WorldError::BadScenario(format!("unknown location '{name}'")))
        };

        let mut characters = Vec::with_capacity(self.characters.len());
        for spec in &self.characters {
            let location = if spec.is_player {
                resolve(&self.player_starting_location)?
            } else {
                resolve(&spec.location_ref)?
            };
            characters.push(Character {
                id: CharacterId::new(),
                name: spec.name.clone(),
                description: spec.description.clone(),
                location,
                knowledge: Vec::new(),
                relationships: Vec::new(),
                is_player: spec.is_player,
                // the player is always visible to themselves
                is_discovered: spec.is_discovered || spec.is_player,
                encounter_chance: spec.encounter_chance.clamp(0.0, 1.0),
                goals: spec.goals.clone(),
                created_by_message_id: None,
            });
        }

        WorldState::build(
            Scenario {
                title: self.title.clone(),
                description: self.description.clone(),
                initial_narrative_time: self.initial_narrative_time.clone(),
            },
            clusters,
            characters,
        )
    }
}

impl WorldState {
    /// Export the current world back to the file format.
    ///
    /// Ids do not survive the round trip; references become canonical names
    /// again. Knowledge journals and events are session state, not scenario
    /// content, so they are not exported.
    pub fn to_scenario_file(&self) -> ScenarioFile {
        let cluster_name = |id: &ClusterId| -> String {
            self.cluster(id)
                .map(|c| c.canonical_name.clone())
                .unwrap_or_default()
        };

        ScenarioFile {
            title: self.scenario().title.clone(),
            description: self.scenario().description.clone(),
            initial_narrative_time: self.time().narrative_time.clone(),
            locations: self
                .clusters()
                .iter()
                .map(|c| ScenarioLocation {
                    canonical_name: c.canonical_name.clone(),
                })
                .collect(),
            characters: self
                .characters()
                .iter()
                .map(|c| ScenarioCharacter {
                    name: c.name.clone(),
                    description: c.description.clone(),
                    goals: c.goals.clone(),
                    location_ref: cluster_name(&c.location),
                    is_player: c.is_player,
                    encounter_chance: c.encounter_chance,
                    is_discovered: c.is_discovered,
                })
                .collect(),
            player_starting_location: cluster_name(&self.player().location),
        }
    }
}
