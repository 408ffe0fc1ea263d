//! The world model — entities, invariants, and the session mutation surface.
//!
//! Entities are stored flat and reference each other by opaque id; nothing
//! is embedded inside anything else. The [`World`] handle owns one
//! [`WorldState`] behind a single lock: every mutation passes through it,
//! and readers copy a snapshot so the prompt builder and simulator always
//! see a consistent world.
//!
//! Invariants maintained by the mutation surface:
//! - exactly one character has `is_player == true`
//! - every character's location references an existing cluster
//! - `is_discovered` only ever transitions false → true
//! - the tick counter is monotonically non-decreasing
//! - `narrative_time` is never empty once initialized
//! - knowledge and event sequences are append-only journals

use crate::error::WorldError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Opaque, session-stable identifier for a location cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub String);

impl ClusterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ClusterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for a character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub String);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The immutable framing of a session: what story is being told.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub title: String,
    pub description: String,
    pub initial_narrative_time: String,
}

/// A named location. The unit of spatial co-location for characters.
///
/// Clusters are created only at scenario initialization or by the location
/// resolver; ids are stable for the session and canonical names are chosen
/// once at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationCluster {
    pub id: ClusterId,
    pub canonical_name: String,
}

/// Provenance tag for a knowledge entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeSource {
    Witnessed,
    Told,
    Inferred,
}

/// A timestamped memory attached to a character.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub content: String,
    pub acquired_at_tick: u64,
    pub source: KnowledgeSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_character: Option<CharacterId>,
}

impl KnowledgeEntry {
    pub fn new(
        content: impl Into<String>,
        acquired_at_tick: u64,
        source: KnowledgeSource,
        source_character: Option<CharacterId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            acquired_at_tick,
            source,
            source_character,
        }
    }
}

/// A character in the world — the player included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub description: String,
    pub location: ClusterId,
    /// Append-only journal; prompts only surface the most recent entries.
    pub knowledge: Vec<KnowledgeEntry>,
    #[serde(default)]
    pub relationships: Vec<String>,
    pub is_player: bool,
    /// Whether the player has met this character. Monotonic: never unset.
    pub is_discovered: bool,
    /// Chance (0..1) the character shows up in encounters.
    pub encounter_chance: f32,
    pub goals: String,
    /// Provenance: which message introduced this character mid-session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_message_id: Option<String>,
}

impl Character {
    /// The most recent `n` knowledge entries, oldest first.
    ///
    /// This is a view: older entries persist in the journal but are pruned
    /// at prompt time.
    pub fn recent_knowledge(&self, n: usize) -> &[KnowledgeEntry] {
        let start = self.knowledge.len().saturating_sub(n);
        &self.knowledge[start..]
    }
}

/// Simulated time: an integer tick counter plus a human-readable phrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldTime {
    pub tick: u64,
    pub narrative_time: String,
}

/// A world-level observation appended by the off-screen simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldEvent {
    pub description: String,
    pub at_tick: u64,
}

/// The complete mutable state of one session's world.
///
/// All fields are private; reads go through the query methods and writes
/// through the [`World`] handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldState {
    scenario: Scenario,
    clusters: Vec<LocationCluster>,
    characters: Vec<Character>,
    events: Vec<WorldEvent>,
    time: WorldTime,
    player_id: CharacterId,
}

impl WorldState {
    /// Assemble a world from parts, validating every invariant once.
    pub(crate) fn build(
        scenario: Scenario,
        clusters: Vec<LocationCluster>,
        characters: Vec<Character>,
    ) -> Result<Self, WorldError> {
        let mut players = characters.iter().filter(|c| c.is_player);
        let player_id = match (players.next(), players.next()) {
            (Some(p), None) => p.id.clone(),
            (None, _) => return Err(WorldError::NoPlayer),
            (Some(_), Some(_)) => return Err(WorldError::DuplicatePlayer),
        };

        for character in &characters {
            if !clusters.iter().any(|cl| cl.id == character.location) {
                return Err(WorldError::UnknownCluster(character.location.to_string()));
            }
        }

        if scenario.initial_narrative_time.is_empty() {
            return Err(WorldError::BadScenario(
                "initial narrative time must not be empty".into(),
            ));
        }

        let time = WorldTime {
            tick: 0,
            narrative_time: scenario.initial_narrative_time.clone(),
        };

        Ok(Self {
            scenario,
            clusters,
            characters,
            events: Vec::new(),
            time,
            player_id,
        })
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn time(&self) -> &WorldTime {
        &self.time
    }

    pub fn clusters(&self) -> &[LocationCluster] {
        &self.clusters
    }

    pub fn cluster(&self, id: &ClusterId) -> Option<&LocationCluster> {
        self.clusters.iter().find(|c| &c.id == id)
    }

    /// Case-insensitive canonical-name lookup.
    pub fn cluster_by_name(&self, name: &str) -> Option<&LocationCluster> {
        self.clusters
            .iter()
            .find(|c| c.canonical_name.eq_ignore_ascii_case(name))
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn character(&self, id: &CharacterId) -> Option<&Character> {
        self.characters.iter().find(|c| &c.id == id)
    }

    /// Case-insensitive name lookup.
    pub fn character_by_name(&self, name: &str) -> Option<&Character> {
        self.characters
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// The player character. Guaranteed by construction: exactly one
    /// character is the player and characters are never removed.
    pub fn player(&self) -> &Character {
        self.character(&self.player_id)
            .expect("player character exists by construction")
    }

    /// Non-player characters at a cluster, split (discovered, undiscovered).
    pub fn present_characters(&self, at: &ClusterId) -> (Vec<&Character>, Vec<&Character>) {
        let mut discovered = Vec::new();
        let mut undiscovered = Vec::new();
        for c in self.characters.iter().filter(|c| !c.is_player) {
            if &c.location == at {
                if c.is_discovered {
                    discovered.push(c);
                } else {
                    undiscovered.push(c);
                }
            }
        }
        (discovered, undiscovered)
    }

    /// The most recent `n` events, oldest first.
    pub fn recent_events(&self, n: usize) -> &[WorldEvent] {
        let start = self.events.len().saturating_sub(n);
        &self.events[start..]
    }

    pub fn events(&self) -> &[WorldEvent] {
        &self.events
    }

    // ── Mutations (called under the World handle's lock) ─────────────────

    fn advance_time(&mut self, ticks: u64, narrative_time: &str) {
        self.time.tick += ticks;
        if !narrative_time.is_empty() {
            self.time.narrative_time = narrative_time.to_string();
        }
    }

    fn move_character_to(
        &mut self,
        id: &CharacterId,
        cluster: &ClusterId,
    ) -> Result<(), WorldError> {
        if self.cluster(cluster).is_none() {
            return Err(WorldError::UnknownCluster(cluster.to_string()));
        }
        let character = self
            .characters
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| WorldError::UnknownCharacter(id.to_string()))?;
        character.location = cluster.clone();
        Ok(())
    }

    fn add_location(&mut self, canonical_name: &str) -> ClusterId {
        let cluster = LocationCluster {
            id: ClusterId::new(),
            canonical_name: canonical_name.to_string(),
        };
        let id = cluster.id.clone();
        self.clusters.push(cluster);
        id
    }

    /// Returns true when the character was newly discovered.
    fn discover_character(&mut self, id: &CharacterId) -> Result<bool, WorldError> {
        let character = self
            .characters
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| WorldError::UnknownCharacter(id.to_string()))?;
        let newly = !character.is_discovered;
        character.is_discovered = true;
        Ok(newly)
    }

    fn update_character_profile(
        &mut self,
        id: &CharacterId,
        description: &str,
        goals: &str,
    ) -> Result<(), WorldError> {
        let character = self
            .characters
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| WorldError::UnknownCharacter(id.to_string()))?;
        if !description.is_empty() {
            character.description = description.to_string();
        }
        if !goals.is_empty() {
            character.goals = goals.to_string();
        }
        Ok(())
    }

    fn introduce_character(
        &mut self,
        name: &str,
        description: &str,
        goals: &str,
        at: &ClusterId,
        discovered: bool,
        created_by_message_id: Option<String>,
    ) -> Result<CharacterId, WorldError> {
        if self.cluster(at).is_none() {
            return Err(WorldError::UnknownCluster(at.to_string()));
        }
        let character = Character {
            id: CharacterId::new(),
            name: name.to_string(),
            description: description.to_string(),
            location: at.clone(),
            knowledge: Vec::new(),
            relationships: Vec::new(),
            is_player: false,
            is_discovered: discovered,
            encounter_chance: 1.0,
            goals: goals.to_string(),
            created_by_message_id,
        };
        let id = character.id.clone();
        self.characters.push(character);
        Ok(id)
    }

    fn append_knowledge(
        &mut self,
        id: &CharacterId,
        entry: KnowledgeEntry,
    ) -> Result<(), WorldError> {
        let character = self
            .characters
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| WorldError::UnknownCharacter(id.to_string()))?;
        character.knowledge.push(entry);
        Ok(())
    }

    fn append_event(&mut self, description: &str, at_tick: u64) {
        self.events.push(WorldEvent {
            description: description.to_string(),
            at_tick,
        });
    }
}

/// The shared handle to one session's world.
///
/// Cheap to clone; all clones see the same state. A single lock linearizes
/// mutations, and `snapshot()` copies the state under that lock so readers
/// never observe a half-applied change.
#[derive(Clone)]
pub struct World {
    inner: Arc<Mutex<WorldState>>,
}

impl World {
    pub fn new(state: WorldState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WorldState> {
        self.inner.lock().expect("world lock poisoned")
    }

    /// Copy the current state. Holds the lock only for the clone.
    pub fn snapshot(&self) -> WorldState {
        self.lock().clone()
    }

    /// Add `ticks` to the clock; a non-empty `narrative_time` replaces the
    /// current phrase, an empty one retains it. `advance_time(0, "")` is a
    /// no-op.
    pub fn advance_time(&self, ticks: u64, narrative_time: &str) {
        self.lock().advance_time(ticks, narrative_time);
    }

    pub fn move_player_to(&self, cluster: &ClusterId) -> Result<(), WorldError> {
        let mut state = self.lock();
        let player_id = state.player_id.clone();
        state.move_character_to(&player_id, cluster)
    }

    pub fn move_character(&self, id: &CharacterId, cluster: &ClusterId) -> Result<(), WorldError> {
        self.lock().move_character_to(id, cluster)
    }

    pub fn add_location(&self, canonical_name: &str) -> ClusterId {
        self.lock().add_location(canonical_name)
    }

    /// Idempotent: discovering a discovered character changes nothing.
    /// Returns true when the flag actually flipped.
    pub fn discover_character(&self, id: &CharacterId) -> Result<bool, WorldError> {
        self.lock().discover_character(id)
    }

    /// Update a character's description and goals; empty strings retain the
    /// current values.
    pub fn update_character_profile(
        &self,
        id: &CharacterId,
        description: &str,
        goals: &str,
    ) -> Result<(), WorldError> {
        self.lock().update_character_profile(id, description, goals)
    }

    /// Create a character not listed in the scenario.
    pub fn introduce_character(
        &self,
        name: &str,
        description: &str,
        goals: &str,
        at: &ClusterId,
        discovered: bool,
        created_by_message_id: Option<String>,
    ) -> Result<CharacterId, WorldError> {
        self.lock()
            .introduce_character(name, description, goals, at, discovered, created_by_message_id)
    }

    pub fn append_knowledge(
        &self,
        id: &CharacterId,
        entry: KnowledgeEntry,
    ) -> Result<(), WorldError> {
        self.lock().append_knowledge(id, entry)
    }

    pub fn append_event(&self, description: &str, at_tick: u64) {
        self.lock().append_event(description, at_tick);
    }
}
