//! Per-session state: one world, one transcript, one turn at a time.

use fableloom_core::error::WorldError;
use fableloom_core::message::{ChatMessage, ChatRole};
use fableloom_core::scenario::ScenarioFile;
use fableloom_core::world::World;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One player's running story.
///
/// The session owns the world and the persisted transcript. A turn mutex
/// serializes Send/Continue/Regenerate for the session's entire streaming
/// lifetime; independent sessions proceed in parallel.
pub struct Session {
    id: String,
    model: String,
    world: World,
    chat: Mutex<Vec<ChatMessage>>,
    turn_lock: tokio::sync::Mutex<()>,
    last_sim_tick: AtomicU64,
}

impl Session {
    pub fn new(world: World, model: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            model: model.into(),
            world,
            chat: Mutex::new(Vec::new()),
            turn_lock: tokio::sync::Mutex::new(()),
            last_sim_tick: AtomicU64::new(0),
        })
    }

    /// Import a scenario file and start a fresh session on it.
    pub fn from_scenario(
        file: &ScenarioFile,
        model: impl Into<String>,
    ) -> Result<Arc<Self>, WorldError> {
        Ok(Self::new(World::new(file.to_world_state()?), model))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Copy of the persisted transcript.
    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.chat.lock().expect("chat lock poisoned").clone()
    }

    pub(crate) fn push_chat(&self, message: ChatMessage) {
        self.chat.lock().expect("chat lock poisoned").push(message);
    }

    /// Drop the trailing assistant message, if the transcript ends with one.
    /// Returns whether anything was removed.
    pub(crate) fn pop_trailing_assistant(&self) -> bool {
        let mut chat = self.chat.lock().expect("chat lock poisoned");
        if chat.last().is_some_and(|m| m.role == ChatRole::Assistant) {
            chat.pop();
            true
        } else {
            false
        }
    }

    pub(crate) fn last_sim_tick(&self) -> u64 {
        self.last_sim_tick.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_sim_tick(&self, tick: u64) {
        self.last_sim_tick.store(tick, Ordering::Release);
    }

    pub(crate) async fn lock_turn(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.turn_lock.lock().await
    }
}
