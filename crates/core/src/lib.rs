//! # Fableloom Core
//!
//! Domain types, traits, and error definitions for the Fableloom narrative
//! engine. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The chat provider is defined as a trait here; implementations live in
//! `fableloom-providers`. The world model owns all mutable session state
//! behind a single mutation surface, so the engine crate can treat it as
//! the one source of truth while streaming turns.

pub mod error;
pub mod message;
pub mod provider;
pub mod scenario;
pub mod world;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError, WorldError};
pub use message::{ChatMessage, ChatRole, Message, MessageToolCall, Role};
pub use provider::{
    Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolChoice, ToolDefinition,
};
pub use scenario::ScenarioFile;
pub use world::{
    Character, CharacterId, ClusterId, KnowledgeEntry, KnowledgeSource, LocationCluster, Scenario,
    World, WorldEvent, WorldState, WorldTime,
};
