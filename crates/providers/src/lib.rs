//! Chat provider implementations for Fableloom.
//!
//! All providers implement the `fableloom_core::Provider` trait. The engine
//! is normally handed a [`RetryingProvider`] wrapping an
//! [`OpenAiChatProvider`], so transient endpoint failures are absorbed
//! before they reach the turn orchestrator.

pub mod openai_compat;
pub mod retry;

pub use openai_compat::OpenAiChatProvider;
pub use retry::RetryingProvider;
