//! Error types for the Fableloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Fableloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- World model errors ---
    #[error("World error: {0}")]
    World(#[from] WorldError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether the failure is worth retrying with backoff.
    ///
    /// Server-side errors (5xx), rate limits, timeouts, and network hiccups
    /// are transient. Auth failures and client errors are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::RateLimited { .. } => true,
            Self::Timeout(_) => true,
            Self::Network(_) => true,
            Self::StreamInterrupted(_) => true,
            Self::AuthenticationFailed(_) => false,
            Self::NotConfigured(_) => false,
        }
    }
}

/// Errors raised while interpreting a tool call emitted by the model.
///
/// These never abort a turn: the orchestrator reports them back to the
/// model as the tool result so it can recover within the loop budget.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },
}

/// Invariant violations raised by the world model's mutation surface.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("Unknown location cluster: {0}")]
    UnknownCluster(String),

    #[error("Unknown character: {0}")]
    UnknownCharacter(String),

    #[error("World has no player character")]
    NoPlayer,

    #[error("World has more than one player character")]
    DuplicatePlayer,

    #[error("Invalid scenario: {0}")]
    BadScenario(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn transient_classification() {
        assert!(ProviderError::ApiError {
            status_code: 503,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(ProviderError::RateLimited {
            retry_after_secs: 5
        }
        .is_transient());
        assert!(ProviderError::Network("conn reset".into()).is_transient());
        assert!(!ProviderError::ApiError {
            status_code: 400,
            message: "bad request".into()
        }
        .is_transient());
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_transient());
    }

    #[test]
    fn world_error_displays_correctly() {
        let err = Error::World(WorldError::UnknownCluster("loc_9".into()));
        assert!(err.to_string().contains("loc_9"));
    }
}
