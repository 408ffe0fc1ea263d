//! Location resolution — mapping a free-form destination onto the world's
//! location clusters.
//!
//! The model is asked (with a forced tool call) whether the destination
//! semantically matches an existing cluster; a confident match reuses that
//! cluster's id, anything else becomes a new cluster. If the provider
//! misbehaves, a deterministic canonicalizer names the new cluster instead
//! so the player's move never fails.

use crate::COMPLETION_MAX_TOKENS;
use fableloom_core::message::Message;
use fableloom_core::provider::{Provider, ProviderRequest, ToolChoice, ToolDefinition};
use fableloom_core::world::{ClusterId, LocationCluster};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

/// Internal tool used only for this call; never exposed to the narrator.
const TOOL_RESOLVE_LOCATION: &str = "resolveLocation";

/// Minimum confidence for accepting a semantic match.
const MATCH_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Canonical names are kept short.
const MAX_CANONICAL_WORDS: usize = 4;

/// The outcome of resolving a destination string.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The destination is an existing cluster.
    Existing(ClusterId),
    /// The destination is somewhere new, with this canonical name.
    New(String),
}

#[derive(Debug, Deserialize)]
struct ResolveLocationArgs {
    #[serde(rename = "matchedClusterId", default)]
    matched_cluster_id: Option<String>,
    #[serde(rename = "canonicalName", default)]
    canonical_name: String,
    #[serde(default)]
    confidence: f64,
}

/// Resolve a free-form destination against the known clusters.
pub async fn resolve_destination(
    provider: &dyn Provider,
    model: &str,
    destination: &str,
    clusters: &[LocationCluster],
) -> Resolution {
    let listing: String = clusters
        .iter()
        .map(|c| format!("- {} (id: {})\n", c.canonical_name, c.id))
        .collect();

    let user_message = format!(
        "The player wants to go to: \"{destination}\"\n\n\
         Existing locations:\n{listing}\n\
         Does the destination refer to one of the existing locations? Match \
         semantically, not literally — \"the cafe\" matches \"Coffee Shop\". \
         If it matches, report that location's id with your confidence. If \
         it is somewhere new, report a short canonical name for it (at most \
         four words) and a null id."
    );

    let request = ProviderRequest {
        model: model.to_string(),
        messages: vec![Message::user(user_message)],
        max_tokens: Some(COMPLETION_MAX_TOKENS),
        tools: vec![resolve_location_tool()],
        tool_choice: Some(ToolChoice::Required),
        stream: false,
    };

    let response = match provider.complete(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, destination, "Location resolution failed, canonicalizing locally");
            return Resolution::New(canonicalize_destination(destination));
        }
    };

    let Some(call) = response
        .message
        .tool_calls
        .iter()
        .find(|tc| tc.name == TOOL_RESOLVE_LOCATION)
    else {
        warn!(destination, "Resolver returned no tool call, canonicalizing locally");
        return Resolution::New(canonicalize_destination(destination));
    };

    let args: ResolveLocationArgs = match serde_json::from_str(&call.arguments) {
        Ok(args) => args,
        Err(e) => {
            warn!(error = %e, destination, "Malformed resolver output, canonicalizing locally");
            return Resolution::New(canonicalize_destination(destination));
        }
    };

    if let Some(id) = &args.matched_cluster_id {
        if args.confidence >= MATCH_CONFIDENCE_THRESHOLD {
            if let Some(cluster) = clusters.iter().find(|c| &c.id.0 == id) {
                debug!(
                    destination,
                    cluster = %cluster.canonical_name,
                    confidence = args.confidence,
                    "Destination matched an existing cluster"
                );
                return Resolution::Existing(cluster.id.clone());
            }
            warn!(matched = %id, "Resolver matched a cluster id that does not exist");
        }
    }

    let name = if args.canonical_name.trim().is_empty() {
        canonicalize_destination(destination)
    } else {
        args.canonical_name.trim().to_string()
    };
    Resolution::New(name)
}

fn resolve_location_tool() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_RESOLVE_LOCATION.into(),
        description: "Report whether the destination matches an existing location.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "matchedClusterId": {
                    "type": ["string", "null"],
                    "description": "Id of the matching existing location, or null"
                },
                "canonicalName": {
                    "type": "string",
                    "description": "Short canonical name for the destination (at most four words)"
                },
                "confidence": {
                    "type": "number",
                    "description": "Match confidence between 0 and 1"
                }
            },
            "required": ["canonicalName", "confidence"]
        }),
    }
}

/// Deterministic fallback: turn a free-form destination into a short
/// canonical name without asking the model.
///
/// Strips leading articles and travel prepositions, title-cases what
/// remains, and keeps at most four words.
pub fn canonicalize_destination(destination: &str) -> String {
    const SKIP: &[&str] = &[
        "to", "into", "at", "in", "on", "onto", "toward", "towards", "over", "back", "the", "a",
        "an",
    ];

    let words: Vec<&str> = destination.split_whitespace().collect();
    let mut start = 0;
    while start < words.len() && SKIP.contains(&words[start].to_ascii_lowercase().as_str()) {
        start += 1;
    }
    // an all-filler destination falls back to the full phrase
    let kept = if start == words.len() { &words[..] } else { &words[start..] };

    kept.iter()
        .take(MAX_CANONICAL_WORDS)
        .map(|w| title_case(w))
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fableloom_core::error::ProviderError;
    use fableloom_core::message::MessageToolCall;
    use fableloom_core::provider::ProviderResponse;

    struct ScriptedResolver {
        arguments: Option<String>,
        fail: bool,
    }

    #[async_trait]
    impl Provider for ScriptedResolver {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            if self.fail {
                return Err(ProviderError::Network("down".into()));
            }
            assert_eq!(request.tool_choice, Some(ToolChoice::Required));
            let mut message = Message::assistant("");
            if let Some(arguments) = &self.arguments {
                message.tool_calls = vec![MessageToolCall {
                    id: "call_1".into(),
                    name: TOOL_RESOLVE_LOCATION.into(),
                    arguments: arguments.clone(),
                }];
            }
            Ok(ProviderResponse {
                message,
                model: request.model,
            })
        }
    }

    fn clusters() -> Vec<LocationCluster> {
        vec![LocationCluster {
            id: ClusterId("loc_coffee".into()),
            canonical_name: "Coffee Shop".into(),
        }]
    }

    #[tokio::test]
    async fn confident_match_resolves_to_existing_cluster() {
        let provider = ScriptedResolver {
            arguments: Some(
                r#"{"matchedClusterId":"loc_coffee","canonicalName":"Coffee Shop","confidence":0.92}"#.into(),
            ),
            fail: false,
        };
        let resolution = resolve_destination(&provider, "m", "the cafe", &clusters()).await;
        assert_eq!(resolution, Resolution::Existing(ClusterId("loc_coffee".into())));
    }

    #[tokio::test]
    async fn low_confidence_match_creates_new_cluster() {
        let provider = ScriptedResolver {
            arguments: Some(
                r#"{"matchedClusterId":"loc_coffee","canonicalName":"The Old Mill","confidence":0.3}"#.into(),
            ),
            fail: false,
        };
        let resolution = resolve_destination(&provider, "m", "the old mill", &clusters()).await;
        assert_eq!(resolution, Resolution::New("The Old Mill".into()));
    }

    #[tokio::test]
    async fn null_match_creates_new_cluster_with_model_name() {
        let provider = ScriptedResolver {
            arguments: Some(
                r#"{"matchedClusterId":null,"canonicalName":"The Market","confidence":0.0}"#.into(),
            ),
            fail: false,
        };
        let resolution = resolve_destination(&provider, "m", "the market", &clusters()).await;
        assert_eq!(resolution, Resolution::New("The Market".into()));
    }

    #[tokio::test]
    async fn unknown_matched_id_falls_through_to_new() {
        let provider = ScriptedResolver {
            arguments: Some(
                r#"{"matchedClusterId":"loc_ghost","canonicalName":"Ghost Alley","confidence":0.9}"#.into(),
            ),
            fail: false,
        };
        let resolution = resolve_destination(&provider, "m", "ghost alley", &clusters()).await;
        assert_eq!(resolution, Resolution::New("Ghost Alley".into()));
    }

    #[tokio::test]
    async fn provider_failure_uses_the_canonicalizer() {
        let provider = ScriptedResolver {
            arguments: None,
            fail: true,
        };
        let resolution =
            resolve_destination(&provider, "m", "back to the old stone bridge", &clusters()).await;
        assert_eq!(resolution, Resolution::New("Old Stone Bridge".into()));
    }

    #[tokio::test]
    async fn malformed_output_uses_the_canonicalizer() {
        let provider = ScriptedResolver {
            arguments: Some("{\"canonicalName\": 12".into()),
            fail: false,
        };
        let resolution = resolve_destination(&provider, "m", "the market", &clusters()).await;
        assert_eq!(resolution, Resolution::New("Market".into()));
    }

    #[test]
    fn canonicalizer_strips_fillers_and_title_cases() {
        assert_eq!(canonicalize_destination("the market"), "Market");
        assert_eq!(canonicalize_destination("to the docks"), "Docks");
        assert_eq!(
            canonicalize_destination("back to the dusty old tavern"),
            "Dusty Old Tavern"
        );
        assert_eq!(canonicalize_destination("INTO THE WOODS"), "Woods");
    }

    #[test]
    fn canonicalizer_truncates_to_four_words() {
        assert_eq!(
            canonicalize_destination("the grand hall of the mountain king"),
            "Grand Hall Of The"
        );
    }

    #[test]
    fn canonicalizer_handles_all_filler_input() {
        // nothing left after stripping — keep the phrase rather than nothing
        assert_eq!(canonicalize_destination("back in"), "Back In");
    }
}
