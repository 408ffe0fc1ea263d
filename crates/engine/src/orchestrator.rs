//! The turn orchestrator — the bounded tool-calling loop.
//!
//! A turn streams a completion, interprets any tool calls by mutating the
//! world, rebuilds the system prompt from the fresh snapshot, and streams
//! again, at most [`MAX_TOOL_STEPS`] times. Only the accumulated narration
//! is persisted; tool-call and tool-result messages live and die inside
//! one invocation.

use crate::prompt::{
    build_system_prompt, build_tools, TOOL_ADVANCE_TIME, TOOL_DISCOVER_CHARACTER,
    TOOL_MOVE_TO_LOCATION,
};
use crate::resolver::{resolve_destination, Resolution};
use crate::session::Session;
use crate::simulator::{OffscreenSimulator, SIM_MIN_ELAPSED_TICKS};
use crate::trim::{trim_history, MAX_CONTEXT_TOKENS};
use crate::turn_event::TurnEvent;
use crate::STREAM_MAX_TOKENS;
use fableloom_core::error::{ProviderError, ToolError};
use fableloom_core::message::{ChatMessage, Message, MessageToolCall};
use fableloom_core::provider::{Provider, ProviderRequest};
use fableloom_core::world::ClusterId;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum streaming iterations per turn. On the last iteration any tool
/// calls the model still emits are not executed.
pub const MAX_TOOL_STEPS: usize = 5;

/// Ticks consumed by a player move.
pub const MOVE_COST_TICKS: u64 = 5;

const TURN_CHANNEL_CAPACITY: usize = 64;

/// The engine: a provider plus the machinery to run turns against sessions.
pub struct Engine {
    provider: Arc<dyn Provider>,
    max_tool_steps: usize,
    context_budget: usize,
}

/// How a turn begins. Everything after the first step is identical.
enum TurnKind {
    /// Append the player's message and advance time by one tick.
    Send(String),
    /// Stream again without new player input.
    Continue,
    /// Drop the trailing assistant message, then stream.
    Regenerate,
}

/// Why a turn stopped before persisting.
enum TurnAbort {
    /// The client went away. Silent: nothing is persisted, applied
    /// mutations are kept.
    Cancelled,
    /// The provider failed permanently (retries exhausted).
    Provider(ProviderError),
}

impl Engine {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            max_tool_steps: MAX_TOOL_STEPS,
            context_budget: MAX_CONTEXT_TOKENS,
        }
    }

    /// Override the streaming-iteration bound per turn.
    pub fn with_max_tool_steps(mut self, max: usize) -> Self {
        self.max_tool_steps = max.max(1);
        self
    }

    /// Override the context budget in estimated tokens.
    pub fn with_context_budget(mut self, budget: usize) -> Self {
        self.context_budget = budget;
        self
    }

    /// Player turn: append the message, advance one tick, stream.
    pub fn send(&self, session: &Arc<Session>, text: impl Into<String>) -> mpsc::Receiver<TurnEvent> {
        self.spawn_turn(session, TurnKind::Send(text.into()))
    }

    /// Ask the narrator to keep going without player input.
    pub fn continue_turn(&self, session: &Arc<Session>) -> mpsc::Receiver<TurnEvent> {
        self.spawn_turn(session, TurnKind::Continue)
    }

    /// Re-roll the last assistant message.
    pub fn regenerate(&self, session: &Arc<Session>) -> mpsc::Receiver<TurnEvent> {
        self.spawn_turn(session, TurnKind::Regenerate)
    }

    fn spawn_turn(&self, session: &Arc<Session>, kind: TurnKind) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(TURN_CHANNEL_CAPACITY);
        let provider = Arc::clone(&self.provider);
        let session = Arc::clone(session);
        let limits = TurnLimits {
            max_tool_steps: self.max_tool_steps,
            context_budget: self.context_budget,
        };
        tokio::spawn(async move {
            run_turn(provider, session, kind, limits, tx).await;
        });
        rx
    }
}

/// Per-turn bounds, copied out of the engine at spawn time.
#[derive(Clone, Copy)]
struct TurnLimits {
    max_tool_steps: usize,
    context_budget: usize,
}

async fn run_turn(
    provider: Arc<dyn Provider>,
    session: Arc<Session>,
    kind: TurnKind,
    limits: TurnLimits,
    tx: mpsc::Sender<TurnEvent>,
) {
    // Held for the whole streaming lifetime: one turn at a time per session.
    let _turn_guard = session.lock_turn().await;

    match kind {
        TurnKind::Send(text) => {
            session.push_chat(ChatMessage::user(text));
            session.world().advance_time(1, "");
        }
        TurnKind::Continue => {}
        TurnKind::Regenerate => {
            session.pop_trailing_assistant();
        }
    }

    match stream_loop(provider.as_ref(), &session, limits, &tx).await {
        Ok((narration, moved_from)) => {
            session.push_chat(ChatMessage::assistant(&narration));
            auto_discover(&session, &narration);
            if let Some(origin) = moved_from {
                maybe_run_simulation(&provider, &session, &origin).await;
            }
            let _ = tx.send(TurnEvent::Done).await;
        }
        Err(TurnAbort::Cancelled) => {
            // Client is gone; keep applied mutations, persist nothing.
            info!(session_id = %session.id(), "Turn cancelled by client");
        }
        Err(TurnAbort::Provider(e)) => {
            warn!(session_id = %session.id(), error = %e, "Turn failed");
            let _ = tx
                .send(TurnEvent::Error {
                    message: e.to_string(),
                })
                .await;
            let _ = tx.send(TurnEvent::Done).await;
        }
    }
}

/// The streaming loop proper. Returns the accumulated narration and, when
/// the player changed clusters, the cluster they started the turn at.
async fn stream_loop(
    provider: &dyn Provider,
    session: &Arc<Session>,
    limits: TurnLimits,
    tx: &mpsc::Sender<TurnEvent>,
) -> Result<(String, Option<ClusterId>), TurnAbort> {
    let world = session.world();
    let turn_id = Uuid::new_v4().to_string();

    let mut snapshot = world.snapshot();
    let start_cluster = snapshot.player().location.clone();
    let mut system_prompt = build_system_prompt(&snapshot);
    let mut tools = build_tools(&snapshot);

    let transcript = session.transcript();
    let history = trim_history(&system_prompt, &transcript, limits.context_budget);

    let mut messages = vec![Message::system(&system_prompt)];
    messages.extend(history.iter().map(ChatMessage::to_wire));

    let mut narration = String::new();

    for step in 0..limits.max_tool_steps {
        debug!(session_id = %session.id(), step, "Turn loop iteration");

        let request = ProviderRequest {
            model: session.model().to_string(),
            messages: messages.clone(),
            max_tokens: Some(STREAM_MAX_TOKENS),
            tools: tools.clone(),
            tool_choice: None,
            stream: true,
        };

        let mut rx = provider.stream(request).await.map_err(TurnAbort::Provider)?;
        let mut text = String::new();
        let mut tool_calls: Vec<MessageToolCall> = Vec::new();

        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.map_err(TurnAbort::Provider)?;
            if let Some(delta) = chunk.content {
                if !delta.is_empty() {
                    text.push_str(&delta);
                    if tx.send(TurnEvent::Token { text: delta }).await.is_err() {
                        return Err(TurnAbort::Cancelled);
                    }
                }
            }
            if chunk.done {
                tool_calls = chunk.tool_calls;
                break;
            }
        }

        if !text.is_empty() {
            if !narration.is_empty() {
                narration.push_str("\n\n");
            }
            narration.push_str(&text);
        }

        if tool_calls.is_empty() {
            break;
        }
        if step == limits.max_tool_steps - 1 {
            warn!(
                session_id = %session.id(),
                pending = tool_calls.len(),
                "Tool loop budget exhausted; trailing tool calls not executed"
            );
            break;
        }

        let mut assistant = Message::assistant(&text);
        assistant.tool_calls = tool_calls.clone();
        messages.push(assistant);

        // Dispatch in provider order; each mutation completes before the
        // next call runs.
        for call in &tool_calls {
            let notify = TurnEvent::Event {
                kind: "tool_call".into(),
                payload: json!({ "name": call.name, "id": call.id }),
            };
            if tx.send(notify).await.is_err() {
                return Err(TurnAbort::Cancelled);
            }
            let result = dispatch_tool_call(provider, session, call, &turn_id).await;
            messages.push(Message::tool_result(&call.id, &call.name, result));
        }

        // Refresh the world view for the next iteration.
        snapshot = world.snapshot();
        system_prompt = build_system_prompt(&snapshot);
        tools = build_tools(&snapshot);
        messages[0] = Message::system(&system_prompt);
    }

    let moved_from =
        (world.snapshot().player().location != start_cluster).then_some(start_cluster);
    Ok((narration, moved_from))
}

// ── Tool dispatch ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MoveToLocationArgs {
    destination: String,
    #[serde(rename = "narrativeTime", default)]
    narrative_time: String,
    #[serde(rename = "accompaniedBy", default)]
    accompanied_by: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AdvanceTimeArgs {
    #[serde(rename = "narrativeTime", default)]
    narrative_time: String,
    ticks: f64,
}

#[derive(Debug, Deserialize)]
struct DiscoverCharacterArgs {
    #[serde(rename = "characterName")]
    character_name: String,
    #[serde(default)]
    introduction: String,
    #[serde(default)]
    goals: String,
}

/// Execute one tool call against the world. Always produces a result
/// string: argument and invariant failures become human-readable errors the
/// model can read and recover from.
async fn dispatch_tool_call(
    provider: &dyn Provider,
    session: &Arc<Session>,
    call: &MessageToolCall,
    turn_id: &str,
) -> String {
    match call.name.as_str() {
        TOOL_MOVE_TO_LOCATION => match parse_args::<MoveToLocationArgs>(call) {
            Ok(args) => execute_move(provider, session, args).await,
            Err(message) => message,
        },
        TOOL_ADVANCE_TIME => match parse_args::<AdvanceTimeArgs>(call) {
            Ok(args) => execute_advance_time(session, args),
            Err(message) => message,
        },
        TOOL_DISCOVER_CHARACTER => match parse_args::<DiscoverCharacterArgs>(call) {
            Ok(args) => execute_discover(session, args, turn_id),
            Err(message) => message,
        },
        unknown => format!("Error: {}", ToolError::UnknownTool(unknown.to_string())),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(call: &MessageToolCall) -> Result<T, String> {
    serde_json::from_str(&call.arguments).map_err(|e| {
        format!(
            "Error: {}",
            ToolError::InvalidArguments {
                tool_name: call.name.clone(),
                reason: e.to_string(),
            }
        )
    })
}

async fn execute_move(
    provider: &dyn Provider,
    session: &Arc<Session>,
    args: MoveToLocationArgs,
) -> String {
    let world = session.world();
    let snapshot = world.snapshot();
    let origin = snapshot.player().location.clone();

    let target: ClusterId = match resolve_destination(
        provider,
        session.model(),
        &args.destination,
        snapshot.clusters(),
    )
    .await
    {
        Resolution::Existing(id) => id,
        Resolution::New(name) => {
            info!(session_id = %session.id(), name = %name, "Creating new location");
            world.add_location(&name)
        }
    };

    // Companions travel only if they exist and are standing where the
    // player was; anyone else in the list is ignored.
    let mut ignored: Vec<String> = Vec::new();
    for name in &args.accompanied_by {
        match snapshot.character_by_name(name) {
            Some(c) if !c.is_player && c.location == origin => {
                if let Err(e) = world.move_character(&c.id, &target) {
                    return format!("Error: {e}");
                }
            }
            _ => ignored.push(name.clone()),
        }
    }

    if let Err(e) = world.move_player_to(&target) {
        return format!("Error: {e}");
    }
    world.advance_time(MOVE_COST_TICKS, &args.narrative_time);

    let after = world.snapshot();
    let place = after
        .cluster(&target)
        .map(|c| c.canonical_name.clone())
        .unwrap_or_else(|| "the destination".into());
    let (discovered, undiscovered) = after.present_characters(&target);

    let mut result = format!("The player arrives at {place}.");
    if discovered.is_empty() {
        result.push_str(" No one familiar is here.");
    } else {
        let names: Vec<&str> = discovered.iter().map(|c| c.name.as_str()).collect();
        result.push_str(&format!(" Present: {}.", names.join(", ")));
    }
    if !undiscovered.is_empty() {
        let names: Vec<&str> = undiscovered.iter().map(|c| c.name.as_str()).collect();
        result.push_str(&format!(
            " Also here, not yet introduced: {}. You must call discoverCharacter \
             for each of them before continuing the narration.",
            names.join(", ")
        ));
    }
    if !ignored.is_empty() {
        result.push_str(&format!(
            " ({} could not come along.)",
            ignored.join(", ")
        ));
    }
    result
}

fn execute_advance_time(session: &Arc<Session>, args: AdvanceTimeArgs) -> String {
    let ticks = args.ticks.max(0.0) as u64;
    session.world().advance_time(ticks, &args.narrative_time);
    let time = session.world().snapshot().time().clone();
    format!(
        "Time advances. It is now {} (tick {}).",
        time.narrative_time, time.tick
    )
}

fn execute_discover(session: &Arc<Session>, args: DiscoverCharacterArgs, turn_id: &str) -> String {
    let world = session.world();
    let snapshot = world.snapshot();
    let here = snapshot.player().location.clone();

    // A character with this name already in the scene is discovered in
    // place (idempotently) rather than duplicated.
    let existing = snapshot
        .characters()
        .iter()
        .find(|c| !c.is_player && c.location == here && c.name.eq_ignore_ascii_case(&args.character_name));

    if let Some(character) = existing {
        if let Err(e) = world.discover_character(&character.id) {
            return format!("Error: {e}");
        }
        if let Err(e) = world.update_character_profile(&character.id, &args.introduction, &args.goals)
        {
            return format!("Error: {e}");
        }
        format!("{} is now part of the scene.", character.name)
    } else {
        match world.introduce_character(
            &args.character_name,
            &args.introduction,
            &args.goals,
            &here,
            true,
            Some(turn_id.to_string()),
        ) {
            Ok(_) => format!("{} has entered the story.", args.character_name),
            Err(e) => format!("Error: {e}"),
        }
    }
}

// ── Post-stream steps ─────────────────────────────────────────────────────

/// Safety net: if the narration names an undiscovered character who is in
/// the scene, mark them discovered so future prompts list them.
fn auto_discover(session: &Arc<Session>, narration: &str) {
    let world = session.world();
    let snapshot = world.snapshot();
    let here = snapshot.player().location.clone();
    let (_, undiscovered) = snapshot.present_characters(&here);
    for character in undiscovered {
        if narration.contains(&character.name) {
            debug!(
                session_id = %session.id(),
                character = %character.name,
                "Auto-discovering character mentioned in narration"
            );
            if let Err(e) = world.discover_character(&character.id) {
                warn!(error = %e, "Auto-discovery failed");
            }
        }
    }
}

/// Run the off-screen simulation when enough off-screen time has passed.
async fn maybe_run_simulation(
    provider: &Arc<dyn Provider>,
    session: &Arc<Session>,
    player_was_at: &ClusterId,
) {
    let tick = session.world().snapshot().time().tick;
    let elapsed = tick.saturating_sub(session.last_sim_tick());
    if elapsed < SIM_MIN_ELAPSED_TICKS {
        return;
    }
    let simulator = OffscreenSimulator::new(Arc::clone(provider), session.model());
    // No plot-point detector exists; the predicate is wired through as false.
    if simulator.run(session.world(), elapsed, false, player_was_at).await {
        session.set_last_sim_tick(tick);
    }
}
