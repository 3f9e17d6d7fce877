// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::{Duration, Instant};

use serde_json::json;
use sre_model::{CompletionRequest, ConversationMessage, ToolSchema};
use sre_store::EventStatus;
use sre_tools::ToolCatalogue;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::state::ControllerError;
use crate::streaming::{collect_with_live_events, CollectedTurn, PartialOutputError};

/// Why a turn (§4.1/§4.2 "per-turn procedure") did not produce a collected
/// response.  Distinguished from [`PartialOutputError`] so callers can branch
/// on deadline/cancellation without downcasting an `anyhow::Error`.
pub enum TurnFailure {
    Deadline,
    Cancelled,
    Partial(PartialOutputError),
    Other(anyhow::Error),
}

impl TurnFailure {
    /// Human-readable description used in retry messages and failure
    /// records (§7). Never matched on by the controller — only displayed.
    pub fn describe(&self) -> String {
        match self {
            TurnFailure::Deadline => "deadline exceeded".to_string(),
            TurnFailure::Cancelled => "operation cancelled".to_string(),
            TurnFailure::Partial(p) => p.message.clone(),
            TurnFailure::Other(e) => e.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TurnFailure::Deadline)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TurnFailure::Cancelled)
    }
}

/// Convert a whole catalogue into the tool schemas bound to a native-tool
/// model call (§4.1), using the deterministic `endpoint.tool` ordering the
/// catalogue already maintains.
pub fn catalogue_to_tool_schemas(catalogue: &ToolCatalogue) -> Vec<ToolSchema> {
    let mut schemas = Vec::new();
    for endpoint in catalogue.endpoint_ids() {
        for def in catalogue.tools_for_endpoint(&endpoint) {
            schemas.push(ToolSchema {
                name: format!("{endpoint}.{}", def.name),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            });
        }
    }
    schemas
}

/// Runs one model call under a per-turn deadline, draining its chunk stream
/// with live event materialization (§4.6), and returns both the outcome and
/// the remaining budget in the turn — the same deadline governs any tool
/// executions the caller starts afterward (§5).
pub async fn run_turn(
    ctx: &ExecutionContext,
    messages: Vec<ConversationMessage>,
    tools: Vec<ToolSchema>,
    timeout: Duration,
    text_event_type: &str,
) -> (Result<CollectedTurn, TurnFailure>, Duration) {
    let start = Instant::now();
    let request = CompletionRequest { messages, tools };

    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(TurnFailure::Cancelled),
        outcome = tokio::time::timeout(timeout, call_and_collect(ctx, request, text_event_type)) => {
            match outcome {
                Err(_elapsed) => Err(TurnFailure::Deadline),
                Ok(Ok(turn)) => Ok(turn),
                Ok(Err(failure)) => Err(failure),
            }
        }
    };

    let remaining = timeout.saturating_sub(start.elapsed());
    (result, remaining)
}

async fn call_and_collect(
    ctx: &ExecutionContext,
    request: CompletionRequest,
    text_event_type: &str,
) -> Result<CollectedTurn, TurnFailure> {
    let stream = ctx.model.generate(request).await.map_err(TurnFailure::Other)?;
    collect_with_live_events(
        stream,
        ctx.store.as_ref(),
        ctx.publisher.as_deref(),
        text_event_type,
        &ctx.config.loop_detection,
    )
    .await
    .map_err(TurnFailure::Partial)
}

/// §7 "Partial (recoverable)": include up to 2,000 chars of partial text so
/// the model can pick up where it left off.
const PARTIAL_TEXT_CAP: usize = 2000;

/// Crafts the retry message appended to the conversation after a failed
/// turn, per §7's "Retry message policy".
pub fn retry_message(failure: &TurnFailure) -> String {
    match failure {
        TurnFailure::Partial(p) if p.is_loop => {
            "Your previous response repeated itself. Avoid repetition and be direct — \
             state your conclusion or next action in one pass."
                .to_string()
        }
        TurnFailure::Partial(p) => {
            let capped: String = p.text.chars().take(PARTIAL_TEXT_CAP).collect();
            if capped.is_empty() {
                format!("Error from previous attempt: {}. Please try again.", p.message)
            } else {
                format!(
                    "Your previous response was cut short: \"{capped}\". \
                     Please continue from where you left off."
                )
            }
        }
        other => format!("Error from previous attempt: {}. Please try again.", other.describe()),
    }
}

/// §4.1 step 1 / §4.2: persists every seed message, logging (not aborting)
/// on a store write failure — only the in-memory conversation is
/// authoritative for seed messages (§7).
pub async fn persist_seed_messages(ctx: &ExecutionContext, messages: &[ConversationMessage]) {
    for message in messages {
        if let Err(e) = ctx.store.append_message(message).await {
            warn!(error = %e, "failed to persist seed message");
        }
    }
}

/// Persists one message, swallowing the error per §7 (non-fatal persistence
/// failure — the in-memory conversation remains authoritative).
pub async fn persist_message(ctx: &ExecutionContext, message: &ConversationMessage) {
    if let Err(e) = ctx.store.append_message(message).await {
        warn!(error = %e, "failed to persist message");
    }
}

/// §4.1 step 1: one tool-list interaction per tool-serving endpoint, sorted
/// by endpoint id then tool name for deterministic persistence (Design
/// Notes "Deterministic iteration").
pub async fn record_tool_list_interactions(ctx: &ExecutionContext, catalogue: &ToolCatalogue) {
    for endpoint in catalogue.endpoint_ids() {
        let tools = catalogue.tools_for_endpoint(&endpoint);
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        let interaction = sre_store::LlmInteraction {
            label: format!("tool_list:{endpoint}"),
            response_text: names.join(", "),
            usage: sre_model::TokenUsage::default(),
            duration: Duration::default(),
        };
        if let Err(e) = ctx.store.record_llm_interaction(interaction).await {
            warn!(error = %e, endpoint, "failed to persist tool-list interaction");
        }
    }
}

/// Records a timeline error event for a failed model call, created and
/// finalized in one step since there was never a streaming event for it
/// (the failure happened before or during chunk collection, which already
/// finalizes any event it created itself) — this covers the case where the
/// call failed before producing any content at all.
pub async fn record_turn_error_event(ctx: &ExecutionContext, message: &str) {
    match ctx
        .store
        .create_timeline_event("llm_error", EventStatus::Failed, message.to_string(), json!({}))
        .await
    {
        Ok(event) => {
            if let Some(publisher) = ctx.publisher.as_ref() {
                if let Err(e) = publisher.publish_timeline_created(&event).await {
                    warn!(error = %e, "failed to publish llm_error created");
                }
                if let Err(e) = publisher.publish_timeline_completed(&event).await {
                    warn!(error = %e, "failed to publish llm_error completed");
                }
            }
        }
        Err(e) => warn!(error = %e, "failed to record llm_error timeline event"),
    }
}

/// Emits timeline events for code-execution / grounding content the native
/// streaming path does not already materialize live (§4.1 step 5: "emit
/// native thinking / code-execution / grounding events for any content that
/// was not already streamed live").
pub async fn record_auxiliary_content_events(ctx: &ExecutionContext, turn: &CollectedTurn) {
    for ce in &turn.response.code_executions {
        record_simple_event(
            ctx,
            "code_execution",
            ce.result.clone(),
            json!({"code": ce.code}),
        )
        .await;
    }
    for g in &turn.response.groundings {
        record_simple_event(
            ctx,
            "grounding",
            g.sources.join(", "),
            json!({"web_search_queries": g.web_search_queries, "supports": g.supports}),
        )
        .await;
    }
}

async fn record_simple_event(ctx: &ExecutionContext, event_type: &str, content: String, metadata: serde_json::Value) {
    match ctx
        .store
        .create_timeline_event(event_type, EventStatus::Streaming, String::new(), metadata.clone())
        .await
    {
        Ok(event) => {
            if let Some(publisher) = ctx.publisher.as_ref() {
                let _ = publisher.publish_timeline_created(&event).await;
            }
            if let Err(e) = ctx
                .store
                .complete_timeline_event(event.sequence_number, EventStatus::Completed, content.clone(), metadata)
                .await
            {
                warn!(error = %e, event_type, "failed to finalize auxiliary content event");
                return;
            }
            if let Some(publisher) = ctx.publisher.as_ref() {
                let completed = sre_store::TimelineEvent {
                    sequence_number: event.sequence_number,
                    event_type: event_type.to_string(),
                    status: EventStatus::Completed,
                    content,
                    metadata: json!({}),
                };
                let _ = publisher.publish_timeline_completed(&completed).await;
            }
        }
        Err(e) => warn!(error = %e, event_type, "failed to create auxiliary content event"),
    }
}

/// §4.1/§4.2 exhaustion: the final model call made without tools, with the
/// same per-turn timeout, whose purpose is to coerce a terminal answer.
/// Returns the raw collected turn so each controller variant can extract
/// its final text its own way (native text vs. ReAct-parsed).
pub async fn call_force_conclusion(
    ctx: &ExecutionContext,
    conversation: &mut Vec<ConversationMessage>,
    timeout: Duration,
) -> Result<CollectedTurn, TurnFailure> {
    let prompt = ctx.prompt_builder.force_conclusion_prompt();
    let message = ConversationMessage::user(prompt);
    persist_message(ctx, &message).await;
    conversation.push(message);

    debug!(max_iterations = %ctx.config.iteration.max_iterations, "entering force conclusion");
    let (result, _) = run_turn(ctx, conversation.clone(), vec![], timeout, "final_analysis").await;
    result
}

/// `{forced_conclusion: true, iterations_used, max_iterations}` metadata
/// attached to every timeline event the force-conclusion call produces
/// (§4.1 "Exhaustion").
pub fn forced_conclusion_metadata(iterations_used: u32, max_iterations: u32) -> serde_json::Value {
    json!({
        "forced_conclusion": true,
        "iterations_used": iterations_used,
        "max_iterations": max_iterations,
    })
}

/// Tags every timeline event a force-conclusion call created (its text and
/// thinking events) with the forced-conclusion metadata, by re-completing
/// them with the same content and the merged metadata (§4.1 "Exhaustion").
pub async fn tag_forced_conclusion_events(ctx: &ExecutionContext, turn: &CollectedTurn, iterations_used: u32, max_iterations: u32) {
    let metadata = forced_conclusion_metadata(iterations_used, max_iterations);
    for seq in [turn.text_event_seq, turn.thinking_event_seq].into_iter().flatten() {
        if let Err(e) = ctx
            .store
            .complete_timeline_event(
                seq,
                EventStatus::Completed,
                if Some(seq) == turn.text_event_seq {
                    turn.response.text.clone()
                } else {
                    turn.response.thinking_text.clone()
                },
                metadata.clone(),
            )
            .await
        {
            warn!(error = %e, seq, "failed to tag forced-conclusion event");
        }
    }
}

/// `true` iff `err` wraps [`ControllerError::Cancelled`] — used by the
/// scoring controller, whose retry loop consumes plain `anyhow::Result`
/// rather than [`TurnFailure`].
pub fn is_cancel_err(err: &anyhow::Error) -> bool {
    crate::state::is_cancelled(err)
}

pub fn cancelled_error() -> anyhow::Error {
    anyhow::Error::new(ControllerError::Cancelled)
}

pub fn deadline_error() -> anyhow::Error {
    anyhow::Error::new(ControllerError::DeadlineExceeded)
}
