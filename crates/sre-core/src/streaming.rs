// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use sre_config::LoopDetectionConfig;
use sre_model::{Chunk, ChunkStream, LlmResponse};
use sre_store::{EventPublisher, EventStatus, PersistenceStore};
use tracing::warn;

/// A stream that began normally but terminated with an `Error` chunk after
/// some bytes were committed (§4.6, GLOSSARY). The buffered text/thinking
/// let the caller use what was produced as retry context (§7).
#[derive(Debug, Clone)]
pub struct PartialOutputError {
    pub text: String,
    pub thinking: String,
    pub is_loop: bool,
    pub message: String,
}

impl std::fmt::Display for PartialOutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "partial output before error: {}", self.message)
    }
}

impl std::error::Error for PartialOutputError {}

/// Folds a channel of typed chunks into one [`LlmResponse`] (§4.6
/// `collectStream`). Text and thinking chunks append to buffers; tool/code/
/// grounding chunks append to ordered lists; usage overwrites. An `Error`
/// chunk terminates collection.
///
/// Dropping `stream` on early return is itself the cancellation signal for
/// the producer task (no separate cancellation handle is threaded through —
/// `ChunkStream` is `Pin<Box<dyn Stream>>`, and Rust's drop glue stops
/// polling the underlying channel).
pub async fn collect_stream(mut stream: ChunkStream) -> Result<LlmResponse, PartialOutputError> {
    let mut resp = LlmResponse::default();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Chunk::Text(t) => resp.text.push_str(&t),
            Chunk::Thinking(t) => resp.thinking_text.push_str(&t),
            Chunk::ToolCall { id, name, arguments } => {
                resp.tool_calls.push(sre_model::ToolCallEnvelope { id, name, arguments })
            }
            Chunk::CodeExecution(ce) => resp.code_executions.push(ce),
            Chunk::Grounding(g) => resp.groundings.push(g),
            Chunk::Usage(u) => resp.usage = Some(u),
            Chunk::Error(message) => {
                return Err(PartialOutputError {
                    text: resp.text,
                    thinking: resp.thinking_text,
                    is_loop: false,
                    message,
                });
            }
        }
    }
    Ok(resp)
}

/// Tail-window substring-repetition detector (§4.6 "Loop detection").
///
/// Scans the trailing `window_chars` of `text` for, at each pattern length
/// from `min_pattern_len` to `max_pattern_len`, at least `min_repeats`
/// consecutive exact repetitions. Returns the byte offset the buffer should
/// be truncated to (the point just before the repetition began) on the
/// first (smallest-pattern) match.
pub fn detect_repetition(text: &str, cfg: &LoopDetectionConfig) -> Option<usize> {
    let chars: Vec<char> = text.chars().collect();
    let window_start = chars.len().saturating_sub(cfg.window_chars);
    let tail = &chars[window_start..];

    for pattern_len in cfg.min_pattern_len..=cfg.max_pattern_len {
        if pattern_len == 0 {
            continue;
        }
        let needed = pattern_len * cfg.min_repeats;
        if tail.len() < needed {
            continue;
        }
        let segment = &tail[tail.len() - needed..];
        let pattern = &segment[..pattern_len];
        let repeats_match = (1..cfg.min_repeats)
            .all(|i| &segment[i * pattern_len..(i + 1) * pattern_len] == pattern);
        if repeats_match {
            let truncate_char_idx = window_start + (tail.len() - needed);
            return Some(char_index_to_byte_offset(text, truncate_char_idx));
        }
    }
    None
}

fn char_index_to_byte_offset(text: &str, char_idx: usize) -> usize {
    text.char_indices()
        .nth(char_idx)
        .map(|(byte_idx, _)| byte_idx)
        .unwrap_or(text.len())
}

/// Which variant of content is driving the live event, so the streaming
/// wrapper can pick the right `event_type` / metadata shape (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveContentKind {
    Text,
    Thinking,
}

/// Result of draining one model call with live event materialization and
/// loop detection applied (§4.6). `text_event_seq`/`thinking_event_seq` are
/// `Some` only if that content was non-empty at some point, so the caller
/// knows whether a timeline event already exists for it (and should not
/// create a duplicate `final_analysis`/`llm_thinking` event for the same
/// content).
pub struct CollectedTurn {
    pub response: LlmResponse,
    pub text_event_seq: Option<u64>,
    pub thinking_event_seq: Option<u64>,
}

/// Drains `stream`, live-streaming text/thinking deltas as timeline events
/// via `store`/`publisher`, and running the tail-window loop detector on the
/// accumulated text every `loop_cfg.check_interval_chars` characters.
///
/// On success, every event this call created is finalized `Completed`
/// before returning. On an `Error` chunk, every event this call created is
/// finalized `Failed` using a bounded, detached 5-second window — so a
/// caller-side cancellation already in flight cannot leave the event stuck
/// at `Streaming` (§5 "Resource hygiene").
pub async fn collect_with_live_events(
    mut stream: ChunkStream,
    store: &dyn PersistenceStore,
    publisher: Option<&dyn EventPublisher>,
    text_event_type: &str,
    loop_cfg: &LoopDetectionConfig,
) -> Result<CollectedTurn, PartialOutputError> {
    let mut resp = LlmResponse::default();
    let mut text_event: Option<u64> = None;
    let mut thinking_event: Option<u64> = None;
    let mut last_checked_len = 0usize;

    loop {
        let chunk = match stream.next().await {
            Some(c) => c,
            None => break,
        };
        match chunk {
            Chunk::Text(delta) => {
                if delta.is_empty() {
                    continue;
                }
                let is_new = text_event.is_none();
                if is_new {
                    text_event = create_live_event(store, publisher, text_event_type, json!({})).await;
                }
                resp.text.push_str(&delta);
                if let (Some(seq), Some(pub_)) = (text_event, publisher) {
                    publish_chunk(pub_, seq, &delta).await;
                }

                if resp.text.len() - last_checked_len >= loop_cfg.check_interval_chars {
                    last_checked_len = resp.text.len();
                    if let Some(cut) = detect_repetition(&resp.text, loop_cfg) {
                        resp.text.truncate(cut);
                        finalize_on_loop(store, publisher, text_event, &resp.text).await;
                        finalize_on_loop(store, publisher, thinking_event, &resp.thinking_text).await;
                        drop(stream);
                        return Err(PartialOutputError {
                            text: resp.text,
                            thinking: resp.thinking_text,
                            is_loop: true,
                            message: "repeated output detected".to_string(),
                        });
                    }
                }
            }
            Chunk::Thinking(delta) => {
                if delta.is_empty() {
                    continue;
                }
                let is_new = thinking_event.is_none();
                if is_new {
                    thinking_event =
                        create_live_event(store, publisher, "llm_thinking", json!({"source": "native"})).await;
                }
                resp.thinking_text.push_str(&delta);
                if let (Some(seq), Some(pub_)) = (thinking_event, publisher) {
                    publish_chunk(pub_, seq, &delta).await;
                }
            }
            Chunk::ToolCall { id, name, arguments } => {
                resp.tool_calls.push(sre_model::ToolCallEnvelope { id, name, arguments })
            }
            Chunk::CodeExecution(ce) => resp.code_executions.push(ce),
            Chunk::Grounding(g) => resp.groundings.push(g),
            Chunk::Usage(u) => resp.usage = Some(u),
            Chunk::Error(message) => {
                drop(stream);
                finalize_on_error(store, text_event, EventStatus::Failed, &message).await;
                finalize_on_error(store, thinking_event, EventStatus::Failed, &message).await;
                return Err(PartialOutputError {
                    text: resp.text,
                    thinking: resp.thinking_text,
                    is_loop: false,
                    message,
                });
            }
        }
    }

    finalize_on_success(store, publisher, text_event, &resp.text).await;
    finalize_on_success(store, publisher, thinking_event, &resp.thinking_text).await;

    Ok(CollectedTurn {
        response: resp,
        text_event_seq: text_event,
        thinking_event_seq: thinking_event,
    })
}

async fn create_live_event(
    store: &dyn PersistenceStore,
    publisher: Option<&dyn EventPublisher>,
    event_type: &str,
    metadata: serde_json::Value,
) -> Option<u64> {
    match store
        .create_timeline_event(event_type, EventStatus::Streaming, String::new(), metadata)
        .await
    {
        Ok(event) => {
            if let Some(pub_) = publisher {
                if let Err(e) = pub_.publish_timeline_created(&event).await {
                    warn!(error = %e, "failed to publish timeline-created event");
                }
            }
            Some(event.sequence_number)
        }
        Err(e) => {
            warn!(error = %e, event_type, "failed to create timeline event");
            None
        }
    }
}

async fn publish_chunk(publisher: &dyn EventPublisher, seq: u64, delta: &str) {
    if let Err(e) = publisher.publish_stream_chunk(seq, delta).await {
        warn!(error = %e, seq, "failed to publish stream chunk");
    }
}

async fn finalize_on_success(
    store: &dyn PersistenceStore,
    publisher: Option<&dyn EventPublisher>,
    seq: Option<u64>,
    content: &str,
) {
    let Some(seq) = seq else { return };
    match store
        .complete_timeline_event(seq, EventStatus::Completed, content.to_string(), json!({}))
        .await
    {
        Ok(()) => {
            if let Some(pub_) = publisher {
                let event = sre_store::TimelineEvent {
                    sequence_number: seq,
                    event_type: String::new(),
                    status: EventStatus::Completed,
                    content: content.to_string(),
                    metadata: json!({}),
                };
                if let Err(e) = pub_.publish_timeline_completed(&event).await {
                    warn!(error = %e, seq, "failed to publish timeline-completed event");
                }
            }
        }
        Err(e) => warn!(error = %e, seq, "failed to finalize timeline event"),
    }
}

async fn finalize_on_loop(store: &dyn PersistenceStore, publisher: Option<&dyn EventPublisher>, seq: Option<u64>, content: &str) {
    // Loop-detected termination finalizes with the truncated text rather
    // than failing (§4.6).
    finalize_on_success(store, publisher, seq, content).await;
}

/// Finalizes with a detached, bounded deadline: the caller's context is
/// likely already cancelled by the time a stream error propagates, so this
/// cleanup must not depend on it (§5 "Resource hygiene").
async fn finalize_on_error(store: &dyn PersistenceStore, seq: Option<u64>, status: EventStatus, message: &str) {
    let Some(seq) = seq else { return };
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        store.complete_timeline_event(seq, status, format!("Error: {message}"), json!({"is_error": true})),
    )
    .await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, seq, "failed to finalize timeline event on stream error"),
        Err(_) => warn!(seq, "detached finalize timed out after 5s"),
    }
}

/// Which section of a ReAct transcript the cumulative text currently sits
/// in, as tracked incrementally during streaming (§4.6 "ReAct-aware
/// streaming"). Distinct from [`crate::react_parser::parse_react_response`],
/// which runs once on the complete turn; this is a lighter-weight live
/// tracker restricted to the tier-1 (line-start) markers, since it only
/// needs to decide what to stream, not the final parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactPhase {
    Idle,
    Thought,
    Action,
    FinalAnswer,
}

struct ReactPhaseSnapshot {
    phase: ReactPhase,
    /// Text from the last `Thought:`/`Final Answer:` marker onward,
    /// whichever is currently active.
    content: String,
}

fn last_marker(haystack: &str, marker: &str) -> Option<usize> {
    haystack.rfind(marker).map(|i| i + marker.len())
}

fn detect_react_phase(cumulative: &str) -> ReactPhaseSnapshot {
    if let Some(start) = last_marker(cumulative, "Final Answer:") {
        return ReactPhaseSnapshot {
            phase: ReactPhase::FinalAnswer,
            content: cumulative[start..].trim_start().to_string(),
        };
    }
    if last_marker(cumulative, "Action:").is_some() {
        return ReactPhaseSnapshot { phase: ReactPhase::Action, content: String::new() };
    }
    if let Some(start) = last_marker(cumulative, "Thought:") {
        return ReactPhaseSnapshot {
            phase: ReactPhase::Thought,
            content: cumulative[start..].trim_start().to_string(),
        };
    }
    ReactPhaseSnapshot { phase: ReactPhase::Idle, content: String::new() }
}

/// Result of draining one ReAct-controller model call with phase-aware live
/// streaming applied (§4.6). Unlike [`CollectedTurn`], `thought_event_seq`
/// tracks an `llm_thinking` event opened from TEXT content recognized as a
/// `Thought:` section (metadata `{source: "react"}`) rather than a native
/// `Chunk::Thinking` delta, and `final_event_seq` tracks a `final_analysis`
/// event opened once the cumulative text enters the `Final Answer:` section.
/// `react_thought_streamed` / `final_answer_streamed` tell the controller
/// not to create duplicate events for content already streamed live.
pub struct ReactCollectedTurn {
    pub response: LlmResponse,
    pub thought_event_seq: Option<u64>,
    pub final_event_seq: Option<u64>,
    pub react_thought_streamed: bool,
    pub final_answer_streamed: bool,
}

/// ReAct variant of [`collect_with_live_events`]: text deltas drive a phase
/// detector instead of being streamed verbatim as one `final_analysis`
/// blob, since a ReAct turn's raw text embeds `Thought:`/`Action:`/
/// `Final Answer:` sections the caller wants surfaced as distinct events.
/// Action text is deliberately not streamed live — it is short, and the
/// controller re-renders it as a `tool_call` event once the full response
/// is parsed (§4.6).
pub async fn collect_react_stream(
    mut stream: ChunkStream,
    store: &dyn PersistenceStore,
    publisher: Option<&dyn EventPublisher>,
    loop_cfg: &LoopDetectionConfig,
) -> Result<ReactCollectedTurn, PartialOutputError> {
    let mut resp = LlmResponse::default();
    let mut thought_event: Option<u64> = None;
    let mut final_event: Option<u64> = None;
    let mut thought_streamed_len = 0usize;
    let mut final_streamed_len = 0usize;
    let mut last_checked_len = 0usize;

    loop {
        let chunk = match stream.next().await {
            Some(c) => c,
            None => break,
        };
        match chunk {
            Chunk::Text(delta) => {
                if delta.is_empty() {
                    continue;
                }
                resp.text.push_str(&delta);

                if resp.text.len() - last_checked_len >= loop_cfg.check_interval_chars {
                    last_checked_len = resp.text.len();
                    if let Some(cut) = detect_repetition(&resp.text, loop_cfg) {
                        resp.text.truncate(cut);
                        let snapshot = detect_react_phase(&resp.text);
                        finalize_on_loop(store, publisher, thought_event, thought_content(&snapshot)).await;
                        finalize_on_loop(store, publisher, final_event, final_content(&snapshot)).await;
                        drop(stream);
                        return Err(PartialOutputError {
                            text: resp.text,
                            thinking: resp.thinking_text,
                            is_loop: true,
                            message: "repeated output detected".to_string(),
                        });
                    }
                }

                let snapshot = detect_react_phase(&resp.text);
                match snapshot.phase {
                    ReactPhase::Thought => {
                        if thought_event.is_none() {
                            thought_event =
                                create_live_event(store, publisher, "llm_thinking", json!({"source": "react"})).await;
                        }
                        if let (Some(seq), Some(pub_)) = (thought_event, publisher) {
                            if snapshot.content.len() > thought_streamed_len {
                                publish_chunk(pub_, seq, &snapshot.content[thought_streamed_len..]).await;
                            }
                        }
                        thought_streamed_len = snapshot.content.len();
                    }
                    ReactPhase::FinalAnswer => {
                        if final_event.is_none() {
                            final_event = create_live_event(store, publisher, "final_analysis", json!({})).await;
                        }
                        if let (Some(seq), Some(pub_)) = (final_event, publisher) {
                            if snapshot.content.len() > final_streamed_len {
                                publish_chunk(pub_, seq, &snapshot.content[final_streamed_len..]).await;
                            }
                        }
                        final_streamed_len = snapshot.content.len();
                    }
                    ReactPhase::Action | ReactPhase::Idle => {}
                }
            }
            Chunk::Thinking(delta) => resp.thinking_text.push_str(&delta),
            Chunk::ToolCall { id, name, arguments } => {
                resp.tool_calls.push(sre_model::ToolCallEnvelope { id, name, arguments })
            }
            Chunk::CodeExecution(ce) => resp.code_executions.push(ce),
            Chunk::Grounding(g) => resp.groundings.push(g),
            Chunk::Usage(u) => resp.usage = Some(u),
            Chunk::Error(message) => {
                drop(stream);
                finalize_on_error(store, thought_event, EventStatus::Failed, &message).await;
                finalize_on_error(store, final_event, EventStatus::Failed, &message).await;
                return Err(PartialOutputError {
                    text: resp.text,
                    thinking: resp.thinking_text,
                    is_loop: false,
                    message,
                });
            }
        }
    }

    let final_snapshot = detect_react_phase(&resp.text);
    finalize_on_success(store, publisher, thought_event, thought_content(&final_snapshot)).await;
    finalize_on_success(store, publisher, final_event, final_content(&final_snapshot)).await;

    Ok(ReactCollectedTurn {
        response: resp,
        thought_event_seq: thought_event,
        final_event_seq: final_event,
        react_thought_streamed: thought_event.is_some(),
        final_answer_streamed: final_event.is_some(),
    })
}

fn thought_content(snapshot: &ReactPhaseSnapshot) -> &str {
    if snapshot.phase == ReactPhase::Thought {
        &snapshot.content
    } else {
        ""
    }
}

fn final_content(snapshot: &ReactPhaseSnapshot) -> &str {
    if snapshot.phase == ReactPhase::FinalAnswer {
        &snapshot.content
    } else {
        ""
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
