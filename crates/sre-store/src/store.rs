// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sre_model::{ConversationMessage, TokenUsage};

use crate::timeline::{EventStatus, TimelineEvent};

/// A recorded model call (§4.3 "records exactly one LLM interaction tagged
/// with the configured label", §4.1's per-endpoint tool-list interaction).
#[derive(Debug, Clone)]
pub struct LlmInteraction {
    pub label: String,
    pub response_text: String,
    pub usage: TokenUsage,
    pub duration: Duration,
}

/// A recorded tool (MCP) call (§4.5 step 4).
#[derive(Debug, Clone)]
pub struct McpInteraction {
    pub endpoint: String,
    pub tool: String,
    pub arguments: Value,
    pub result: String,
    pub duration: Duration,
    pub is_error: bool,
}

/// The durable persistence bundle the controller core consumes (§6).
///
/// Six narrow, idempotent-by-sequence-number operations plus read-back.
/// A write failure here is logged and swallowed by the core (§7) — the
/// in-memory conversation and iteration state remain authoritative —
/// except for the assistant message write during a tool-bearing turn,
/// which the core treats as fatal because it would otherwise break the
/// audit trail silently.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Append one conversation turn. Message order mirrors append order.
    async fn append_message(&self, message: &ConversationMessage) -> anyhow::Result<()>;

    /// Create a new timeline event, returning it with its assigned
    /// `sequence_number`. Event sequence numbers are strictly increasing
    /// per execution.
    async fn create_timeline_event(
        &self,
        event_type: &str,
        status: EventStatus,
        content: String,
        metadata: Value,
    ) -> anyhow::Result<TimelineEvent>;

    /// Finalize a previously created event. Called exactly once per event;
    /// callers are responsible for only ever transitioning to a terminal
    /// status.
    async fn complete_timeline_event(
        &self,
        sequence_number: u64,
        status: EventStatus,
        content: String,
        metadata: Value,
    ) -> anyhow::Result<()>;

    async fn record_llm_interaction(&self, interaction: LlmInteraction) -> anyhow::Result<()>;

    async fn record_mcp_interaction(&self, interaction: McpInteraction) -> anyhow::Result<()>;

    /// Read back every timeline event created so far, in creation order —
    /// used for terminal querying and by tests asserting invariants 1/2.
    async fn list_timeline_events(&self) -> anyhow::Result<Vec<TimelineEvent>>;
}
