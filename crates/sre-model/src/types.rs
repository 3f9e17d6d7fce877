// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Role of a [`ConversationMessage`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A native tool call requested by the model, as carried on an assistant
/// message's `tool_calls` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallEnvelope {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// One turn of the conversation (§3 `ConversationMessage`).
///
/// The in-memory `Vec<ConversationMessage>` held by a running controller is
/// authoritative; durable storage mirrors it but a write failure there never
/// aborts the loop (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    /// Set on `Role::Tool` messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on `Role::Tool` messages: the normalized tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Set on `Role::Assistant` messages that requested native tool calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallEnvelope>,
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: Vec::new(),
        }
    }

    /// An assistant message carrying one or more native tool-call envelopes.
    /// `content` may be empty when the model produced no accompanying text.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallEnvelope>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
            tool_calls,
        }
    }

    /// A tool-role message carrying a call's result back to the model.
    ///
    /// Per §8 invariant 8, an empty result must still appear in durable
    /// storage with a non-empty placeholder; callers persisting this message
    /// are responsible for substituting one (`content` here may legitimately
    /// be empty — the in-memory conversation keeps the true content so the
    /// model sees it verbatim).
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// A tool schema advertised to the model for native function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Request sent to a [`crate::ModelClient`].
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ConversationMessage>,
    pub tools: Vec<ToolSchema>,
}

/// Provider-emitted citations/sources attached to a response (e.g. for
/// web-search or URL-context features).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grounding {
    pub sources: Vec<String>,
    pub web_search_queries: Vec<String>,
    pub supports: Vec<String>,
}

/// One code-execution round trip the model performed inline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeExecution {
    pub code: String,
    pub result: String,
}

/// Token usage from one model call.  Additively accumulated across all
/// calls in a run, including summarization sub-calls (§8 invariant 7).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub thinking_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32, thinking_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            thinking_tokens,
        }
    }

    /// Accumulate another call's usage into this running total.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.thinking_tokens += other.thinking_tokens;
    }
}

/// One typed chunk streamed from a [`crate::ModelClient`] (§4.6, §6).
///
/// The stream is infallible at the type level: a terminal failure is itself
/// represented as `Chunk::Error` rather than a `Result::Err`, matching the
/// "at most one terminal Error chunk before close" contract.
#[derive(Debug, Clone)]
pub enum Chunk {
    Text(String),
    Thinking(String),
    ToolCall {
        id: String,
        name: String,
        /// Accumulated JSON arguments (may arrive across multiple deltas).
        arguments: String,
    },
    CodeExecution(CodeExecution),
    Grounding(Grounding),
    Usage(TokenUsage),
    /// A terminal error.  No further chunks follow on the same stream.
    Error(String),
}

/// Collected result of a fully-drained stream (§3 `LLMResponse`).
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub thinking_text: String,
    pub tool_calls: Vec<ToolCallEnvelope>,
    pub code_executions: Vec<CodeExecution>,
    pub groundings: Vec<Grounding>,
    pub usage: Option<TokenUsage>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
