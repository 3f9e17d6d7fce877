// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;

/// A single tool invocation requested by the model (§3).
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim).
    pub id: String,
    /// Raw `endpoint.tool` name as emitted by the model, before
    /// normalization (§4.5 step 1).
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// The result of executing a tool via [`crate::ToolExecutor`] (§6).
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: message.into(),
            is_error: true,
        }
    }
}

/// Describes the shape of a tool's text output for context-aware truncation
/// (§6 content-truncation boundary).
///
/// When a tool result exceeds the configured size cap, the tool-call
/// lifecycle (§4.5) uses this category to pick the right extraction
/// strategy and the right bound from the truncation config. The core never
/// hard-codes a tool name to a strategy — each tool definition declares its
/// own category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal / process output: keep the first N + last M lines so both
    /// the command preamble and the final result are visible.
    HeadTail,
    /// Ordered match list: keep the leading matches so the model sees the
    /// highest-relevance results first.
    MatchList,
    /// File content: keep a head and tail window with a separator so the
    /// model sees both the top (imports, declarations) and the end (recent
    /// changes).
    FileContent,
    /// Generic text: hard-truncate at the character boundary.
    #[default]
    Generic,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_category_default_is_generic() {
        assert_eq!(OutputCategory::default(), OutputCategory::Generic);
    }

    #[test]
    fn tool_result_ok_is_not_error() {
        let r = ToolResult::ok("1", "k.get", "fine");
        assert!(!r.is_error);
        assert_eq!(r.content, "fine");
    }

    #[test]
    fn tool_result_err_is_error() {
        let r = ToolResult::err("1", "k.get", "boom");
        assert!(r.is_error);
        assert_eq!(r.content, "boom");
    }

    #[test]
    fn tool_call_carries_parsed_args() {
        let call = ToolCall { id: "1".into(), name: "k.get".into(), args: json!({"x": 1}) };
        assert_eq!(call.args["x"], 1);
    }
}
