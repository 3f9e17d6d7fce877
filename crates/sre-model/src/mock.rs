// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{Chunk, CompletionRequest, ModelClient, Role, TokenUsage};

/// Deterministic mock client for tests.  Echoes the last user message back
/// as the assistant response.
#[derive(Default)]
pub struct MockModelClient;

#[async_trait]
impl ModelClient for MockModelClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, req: CompletionRequest) -> anyhow::Result<crate::ChunkStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "[no input]".to_string());

        let chunks = vec![
            Chunk::Text(format!("MOCK: {reply}")),
            Chunk::Usage(TokenUsage::new(10, 10, 0)),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// A pre-scripted mock client.  Each call to `generate` pops the next
/// response script from the front of the queue.  This lets tests specify
/// exact chunk sequences — including tool calls, loops, and mid-stream
/// errors — without network access.
pub struct ScriptedMockClient {
    scripts: Arc<Mutex<Vec<Vec<Chunk>>>>,
    name: String,
    /// The last `CompletionRequest` seen by this client, for assertions on
    /// what the controller actually sent (tool schemas bound, messages).
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedMockClient {
    /// Build a client from a list of response scripts.  The outer `Vec` is
    /// the ordered list of calls; the inner `Vec` is the chunk sequence
    /// emitted for that call.
    pub fn new(scripts: Vec<Vec<Chunk>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            name: "scripted-mock".into(),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: client that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![
            Chunk::Text(reply.into()),
            Chunk::Usage(TokenUsage::new(5, 5, 0)),
        ]])
    }

    /// Convenience: client that returns one tool call, then a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                Chunk::ToolCall {
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                Chunk::Usage(TokenUsage::new(10, 20, 0)),
            ],
            vec![Chunk::Text(final_text.into()), Chunk::Usage(TokenUsage::new(15, 25, 0))],
        ])
    }

    /// Convenience: client whose single call ends with a terminal error
    /// after emitting some text — exercises the partial-output path.
    pub fn partial_then_error(partial_text: impl Into<String>, err: impl Into<String>) -> Self {
        Self::new(vec![vec![Chunk::Text(partial_text.into()), Chunk::Error(err.into())]])
    }
}

#[async_trait]
impl ModelClient for ScriptedMockClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, req: CompletionRequest) -> anyhow::Result<crate::ChunkStream> {
        *self.last_request.lock().unwrap() = Some(req);
        let chunks = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec![Chunk::Text("[no more scripts]".into())]
            } else {
                scripts.remove(0)
            }
        };
        Ok(Box::pin(stream::iter(chunks)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::ConversationMessage;

    fn req() -> CompletionRequest {
        CompletionRequest {
            messages: vec![ConversationMessage::user("hi")],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let c = MockModelClient;
        let mut stream = c.generate(req()).await.unwrap();
        let first = stream.next().await.unwrap();
        match first {
            Chunk::Text(t) => assert!(t.contains("MOCK: hi")),
            other => panic!("unexpected first chunk: {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_single_text_reply() {
        let c = ScriptedMockClient::always_text("hello world");
        let mut stream = c.generate(req()).await.unwrap();
        let ev = stream.next().await.unwrap();
        assert!(matches!(ev, Chunk::Text(t) if t == "hello world"));
    }

    #[tokio::test]
    async fn scripted_tool_then_text_two_rounds() {
        let c = ScriptedMockClient::tool_then_text("call-1", "k.get", r#"{}"#, "done");

        let mut events = Vec::new();
        let mut stream = c.generate(req()).await.unwrap();
        while let Some(ev) = stream.next().await {
            events.push(ev);
        }
        assert!(events
            .iter()
            .any(|e| matches!(e, Chunk::ToolCall { name, .. } if name == "k.get")));

        let mut events2 = Vec::new();
        let mut stream2 = c.generate(req()).await.unwrap();
        while let Some(ev) = stream2.next().await {
            events2.push(ev);
        }
        assert!(events2.iter().any(|e| matches!(e, Chunk::Text(t) if t == "done")));
    }

    #[tokio::test]
    async fn scripted_fallback_when_scripts_exhausted() {
        let c = ScriptedMockClient::new(vec![]);
        let mut stream = c.generate(req()).await.unwrap();
        let ev = stream.next().await.unwrap();
        assert!(matches!(ev, Chunk::Text(t) if t.contains("no more scripts")));
    }

    #[tokio::test]
    async fn scripted_records_last_request() {
        let c = ScriptedMockClient::always_text("x");
        let _ = c.generate(req()).await.unwrap();
        assert!(c.last_request.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn partial_then_error_ends_with_error_chunk() {
        let c = ScriptedMockClient::partial_then_error("partial", "boom");
        let mut stream = c.generate(req()).await.unwrap();
        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev);
        }
        assert!(matches!(events.last(), Some(Chunk::Error(e)) if e == "boom"));
    }
}
