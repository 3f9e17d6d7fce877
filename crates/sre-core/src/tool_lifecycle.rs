// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use sre_model::{CompletionRequest, ConversationMessage, Role, TokenUsage};
use sre_store::{EventStatus, LlmInteraction, McpInteraction};
use sre_tools::{canonicalize_tool_name, OutputCategory, ToolCall, ToolExecutor};
use tracing::warn;

use crate::context::ExecutionContext;
use crate::streaming::collect_stream;
use crate::truncation::{truncate_for_storage, truncate_for_summarization_input};

/// What a tool call contributed back to the caller (§4.5): the content to
/// append as the tool-role message, whether it errored, and any additional
/// token usage spent on a fail-open summarization sub-call.
pub struct ToolOutcome {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
    pub error: Option<anyhow::Error>,
    pub extra_usage: TokenUsage,
}

/// Runs the full six-step tool-call lifecycle (§4.5) for one parsed call.
///
/// `conversation` is the in-memory transcript so far, used verbatim (minus
/// system messages) as context for the fail-open summarization sub-call.
pub async fn run_tool_lifecycle(
    ctx: &ExecutionContext,
    call: ToolCall,
    conversation: &[ConversationMessage],
    deadline: Duration,
) -> ToolOutcome {
    // Step 1: normalize.
    let (endpoint, tool) = canonicalize_tool_name(&call.name);
    let endpoint = endpoint.unwrap_or_default();

    // Step 2: open event.
    let event_seq = ctx
        .store
        .create_timeline_event(
            "tool_call",
            EventStatus::Streaming,
            String::new(),
            json!({"endpoint": endpoint, "tool": tool, "arguments": call.args}),
        )
        .await
        .ok();
    if let (Some(seq), Some(publisher)) = (event_seq.as_ref(), ctx.publisher.as_ref()) {
        if let Err(e) = publisher.publish_timeline_created(seq).await {
            warn!(error = %e, "failed to publish tool_call created event");
        }
    }

    let executor = ctx.tool_executors.iter().find(|e| e.endpoint_id() == endpoint);

    // Step 3: execute.
    let start = Instant::now();
    let exec_result = match executor {
        Some(executor) => executor.execute(&call, deadline).await,
        None => Err(anyhow::anyhow!("no tool executor registered for endpoint \"{endpoint}\"")),
    };
    let duration = start.elapsed();

    let result = match exec_result {
        Ok(result) => result,
        Err(err) => {
            let message = format!("Error executing tool: {err}");
            finalize_event(ctx, event_seq.as_ref(), EventStatus::Completed, message.clone(), true).await;
            persist_interaction(ctx, &endpoint, &tool, &call.args, &message, duration, true).await;
            return ToolOutcome {
                call_id: call.id,
                tool_name: call.name,
                content: message,
                is_error: true,
                error: Some(err),
                extra_usage: TokenUsage::default(),
            };
        }
    };

    // Step 4: persist interaction (success path uses the storage-truncated
    // result, matching what step 5 finalizes the event with).
    let truncated = truncate_for_storage(&result.content, OutputCategory::Generic, &ctx.config.truncation);
    persist_interaction(ctx, &endpoint, &tool, &call.args, &truncated, duration, result.is_error).await;

    // Step 5: complete event.
    finalize_event(
        ctx,
        event_seq.as_ref(),
        EventStatus::Completed,
        truncated.clone(),
        result.is_error,
    )
    .await;

    if result.is_error {
        return ToolOutcome {
            call_id: call.id,
            tool_name: call.name,
            content: truncated,
            is_error: true,
            error: None,
            extra_usage: TokenUsage::default(),
        };
    }

    // Step 6: fail-open summarization.
    let (content, extra_usage) =
        maybe_summarize(ctx, &endpoint, conversation, &truncated, deadline).await;

    ToolOutcome {
        call_id: call.id,
        tool_name: call.name,
        content,
        is_error: false,
        error: None,
        extra_usage,
    }
}

async fn finalize_event(
    ctx: &ExecutionContext,
    event_seq: Option<&sre_store::TimelineEvent>,
    status: EventStatus,
    content: String,
    is_error: bool,
) {
    let Some(event) = event_seq else { return };
    match ctx
        .store
        .complete_timeline_event(event.sequence_number, status, content.clone(), json!({"is_error": is_error}))
        .await
    {
        Ok(()) => {
            if let Some(publisher) = ctx.publisher.as_ref() {
                let completed = sre_store::TimelineEvent {
                    sequence_number: event.sequence_number,
                    event_type: "tool_call".to_string(),
                    status,
                    content,
                    metadata: json!({"is_error": is_error}),
                };
                if let Err(e) = publisher.publish_timeline_completed(&completed).await {
                    warn!(error = %e, "failed to publish tool_call completed event");
                }
            }
        }
        Err(e) => warn!(error = %e, "failed to finalize tool_call event"),
    }
}

async fn persist_interaction(
    ctx: &ExecutionContext,
    endpoint: &str,
    tool: &str,
    args: &Value,
    result: &str,
    duration: Duration,
    is_error: bool,
) {
    let interaction = McpInteraction {
        endpoint: endpoint.to_string(),
        tool: tool.to_string(),
        arguments: args.clone(),
        result: result.to_string(),
        duration,
        is_error,
    };
    if let Err(e) = ctx.store.record_mcp_interaction(interaction).await {
        warn!(error = %e, endpoint, tool, "failed to persist MCP interaction");
    }
}

/// Chars-÷-4 token estimate (§4.5 step 6, §6), the same rough approximation
/// used elsewhere for context-budget accounting.
fn estimate_tokens(content: &str) -> usize {
    content.len() / 4
}

async fn maybe_summarize(
    ctx: &ExecutionContext,
    endpoint: &str,
    conversation: &[ConversationMessage],
    result: &str,
    deadline: Duration,
) -> (String, TokenUsage) {
    if !ctx.config.summarization.enabled {
        return (result.to_string(), TokenUsage::default());
    }
    if estimate_tokens(result) <= ctx.config.summarization.threshold_tokens {
        return (result.to_string(), TokenUsage::default());
    }

    let context_text = conversation
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");
    let safety_netted = truncate_for_summarization_input(result, &ctx.config.truncation);
    let messages = ctx.prompt_builder.summarization_prompt(&context_text, &safety_netted);
    let request = CompletionRequest { messages, tools: vec![] };

    let original_len = result.len();
    let summarized = tokio::time::timeout(deadline, async {
        let stream = ctx.model.generate(request).await?;
        collect_stream(stream).await.map_err(|e| anyhow::anyhow!(e.message))
    })
    .await;

    match summarized {
        Ok(Ok(resp)) if !resp.text.trim().is_empty() => {
            let event_type = "mcp_tool_summary";
            if let Ok(event) = ctx
                .store
                .create_timeline_event(event_type, EventStatus::Streaming, String::new(), json!({}))
                .await
            {
                let _ = ctx
                    .store
                    .complete_timeline_event(event.sequence_number, EventStatus::Completed, resp.text.clone(), json!({}))
                    .await;
            }
            let note = format!(
                "[Summarized: original tool result from \"{endpoint}\" was {original_len} bytes, \
                 summarized below to fit context budget]\n{}",
                resp.text
            );
            (note, resp.usage.unwrap_or_default())
        }
        _ => (result.to_string(), TokenUsage::default()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use sre_config::Config;
    use sre_model::{MockModelClient, ScriptedMockClient};
    use sre_store::InMemoryStore;
    use sre_tools::{ToolDefinition, ToolResult};
    use std::sync::Arc;

    struct EchoExecutor;

    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        fn endpoint_id(&self) -> &str {
            "k8s"
        }
        async fn execute(&self, call: &ToolCall, _deadline: Duration) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(call.id.clone(), call.name.clone(), "pod-a Running\npod-b CrashLoopBackOff"))
        }
        async fn list_tools(&self) -> anyhow::Result<Vec<ToolDefinition>> {
            Ok(vec![])
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl ToolExecutor for FailingExecutor {
        fn endpoint_id(&self) -> &str {
            "k8s"
        }
        async fn execute(&self, _call: &ToolCall, _deadline: Duration) -> anyhow::Result<ToolResult> {
            Err(anyhow::anyhow!("connection refused"))
        }
        async fn list_tools(&self) -> anyhow::Result<Vec<ToolDefinition>> {
            Ok(vec![])
        }
    }

    fn ctx_with(executors: Vec<Arc<dyn ToolExecutor>>) -> ExecutionContext {
        use crate::prompts::DefaultPromptBuilder;
        ExecutionContext::new(
            "s".into(),
            "st".into(),
            "e".into(),
            Config::default(),
            Arc::new(MockModelClient),
            executors,
            Arc::new(DefaultPromptBuilder::new("alert", "runbook")),
            Arc::new(InMemoryStore::new()),
        )
    }

    fn call(name: &str) -> ToolCall {
        ToolCall { id: "call-1".into(), name: name.into(), args: json!({"namespace": "prod"}) }
    }

    #[tokio::test]
    async fn success_path_persists_interaction_and_completes_event() {
        let ctx = ctx_with(vec![Arc::new(EchoExecutor)]);
        let outcome = run_tool_lifecycle(&ctx, call("k8s.get_pods"), &[], Duration::from_secs(5)).await;
        assert!(!outcome.is_error);
        assert!(outcome.content.contains("CrashLoopBackOff"));
    }

    #[tokio::test]
    async fn missing_endpoint_surfaces_as_error() {
        let ctx = ctx_with(vec![]);
        let outcome = run_tool_lifecycle(&ctx, call("k8s.get_pods"), &[], Duration::from_secs(5)).await;
        assert!(outcome.is_error);
        assert!(outcome.content.contains("Error executing tool"));
    }

    #[tokio::test]
    async fn executor_error_is_reported_and_not_panicking() {
        let ctx = ctx_with(vec![Arc::new(FailingExecutor)]);
        let outcome = run_tool_lifecycle(&ctx, call("k8s.get_pods"), &[], Duration::from_secs(5)).await;
        assert!(outcome.is_error);
        assert!(outcome.content.contains("connection refused"));
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn raw_name_without_dot_uses_empty_endpoint() {
        let ctx = ctx_with(vec![]);
        let outcome = run_tool_lifecycle(&ctx, call("get_pods"), &[], Duration::from_secs(5)).await;
        assert!(outcome.is_error);
    }

    #[tokio::test]
    async fn below_threshold_result_is_not_summarized() {
        let mut cfg = Config::default();
        cfg.summarization.threshold_tokens = 1_000_000;
        let ctx = ExecutionContext::new(
            "s".into(),
            "st".into(),
            "e".into(),
            cfg,
            Arc::new(ScriptedMockClient::always_text("should not be called")),
            vec![Arc::new(EchoExecutor)],
            Arc::new(crate::prompts::DefaultPromptBuilder::new("alert", "runbook")),
            Arc::new(InMemoryStore::new()),
        );
        let outcome = run_tool_lifecycle(&ctx, call("k8s.get_pods"), &[], Duration::from_secs(5)).await;
        assert!(outcome.content.contains("CrashLoopBackOff"));
        assert_eq!(outcome.extra_usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn above_threshold_result_is_summarized_and_wrapped() {
        let mut cfg = Config::default();
        cfg.summarization.threshold_tokens = 1;
        let ctx = ExecutionContext::new(
            "s".into(),
            "st".into(),
            "e".into(),
            cfg,
            Arc::new(ScriptedMockClient::always_text("short summary")),
            vec![Arc::new(EchoExecutor)],
            Arc::new(crate::prompts::DefaultPromptBuilder::new("alert", "runbook")),
            Arc::new(InMemoryStore::new()),
        );
        let outcome = run_tool_lifecycle(&ctx, call("k8s.get_pods"), &[], Duration::from_secs(5)).await;
        assert!(outcome.content.contains("Summarized"));
        assert!(outcome.content.contains("short summary"));
    }
}
