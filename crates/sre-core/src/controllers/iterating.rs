// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use sre_model::{ConversationMessage, TokenUsage};
use sre_tools::ToolCall;

use crate::context::ExecutionContext;
use crate::result::ExecutionResult;
use crate::state::{is_timeout, IterationState};
use crate::tool_lifecycle::run_tool_lifecycle;

use super::common::{
    call_force_conclusion, catalogue_to_tool_schemas, persist_message, persist_seed_messages,
    record_auxiliary_content_events, record_tool_list_interactions, record_turn_error_event,
    retry_message, run_turn, tag_forced_conclusion_events, TurnFailure,
};

/// Runs the iterating controller (§4.1): a bounded multi-turn loop driving
/// native function-calling tool dispatch.
pub async fn run(ctx: &ExecutionContext, prev_stage_context: &str) -> ExecutionResult {
    let mut conversation = ctx.prompt_builder.initial_messages(prev_stage_context);
    persist_seed_messages(ctx, &conversation).await;

    let catalogue = match sre_tools::ToolCatalogue::build(&ctx.tool_executors).await {
        Ok(c) => c,
        Err(e) => return ExecutionResult::failed(format!("failed to build tool catalogue: {e}"), TokenUsage::default()),
    };
    record_tool_list_interactions(ctx, &catalogue).await;
    let tool_schemas = catalogue_to_tool_schemas(&catalogue);

    let mut state = IterationState::new(
        ctx.config.iteration.max_iterations,
        ctx.config.iteration.consecutive_timeout_threshold,
    );
    let mut usage_total = TokenUsage::default();

    loop {
        if state.iterations_exhausted() {
            break;
        }
        if state.consecutive_timeout_exceeded() {
            return ExecutionResult::failed(
                format!("aborted after {} consecutive timeouts", state.consecutive_timeout_threshold),
                usage_total,
            );
        }
        state.current_iteration += 1;

        if let Some(sub_agents) = &ctx.sub_agents {
            for result in sub_agents.try_drain_results() {
                let msg = ConversationMessage::user(result);
                persist_message(ctx, &msg).await;
                conversation.push(msg);
            }
        }

        let timeout = ctx.config.iteration.iteration_timeout();
        let (result, remaining) = run_turn(ctx, conversation.clone(), tool_schemas.clone(), timeout, "final_analysis").await;

        let turn = match result {
            Err(failure) => {
                if failure.is_cancelled() {
                    return ExecutionResult::cancelled(failure.describe(), usage_total);
                }
                let recoverable = matches!(&failure, TurnFailure::Partial(p) if !p.is_loop);
                if !recoverable {
                    record_turn_error_event(ctx, &failure.describe()).await;
                    state.record_failure(failure.describe(), failure.is_timeout());
                }
                let retry = retry_message(&failure);
                let msg = ConversationMessage::user(retry);
                persist_message(ctx, &msg).await;
                conversation.push(msg);
                continue;
            }
            Ok(turn) => turn,
        };

        usage_total.accumulate(&turn.response.usage.unwrap_or_default());
        state.record_success();
        record_auxiliary_content_events(ctx, &turn).await;

        if !turn.response.tool_calls.is_empty() {
            let assistant_msg =
                ConversationMessage::assistant_with_tool_calls(turn.response.text.clone(), turn.response.tool_calls.clone());
            if let Err(e) = ctx.store.append_message(&assistant_msg).await {
                return ExecutionResult::failed(format!("failed to persist assistant message: {e}"), usage_total);
            }
            conversation.push(assistant_msg);

            let mut last_is_error = false;
            let mut last_content = String::new();
            let mut last_is_timeout = false;
            for tc in turn.response.tool_calls.clone() {
                let args: serde_json::Value =
                    serde_json::from_str(&tc.arguments).unwrap_or_else(|_| serde_json::Value::String(tc.arguments.clone()));
                let call = ToolCall { id: tc.id.clone(), name: tc.name.clone(), args };
                let outcome = run_tool_lifecycle(ctx, call, &conversation, remaining).await;
                usage_total.accumulate(&outcome.extra_usage);

                let content = if outcome.content.is_empty() { "(empty result)".to_string() } else { outcome.content.clone() };
                let tool_msg = ConversationMessage::tool_result(outcome.call_id.clone(), outcome.tool_name.clone(), content);
                persist_message(ctx, &tool_msg).await;
                conversation.push(tool_msg);

                last_is_error = outcome.is_error;
                last_content = outcome.content;
                last_is_timeout = outcome.error.as_ref().map(is_timeout).unwrap_or(false);
            }
            if last_is_error {
                state.record_failure(last_content, last_is_timeout);
            }
            continue;
        }

        if let Some(sub_agents) = &ctx.sub_agents {
            if sub_agents.has_pending() {
                let assistant_msg = ConversationMessage::assistant(turn.response.text.clone());
                persist_message(ctx, &assistant_msg).await;
                conversation.push(assistant_msg);
                match sub_agents.wait_for_result().await {
                    Ok(result_text) => {
                        let msg = ConversationMessage::user(result_text);
                        persist_message(ctx, &msg).await;
                        conversation.push(msg);
                        continue;
                    }
                    Err(e) => return ExecutionResult::failed(e.to_string(), usage_total),
                }
            }
        }

        let assistant_msg = ConversationMessage::assistant(turn.response.text.clone());
        persist_message(ctx, &assistant_msg).await;
        return ExecutionResult::completed(turn.response.text, usage_total);
    }

    if state.last_interaction_failed {
        return ExecutionResult::failed(
            state
                .last_error_message
                .clone()
                .unwrap_or_else(|| "exhausted iterations after a failed turn".to_string()),
            usage_total,
        );
    }

    let timeout = ctx.config.iteration.iteration_timeout();
    match call_force_conclusion(ctx, &mut conversation, timeout).await {
        Ok(turn) => {
            usage_total.accumulate(&turn.response.usage.unwrap_or_default());
            tag_forced_conclusion_events(ctx, &turn, state.current_iteration, state.max_iterations).await;
            let assistant_msg = ConversationMessage::assistant(turn.response.text.clone());
            persist_message(ctx, &assistant_msg).await;
            ExecutionResult::completed(turn.response.text, usage_total)
        }
        Err(failure) => {
            if failure.is_cancelled() {
                return ExecutionResult::cancelled(failure.describe(), usage_total);
            }
            ExecutionResult::failed(failure.describe(), usage_total)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use sre_config::Config;
    use sre_model::{Chunk, ModelClient, ScriptedMockClient};
    use sre_store::InMemoryStore;
    use sre_tools::{OutputCategory, ToolDefinition, ToolExecutor, ToolResult};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::prompts::DefaultPromptBuilder;
    use crate::result::RunStatus;

    struct KExecutor;

    #[async_trait]
    impl ToolExecutor for KExecutor {
        fn endpoint_id(&self) -> &str {
            "k"
        }
        async fn execute(&self, call: &ToolCall, _deadline: Duration) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(call.id.clone(), call.name.clone(), "ok"))
        }
        async fn list_tools(&self) -> anyhow::Result<Vec<ToolDefinition>> {
            Ok(vec![ToolDefinition {
                name: "get".into(),
                description: "d".into(),
                parameters: json!({"type":"object"}),
                output_category: OutputCategory::Generic,
            }])
        }
    }

    fn ctx_with(cfg: Config, client: impl ModelClient + 'static) -> ExecutionContext {
        ExecutionContext::new(
            "s".into(),
            "st".into(),
            "e".into(),
            cfg,
            Arc::new(client),
            vec![Arc::new(KExecutor)],
            Arc::new(DefaultPromptBuilder::new("alert", "runbook")),
            Arc::new(InMemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn scenario_1_happy_native_tool_turn_then_final() {
        let client = ScriptedMockClient::new(vec![
            vec![
                Chunk::Thinking("t".into()),
                Chunk::Text("x".into()),
                Chunk::ToolCall { id: "c1".into(), name: "k.get".into(), arguments: "{}".into() },
                Chunk::Usage(TokenUsage::new(10, 20, 30)),
            ],
            vec![Chunk::Text("ok".into()), Chunk::Usage(TokenUsage::new(15, 25, 40))],
        ]);
        let ctx = ctx_with(Config::default(), client);
        let result = run(&ctx, "").await;
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.final_analysis, "ok");
        assert_eq!(result.tokens_used.total_tokens, 70);
    }

    struct SlowClient;

    #[async_trait]
    impl ModelClient for SlowClient {
        fn name(&self) -> &str {
            "slow"
        }
        async fn generate(&self, _req: sre_model::CompletionRequest) -> anyhow::Result<sre_model::ChunkStream> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Box::pin(futures::stream::iter(vec![Chunk::Text("late".into())])))
        }
    }

    #[tokio::test]
    async fn scenario_2_consecutive_timeouts_abort_run() {
        let mut cfg = Config::default();
        cfg.iteration.iteration_timeout_secs = 0;
        let store = Arc::new(InMemoryStore::new());
        let ctx = ExecutionContext::new(
            "s".into(),
            "st".into(),
            "e".into(),
            cfg,
            Arc::new(SlowClient),
            vec![],
            Arc::new(DefaultPromptBuilder::new("alert", "runbook")),
            store.clone(),
        );
        let result = run(&ctx, "").await;
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("aborted after 2 consecutive timeouts"));
        assert_eq!(store.mcp_interactions().len(), 0);
    }

    #[tokio::test]
    async fn scenario_5_forced_conclusion_emits_metadata() {
        let mut cfg = Config::default();
        cfg.iteration.max_iterations = 3;
        let client = ScriptedMockClient::new(vec![
            vec![
                Chunk::ToolCall { id: "1".into(), name: "k.get".into(), arguments: "{}".into() },
                Chunk::Usage(TokenUsage::new(1, 1, 0)),
            ],
            vec![
                Chunk::ToolCall { id: "2".into(), name: "k.get".into(), arguments: "{}".into() },
                Chunk::Usage(TokenUsage::new(1, 1, 0)),
            ],
            vec![
                Chunk::ToolCall { id: "3".into(), name: "k.get".into(), arguments: "{}".into() },
                Chunk::Usage(TokenUsage::new(1, 1, 0)),
            ],
            vec![Chunk::Text("system healthy".into()), Chunk::Usage(TokenUsage::new(1, 1, 0))],
        ]);
        let store = Arc::new(InMemoryStore::new());
        let ctx = ExecutionContext::new(
            "s".into(),
            "st".into(),
            "e".into(),
            cfg,
            Arc::new(client),
            vec![Arc::new(KExecutor)],
            Arc::new(DefaultPromptBuilder::new("alert", "runbook")),
            store.clone(),
        );
        let result = run(&ctx, "").await;
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.final_analysis, "system healthy");

        let events = store.list_timeline_events().await.unwrap();
        let tagged = events.iter().find(|e| e.metadata.get("forced_conclusion").is_some()).unwrap();
        assert_eq!(tagged.metadata["iterations_used"], 3);
        assert_eq!(tagged.metadata["max_iterations"], 3);
    }
}
