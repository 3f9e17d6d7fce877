// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::{Duration, Instant};

use sre_model::{CompletionRequest, ConversationMessage, TokenUsage};
use sre_tools::{canonicalize_tool_name, ToolCall, ToolCatalogue};

use crate::context::ExecutionContext;
use crate::prompts::react_system_suffix;
use crate::react_parser::parse_react_response;
use crate::result::ExecutionResult;
use crate::state::{is_timeout, IterationState};
use crate::streaming::{collect_react_stream, ReactCollectedTurn};
use crate::tool_lifecycle::run_tool_lifecycle;

use super::common::{
    call_force_conclusion, persist_message, persist_seed_messages, record_tool_list_interactions,
    record_turn_error_event, tag_forced_conclusion_events, TurnFailure,
};

/// Runs the ReAct controller (§4.2): tool calls are expressed as text and
/// parsed back out with [`parse_react_response`] rather than negotiated
/// through the model's native function-calling surface.
pub async fn run(ctx: &ExecutionContext, prev_stage_context: &str) -> ExecutionResult {
    let mut conversation = ctx.prompt_builder.initial_messages(prev_stage_context);
    let react_suffix = ConversationMessage::system(react_system_suffix());
    conversation.push(react_suffix);
    persist_seed_messages(ctx, &conversation).await;

    let catalogue = match ToolCatalogue::build(&ctx.tool_executors).await {
        Ok(c) => c,
        Err(e) => return ExecutionResult::failed(format!("failed to build tool catalogue: {e}"), TokenUsage::default()),
    };
    record_tool_list_interactions(ctx, &catalogue).await;

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
        let (result, remaining) = run_react_turn(ctx, conversation.clone(), timeout).await;

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
                let obs = format!("Observation: Error from previous attempt: {}", failure.describe());
                persist_and_push(ctx, &mut conversation, obs).await;
                continue;
            }
            Ok(turn) => turn,
        };

        usage_total.accumulate(&turn.response.usage.unwrap_or_default());
        state.record_success();

        let assistant_msg = ConversationMessage::assistant(turn.response.text.clone());
        persist_message(ctx, &assistant_msg).await;
        conversation.push(assistant_msg);

        let parsed = parse_react_response(&turn.response.text);

        if parsed.is_final_answer {
            return ExecutionResult::completed(parsed.final_answer, usage_total);
        }

        if parsed.has_action {
            let (endpoint, tool) = canonicalize_tool_name(&parsed.action);
            let endpoint = endpoint.unwrap_or_default();
            if parsed.is_unknown_tool || !catalogue.contains(&endpoint, &tool) {
                let obs = ctx.prompt_builder.unknown_tool_observation(&parsed.action, &catalogue.qualified_names());
                persist_and_push(ctx, &mut conversation, obs).await;
                continue;
            }

            let args: serde_json::Value = serde_json::from_str(&parsed.action_input)
                .unwrap_or_else(|_| serde_json::Value::String(parsed.action_input.clone()));
            let call = ToolCall { id: format!("react-{}", state.current_iteration), name: parsed.action.clone(), args };
            let outcome = run_tool_lifecycle(ctx, call, &conversation, remaining).await;
            usage_total.accumulate(&outcome.extra_usage);
            if outcome.is_error {
                let is_to = outcome.error.as_ref().map(is_timeout).unwrap_or(false);
                state.record_failure(outcome.content.clone(), is_to);
            }
            let obs = format!("Observation: {}", outcome.content);
            persist_and_push(ctx, &mut conversation, obs).await;
            continue;
        }

        let detail = parsed
            .error_message
            .clone()
            .unwrap_or_else(|| "no Action or Final Answer section found".to_string());
        let obs = ctx.prompt_builder.malformed_format_observation(&detail);
        persist_and_push(ctx, &mut conversation, obs).await;
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
            let parsed = parse_react_response(&turn.response.text);
            let final_text = if parsed.is_final_answer && !parsed.final_answer.trim().is_empty() {
                parsed.final_answer
            } else if !parsed.thought.trim().is_empty() {
                parsed.thought
            } else {
                turn.response.text.clone()
            };
            ExecutionResult::completed(final_text, usage_total)
        }
        Err(failure) => {
            if failure.is_cancelled() {
                return ExecutionResult::cancelled(failure.describe(), usage_total);
            }
            ExecutionResult::failed(failure.describe(), usage_total)
        }
    }
}

async fn persist_and_push(ctx: &ExecutionContext, conversation: &mut Vec<ConversationMessage>, content: String) {
    let msg = ConversationMessage::user(content);
    persist_message(ctx, &msg).await;
    conversation.push(msg);
}

/// ReAct variant of [`super::common::run_turn`]: no tool schemas are bound
/// (the model is instructed via [`react_system_suffix`] to emit
/// `Action:`/`Action Input:` text instead), and the stream is drained with
/// [`collect_react_stream`] rather than the native live-event collector.
async fn run_react_turn(
    ctx: &ExecutionContext,
    messages: Vec<ConversationMessage>,
    timeout: Duration,
) -> (Result<ReactCollectedTurn, TurnFailure>, Duration) {
    let start = Instant::now();
    let request = CompletionRequest { messages, tools: vec![] };

    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(TurnFailure::Cancelled),
        outcome = tokio::time::timeout(timeout, async {
            let stream = ctx.model.generate(request).await.map_err(TurnFailure::Other)?;
            collect_react_stream(stream, ctx.store.as_ref(), ctx.publisher.as_deref(), &ctx.config.loop_detection)
                .await
                .map_err(TurnFailure::Partial)
        }) => {
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

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use sre_config::Config;
    use sre_model::{Chunk, ScriptedMockClient};
    use sre_store::InMemoryStore;
    use sre_tools::{OutputCategory, ToolDefinition, ToolExecutor, ToolResult};
    use std::sync::Arc;

    use crate::prompts::DefaultPromptBuilder;
    use crate::result::RunStatus;

    struct ShellExecutor;

    #[async_trait]
    impl ToolExecutor for ShellExecutor {
        fn endpoint_id(&self) -> &str {
            "shell"
        }
        async fn execute(&self, call: &ToolCall, _deadline: Duration) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(call.id.clone(), call.name.clone(), "disk usage: 40%"))
        }
        async fn list_tools(&self) -> anyhow::Result<Vec<ToolDefinition>> {
            Ok(vec![ToolDefinition {
                name: "run".into(),
                description: "run a shell command".into(),
                parameters: json!({"type":"object"}),
                output_category: OutputCategory::Generic,
            }])
        }
    }

    fn ctx_with(client: ScriptedMockClient) -> ExecutionContext {
        ExecutionContext::new(
            "s".into(),
            "st".into(),
            "e".into(),
            Config::default(),
            Arc::new(client),
            vec![Arc::new(ShellExecutor)],
            Arc::new(DefaultPromptBuilder::new("alert", "runbook")),
            Arc::new(InMemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn unknown_tool_action_yields_observation_and_continues() {
        let client = ScriptedMockClient::new(vec![
            vec![Chunk::Text("Thought: I need logs\nAction: logs_search\nAction Input: {}".into())],
            vec![Chunk::Text("Thought: ok\nFinal Answer: all clear".into())],
        ]);
        let ctx = ctx_with(client);
        let result = run(&ctx, "").await;
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.final_analysis, "all clear");
    }

    #[tokio::test]
    async fn mid_line_final_answer_is_recognized() {
        let client = ScriptedMockClient::new(vec![vec![Chunk::Text(
            "Thought: checking. Final Answer: disk is fine".into(),
        )]]);
        let ctx = ctx_with(client);
        let result = run(&ctx, "").await;
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.final_analysis, "disk is fine");
    }

    #[tokio::test]
    async fn action_runs_tool_and_appends_observation() {
        let client = ScriptedMockClient::new(vec![
            vec![Chunk::Text("Thought: check disk\nAction: shell.run\nAction Input: {\"cmd\": \"df\"}".into())],
            vec![Chunk::Text("Thought: done\nFinal Answer: disk usage is 40%".into())],
        ]);
        let ctx = ctx_with(client);
        let result = run(&ctx, "").await;
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.final_analysis, "disk usage is 40%");
    }
}
