// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use sre_model::{ConversationMessage, TokenUsage};
use sre_store::LlmInteraction;
use tracing::warn;

use crate::context::ExecutionContext;
use crate::result::ExecutionResult;

use super::common::{persist_message, persist_seed_messages, run_turn};

/// Runs the single-shot controller (§4.3): one model call, no tools, no
/// iteration loop. `label` identifies this call's [`LlmInteraction`] record;
/// `fallback_to_thinking` controls whether an empty text response falls
/// back to the model's thinking trace rather than returning an empty
/// analysis.
pub struct SingleShotController {
    pub label: String,
    pub fallback_to_thinking: bool,
}

impl SingleShotController {
    pub fn new(label: impl Into<String>, fallback_to_thinking: bool) -> Self {
        Self { label: label.into(), fallback_to_thinking }
    }

    pub async fn run(&self, ctx: &ExecutionContext, input: &str) -> ExecutionResult {
        let messages = ctx.prompt_builder.single_shot_messages(input);
        persist_seed_messages(ctx, &messages).await;

        let timeout = ctx.config.iteration.iteration_timeout();
        let (result, remaining) = run_turn(ctx, messages, vec![], timeout, "final_analysis").await;
        let elapsed = timeout.saturating_sub(remaining);

        match result {
            Ok(turn) => {
                let usage = turn.response.usage.unwrap_or_default();
                let text = if turn.response.text.trim().is_empty()
                    && self.fallback_to_thinking
                    && !turn.response.thinking_text.trim().is_empty()
                {
                    turn.response.thinking_text.clone()
                } else {
                    turn.response.text.clone()
                };

                let assistant_msg = ConversationMessage::assistant(text.clone());
                persist_message(ctx, &assistant_msg).await;

                self.record_interaction(ctx, text.clone(), usage, elapsed).await;
                ExecutionResult::completed(text, usage)
            }
            Err(failure) => {
                if failure.is_cancelled() {
                    return ExecutionResult::cancelled(failure.describe(), TokenUsage::default());
                }
                if failure.is_timeout() {
                    return ExecutionResult::timed_out(failure.describe(), TokenUsage::default());
                }
                ExecutionResult::failed(failure.describe(), TokenUsage::default())
            }
        }
    }

    async fn record_interaction(&self, ctx: &ExecutionContext, response_text: String, usage: TokenUsage, duration: Duration) {
        let interaction = LlmInteraction { label: self.label.clone(), response_text, usage, duration };
        if let Err(e) = ctx.store.record_llm_interaction(interaction).await {
            warn!(error = %e, label = %self.label, "failed to persist single-shot llm interaction");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
