// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::json;
use sre_model::{ConversationMessage, TokenUsage};

use crate::context::ExecutionContext;
use crate::result::ExecutionResult;

use super::common::{persist_message, persist_seed_messages, record_turn_error_event, retry_message, run_turn};

/// Runs the scoring controller (§4.4): a first turn retried up to
/// `scoring.max_retries` times until the model's last non-blank line parses
/// as an integer in `0..=100`, followed by a second turn asking which tools
/// the investigation would have used had they existed. Returns a JSON
/// envelope merging both turns' output.
pub async fn run(ctx: &ExecutionContext, input: &str) -> ExecutionResult {
    let mut conversation = ctx.prompt_builder.scoring_messages(input);
    persist_seed_messages(ctx, &conversation).await;

    let max_retries = ctx.config.scoring.max_retries.max(1);
    let timeout = ctx.config.iteration.iteration_timeout();
    let mut usage_total = TokenUsage::default();

    let mut scored: Option<(i32, String)> = None;

    for attempt in 0..max_retries {
        let (result, _) = run_turn(ctx, conversation.clone(), vec![], timeout, "score_analysis").await;
        match result {
            Err(failure) => {
                if failure.is_cancelled() {
                    return ExecutionResult::cancelled(failure.describe(), usage_total);
                }
                if failure.is_timeout() {
                    return ExecutionResult::timed_out(failure.describe(), usage_total);
                }
                record_turn_error_event(ctx, &failure.describe()).await;
                let reminder = retry_message(&failure);
                let msg = ConversationMessage::user(reminder);
                persist_message(ctx, &msg).await;
                conversation.push(msg);
                continue;
            }
            Ok(turn) => {
                usage_total.accumulate(&turn.response.usage.unwrap_or_default());
                let assistant_msg = ConversationMessage::assistant(turn.response.text.clone());
                persist_message(ctx, &assistant_msg).await;
                conversation.push(assistant_msg);

                match parse_trailing_score(&turn.response.text) {
                    Some(parsed) => {
                        scored = Some(parsed);
                        break;
                    }
                    None => {
                        if attempt + 1 >= max_retries {
                            break;
                        }
                        let reminder = ctx.prompt_builder.scoring_retry_reminder();
                        let msg = ConversationMessage::user(reminder);
                        persist_message(ctx, &msg).await;
                        conversation.push(msg);
                    }
                }
            }
        }
    }

    let Some((total_score, score_analysis)) = scored else {
        return ExecutionResult::failed("failed to extract score after retries", usage_total);
    };

    let report_prompt = ctx.prompt_builder.missing_tools_report_prompt();
    let msg = ConversationMessage::user(report_prompt);
    persist_message(ctx, &msg).await;
    conversation.push(msg);

    let (result, _) = run_turn(ctx, conversation.clone(), vec![], timeout, "missing_tools_analysis").await;
    let missing_tools_analysis = match result {
        Ok(turn) => {
            usage_total.accumulate(&turn.response.usage.unwrap_or_default());
            let assistant_msg = ConversationMessage::assistant(turn.response.text.clone());
            persist_message(ctx, &assistant_msg).await;
            turn.response.text
        }
        Err(failure) => {
            if failure.is_cancelled() {
                return ExecutionResult::cancelled(failure.describe(), usage_total);
            }
            if failure.is_timeout() {
                return ExecutionResult::timed_out(failure.describe(), usage_total);
            }
            record_turn_error_event(ctx, &failure.describe()).await;
            String::new()
        }
    };

    let merged = json!({
        "total_score": total_score,
        "score_analysis": score_analysis,
        "missing_tools_analysis": missing_tools_analysis,
    });
    ExecutionResult::completed(merged.to_string(), usage_total)
}

/// Parses the last non-blank line of `text` as an optionally `+`-signed
/// integer in `0..=100`. Returns the score and the text preceding that line
/// on success; `None` if the last non-blank line doesn't parse or is out of
/// range, which signals the caller to retry.
fn parse_trailing_score(text: &str) -> Option<(i32, String)> {
    let lines: Vec<&str> = text.lines().collect();
    let last_idx = lines.iter().rposition(|l| !l.trim().is_empty())?;
    let candidate = lines[last_idx].trim();
    let normalized = candidate.strip_prefix('+').unwrap_or(candidate);
    let score: i32 = normalized.parse().ok()?;
    if !(0..=100).contains(&score) {
        return None;
    }
    let analysis = lines[..last_idx].join("\n").trim_end().to_string();
    Some((score, analysis))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
