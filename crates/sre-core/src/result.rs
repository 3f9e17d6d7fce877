// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use sre_model::TokenUsage;

/// Terminal status of a controller run (§3 `ExecutionResult`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

/// The typed outcome every controller variant returns from `run` (§3, §6).
///
/// `final_analysis` is guaranteed non-empty when `status == Completed`; the
/// single-shot and ReAct force-conclusion paths fall back to thinking text,
/// then raw text, to honor that contract.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: RunStatus,
    pub final_analysis: String,
    pub error: Option<String>,
    pub tokens_used: TokenUsage,
}

impl ExecutionResult {
    pub fn completed(final_analysis: impl Into<String>, tokens_used: TokenUsage) -> Self {
        Self {
            status: RunStatus::Completed,
            final_analysis: final_analysis.into(),
            error: None,
            tokens_used,
        }
    }

    pub fn failed(message: impl Into<String>, tokens_used: TokenUsage) -> Self {
        Self {
            status: RunStatus::Failed,
            final_analysis: String::new(),
            error: Some(message.into()),
            tokens_used,
        }
    }

    pub fn timed_out(message: impl Into<String>, tokens_used: TokenUsage) -> Self {
        Self {
            status: RunStatus::TimedOut,
            final_analysis: String::new(),
            error: Some(message.into()),
            tokens_used,
        }
    }

    pub fn cancelled(message: impl Into<String>, tokens_used: TokenUsage) -> Self {
        Self {
            status: RunStatus::Cancelled,
            final_analysis: String::new(),
            error: Some(message.into()),
            tokens_used,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
