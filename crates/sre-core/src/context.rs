// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use sre_config::Config;
use sre_model::{ConversationMessage, ModelClient};
use sre_store::{EventPublisher, PersistenceStore};
use sre_tools::ToolExecutor;
use tokio_util::sync::CancellationToken;

/// Builds the prompts each controller variant needs (§6 `PromptBuilder`).
///
/// Generalized from a single system-prompt builder to the five prompt
/// shapes this core needs. Implementations are free to template in the
/// alert payload and the runbook text however the caller's front-end
/// assembles them — the core only ever consumes the resulting
/// strings/messages.
pub trait PromptBuilder: Send + Sync {
    /// Seed messages for the iterating and ReAct controllers: `{System,
    /// User}` built from the alert and the runbook, plus whatever the
    /// previous pipeline stage handed down in `prev_stage_context`.
    fn initial_messages(&self, prev_stage_context: &str) -> Vec<ConversationMessage>;

    /// Seed messages for the single-shot controller.
    fn single_shot_messages(&self, input: &str) -> Vec<ConversationMessage>;

    /// Turn-1 `{System, User}` seed for the scoring controller (§4.4).
    fn scoring_messages(&self, input: &str) -> Vec<ConversationMessage>;

    /// Reminder appended to the scoring conversation after a turn whose
    /// last line did not parse as an integer score.
    fn scoring_retry_reminder(&self) -> String;

    /// Turn-2 user prompt for the scoring controller's missing-tools report.
    fn missing_tools_report_prompt(&self) -> String;

    /// Appended without tools bound once the iteration budget is
    /// exhausted, to coerce a terminal answer (§4.1/§4.2 `force_conclusion`).
    fn force_conclusion_prompt(&self) -> String;

    /// Prompt used for the tool-result summarization sub-call (§4.5 step 6).
    /// `conversation_context` excludes system messages, per the contract.
    fn summarization_prompt(&self, conversation_context: &str, tool_result: &str) -> Vec<ConversationMessage>;

    /// User-role observation appended when a ReAct action names a tool not
    /// present in the catalogue (§4.2, §7).
    fn unknown_tool_observation(&self, attempted: &str, available_tools: &[String]) -> String;

    /// User-role observation appended when the ReAct parser could not make
    /// sense of the model's output (§4.2).
    fn malformed_format_observation(&self, detail: &str) -> String;
}

/// Thread-safe interface a sub-agent dispatcher implements so the iterating
/// controller can fold delegated results back into the conversation (§4.1,
/// §5). Non-blocking drain plus a blocking wait, following the same
/// channel-based draining pattern used for tool events, generalized to
/// cross-task delivery.
#[async_trait]
pub trait SubAgentCollector: Send + Sync {
    /// Non-blocking: take every result that has already arrived.
    fn try_drain_results(&self) -> Vec<String>;

    /// `true` if a sub-agent dispatch is outstanding and has not yet
    /// reported back.
    fn has_pending(&self) -> bool;

    /// Block until the next pending result arrives, or the context is
    /// cancelled.
    async fn wait_for_result(&self) -> anyhow::Result<String>;
}

/// Process-wide per-session handle the caller builds once and the
/// controller treats as read-only (§3 `ExecutionContext`).
pub struct ExecutionContext {
    pub session_id: String,
    pub stage_id: String,
    pub execution_id: String,
    pub config: Config,
    pub model: Arc<dyn ModelClient>,
    pub tool_executors: Vec<Arc<dyn ToolExecutor>>,
    pub prompt_builder: Arc<dyn PromptBuilder>,
    pub store: Arc<dyn PersistenceStore>,
    pub publisher: Option<Arc<dyn EventPublisher>>,
    pub sub_agents: Option<Arc<dyn SubAgentCollector>>,
    /// Stands in for Go's `context.Context` cancellation (§5). A fresh
    /// token never fires; callers wanting to cancel an in-flight `Run`
    /// clone this token before constructing the context and call `cancel()`
    /// on their clone.
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(
        session_id: impl Into<String>,
        stage_id: impl Into<String>,
        execution_id: impl Into<String>,
        config: Config,
        model: Arc<dyn ModelClient>,
        tool_executors: Vec<Arc<dyn ToolExecutor>>,
        prompt_builder: Arc<dyn PromptBuilder>,
        store: Arc<dyn PersistenceStore>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            stage_id: stage_id.into(),
            execution_id: execution_id.into(),
            config,
            model,
            tool_executors,
            prompt_builder,
            store,
            publisher: None,
            sub_agents: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_sub_agents(mut self, collector: Arc<dyn SubAgentCollector>) -> Self {
        self.sub_agents = Some(collector);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
