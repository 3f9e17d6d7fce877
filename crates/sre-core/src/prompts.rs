// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use sre_model::ConversationMessage;

use crate::context::PromptBuilder;

const REACT_INSTRUCTIONS: &str = "\
You are investigating a production alert using the runbook provided above. \
On every turn respond using EXACTLY this transcript format:

Thought: <your reasoning about what to do next>
Action: <endpoint.tool>
Action Input: <JSON arguments for the tool>

Once you have enough information to conclude the investigation, respond with:

Thought: <your final reasoning>
Final Answer: <a concise root-cause analysis and recommended remediation>

Only ever use tools listed as available. Do not invent tool names.";

const FORCE_CONCLUSION_PROMPT: &str = "\
You have used all of your available investigation turns. Do not request any \
further tool calls. Based on everything you have gathered so far, give your \
best-effort final analysis now: the most likely root cause, the evidence \
supporting it, and a recommended next step.";

const SCORING_RETRY_REMINDER: &str = "\
Your previous response did not end with a plain integer score on its own \
line. Please restate your evaluation, ending the response with a single \
line containing only the integer score from 0 to 100.";

const MISSING_TOOLS_REPORT_PROMPT: &str = "\
Separately from the score above, list any tools or information sources you \
would have used during this investigation if they had been available, and \
briefly explain what each would have told you.";

/// Default [`PromptBuilder`]: static-constant prompt bodies, generalized to
/// the five prompt shapes the controllers need.
pub struct DefaultPromptBuilder {
    pub alert_summary: String,
    pub runbook: String,
}

impl DefaultPromptBuilder {
    pub fn new(alert_summary: impl Into<String>, runbook: impl Into<String>) -> Self {
        Self {
            alert_summary: alert_summary.into(),
            runbook: runbook.into(),
        }
    }

    fn system_preamble(&self) -> String {
        format!(
            "You are an AI site-reliability engineer. You investigate production \
             alerts by following the runbook below and using the tools made \
             available to you, then produce a final root-cause analysis.\n\n\
             # Runbook\n{}\n",
            self.runbook
        )
    }
}

impl PromptBuilder for DefaultPromptBuilder {
    fn initial_messages(&self, prev_stage_context: &str) -> Vec<ConversationMessage> {
        let mut user_content = format!("# Alert\n{}\n", self.alert_summary);
        if !prev_stage_context.is_empty() {
            user_content.push_str(&format!("\n# Prior stage context\n{prev_stage_context}\n"));
        }
        vec![
            ConversationMessage::system(self.system_preamble()),
            ConversationMessage::user(user_content),
        ]
    }

    fn single_shot_messages(&self, input: &str) -> Vec<ConversationMessage> {
        vec![
            ConversationMessage::system(self.system_preamble()),
            ConversationMessage::user(input),
        ]
    }

    fn scoring_messages(&self, input: &str) -> Vec<ConversationMessage> {
        vec![
            ConversationMessage::system(
                "You are grading the quality of a site-reliability investigation. \
                 Evaluate the analysis below and end your response with a single \
                 line containing only an integer score from 0 to 100.",
            ),
            ConversationMessage::user(input),
        ]
    }

    fn scoring_retry_reminder(&self) -> String {
        SCORING_RETRY_REMINDER.to_string()
    }

    fn missing_tools_report_prompt(&self) -> String {
        MISSING_TOOLS_REPORT_PROMPT.to_string()
    }

    fn force_conclusion_prompt(&self) -> String {
        FORCE_CONCLUSION_PROMPT.to_string()
    }

    fn summarization_prompt(&self, conversation_context: &str, tool_result: &str) -> Vec<ConversationMessage> {
        vec![
            ConversationMessage::system(
                "You are a tool-output summarization assistant. Summarize the tool \
                 result below concisely, preserving any concrete numbers, error \
                 messages, or resource names the investigation above relies on.",
            ),
            ConversationMessage::user(format!(
                "# Investigation so far\n{conversation_context}\n\n# Tool result to summarize\n{tool_result}"
            )),
        ]
    }

    fn unknown_tool_observation(&self, attempted: &str, available_tools: &[String]) -> String {
        format!(
            "Observation: \"{attempted}\" is not a known tool. Available tools are: {}. \
             Tool names must be given in `endpoint.tool` form.",
            available_tools.join(", ")
        )
    }

    fn malformed_format_observation(&self, detail: &str) -> String {
        format!(
            "Observation: your response could not be parsed ({detail}). \
             Respond using exactly the `Thought: / Action: / Action Input:` or \
             `Thought: / Final Answer:` transcript format."
        )
    }
}

pub fn react_system_suffix() -> &'static str {
    REACT_INSTRUCTIONS
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> DefaultPromptBuilder {
        DefaultPromptBuilder::new("pod crash-looping", "check pod logs, then restart")
    }

    #[test]
    fn initial_messages_embeds_alert_and_runbook() {
        let msgs = builder().initial_messages("");
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].content.contains("check pod logs"));
        assert!(msgs[1].content.contains("pod crash-looping"));
    }

    #[test]
    fn initial_messages_includes_prior_stage_context_when_present() {
        let msgs = builder().initial_messages("prior stage found OOM kill");
        assert!(msgs[1].content.contains("prior stage found OOM kill"));
    }

    #[test]
    fn unknown_tool_observation_lists_available_tools() {
        let obs = builder().unknown_tool_observation("get_logs", &["k.get_pods".to_string()]);
        assert!(obs.contains("get_logs"));
        assert!(obs.contains("k.get_pods"));
    }
}
