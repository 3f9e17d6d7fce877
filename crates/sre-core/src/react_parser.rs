// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Section {
    Thought,
    Action,
    ActionInput,
    FinalAnswer,
}

impl Section {
    fn key(self) -> &'static str {
        match self {
            Section::Thought => "thought",
            Section::Action => "action",
            Section::ActionInput => "action_input",
            Section::FinalAnswer => "final_answer",
        }
    }
}

/// Result of parsing one model turn's raw text as a ReAct transcript (§4.7).
#[derive(Debug, Clone, Default)]
pub struct ParsedReActResponse {
    pub thought: String,
    pub has_action: bool,
    pub action: String,
    pub action_input: String,
    pub is_final_answer: bool,
    pub final_answer: String,
    pub is_unknown_tool: bool,
    pub is_malformed: bool,
    pub error_message: Option<String>,
    pub found_sections: BTreeMap<String, bool>,
}

struct ParseState {
    current: Option<Section>,
    locked_final: bool,
    thought: String,
    action: String,
    action_input: String,
    final_answer: String,
    seen: HashSet<Section>,
}

impl ParseState {
    fn new() -> Self {
        Self {
            current: None,
            locked_final: false,
            thought: String::new(),
            action: String::new(),
            action_input: String::new(),
            final_answer: String::new(),
            seen: HashSet::new(),
        }
    }

    fn buffer_mut(&mut self, section: Section) -> &mut String {
        match section {
            Section::Thought => &mut self.thought,
            Section::Action => &mut self.action,
            Section::ActionInput => &mut self.action_input,
            Section::FinalAnswer => &mut self.final_answer,
        }
    }

    fn append_to_current(&mut self, text: &str) {
        let trimmed = text.trim_end();
        if trimmed.is_empty() {
            return;
        }
        if let Some(section) = self.current {
            let buf = self.buffer_mut(section);
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(trimmed.trim_start());
        }
    }

    fn start_section(&mut self, section: Section, content: &str) {
        match section {
            Section::FinalAnswer => {
                if self.locked_final {
                    // First final_answer wins; this one is discarded.
                    self.current = None;
                    return;
                }
                self.locked_final = true;
                self.final_answer = content.trim_start().to_string();
                self.seen.insert(Section::FinalAnswer);
                self.current = Some(Section::FinalAnswer);
            }
            Section::Action => {
                self.action = content.trim_start().to_string();
                self.action_input.clear();
                self.seen.insert(Section::Action);
                self.current = Some(Section::Action);
            }
            Section::ActionInput => {
                self.action_input = content.trim_start().to_string();
                self.seen.insert(Section::ActionInput);
                self.current = Some(Section::ActionInput);
            }
            Section::Thought => {
                self.thought = content.trim_start().to_string();
                self.seen.insert(Section::Thought);
                self.current = Some(Section::Thought);
            }
        }
    }
}

fn final_answer_mid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?][`*\s]*Final Answer:").unwrap())
}

fn action_mid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?][`*\s]*Action:").unwrap())
}

fn action_input_mid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?][`*\s]*Action Input:").unwrap())
}

/// Scans `text` for mid-line section markers (tier 2/3), splitting at the
/// earliest match and recursing on the remainder, so a line like
/// `"done.Final Answer: OOM on web-1."` both closes out the active section
/// and opens the new one within a single call.
fn feed(state: &mut ParseState, text: &str) {
    let mut remaining = text;
    loop {
        let action_input_allowed = state.seen.contains(&Section::Action);
        let mut candidates: Vec<(usize, usize, Section)> = Vec::new();
        if let Some(m) = final_answer_mid_re().find(remaining) {
            candidates.push((m.start(), m.end(), Section::FinalAnswer));
        }
        if let Some(m) = action_mid_re().find(remaining) {
            candidates.push((m.start(), m.end(), Section::Action));
        }
        if action_input_allowed {
            if let Some(m) = action_input_mid_re().find(remaining) {
                candidates.push((m.start(), m.end(), Section::ActionInput));
            }
        }
        candidates.sort_by_key(|(start, _, _)| *start);

        match candidates.first() {
            Some(&(start, end, section)) => {
                let prefix = &remaining[..=start];
                state.append_to_current(prefix);
                state.start_section(section, "");
                remaining = &remaining[end..];
                if remaining.is_empty() {
                    break;
                }
                // loop again: `remaining` may embed further markers.
            }
            None => {
                state.append_to_current(remaining);
                break;
            }
        }
    }
}

fn recover_action_without_colon(text: &str) -> Option<String> {
    let action_input_re = Regex::new(r"(?i)Action\s*Input\s*:").unwrap();
    let action_re = Regex::new(r"(?i)\bAction\b:?").unwrap();
    let candidate_re = Regex::new(r"^[\w-]+\.[\w-]+$").unwrap();

    let ai_match = action_input_re.find(text)?;
    let before = &text[..ai_match.start()];
    let last_action = action_re.find_iter(before).last()?;
    let after = &text[last_action.end()..];
    let first_line = after.lines().next().unwrap_or("").trim();
    if candidate_re.is_match(first_line) {
        Some(first_line.to_string())
    } else {
        None
    }
}

/// Parses one model turn's raw text into a [`ParsedReActResponse`] (§4.7).
pub fn parse_react_response(text: &str) -> ParsedReActResponse {
    let mut state = ParseState::new();

    'lines: for raw_line in text.lines() {
        let trimmed = raw_line.trim_start();

        if trimmed.starts_with("[Based on") {
            break 'lines;
        }
        if let Some(rest) = trimmed.strip_prefix("Observation:") {
            let rest_trim = rest.trim();
            let allowed = rest_trim.contains("Please specify")
                || rest_trim.contains("what Action you want to take")
                || rest_trim.contains("Error in reasoning");
            if !allowed {
                break 'lines;
            }
            state.append_to_current(raw_line);
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("Thought:") {
            state.start_section(Section::Thought, "");
            feed(&mut state, rest);
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("Action Input:") {
            state.start_section(Section::ActionInput, "");
            feed(&mut state, rest);
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("Action:") {
            state.start_section(Section::Action, "");
            feed(&mut state, rest);
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("Final Answer:") {
            state.start_section(Section::FinalAnswer, "");
            feed(&mut state, rest);
            continue;
        }
        if trimmed.trim_end() == "Thought" {
            state.start_section(Section::Thought, "");
            continue;
        }

        if trimmed.starts_with("Thought ") {
            state.append_to_current(raw_line);
            continue;
        }

        feed(&mut state, raw_line);
    }

    let mut has_action = state.seen.contains(&Section::Action) && !state.action.trim().is_empty();
    if !has_action && state.seen.contains(&Section::ActionInput) {
        if let Some(recovered) = recover_action_without_colon(text) {
            state.action = recovered;
            has_action = true;
            state.seen.insert(Section::Action);
        }
    }

    let final_answer_present = state.locked_final && !state.final_answer.trim().is_empty();
    let mut is_final_answer = final_answer_present;

    // §8 invariant 5: if both a valid action and a final answer are
    // present, the action wins — a final answer is terminal, so content
    // after it indicates confusion rather than a real conclusion.
    if has_action && final_answer_present {
        is_final_answer = false;
    }

    let mut is_unknown_tool = false;
    let mut error_message = None;
    if has_action && !state.action.contains('.') {
        is_unknown_tool = true;
        error_message = Some(format!(
            "\"{}\" is not a known tool name; tool names must be given in `endpoint.tool` form",
            state.action
        ));
    }

    let is_malformed = text.trim().is_empty() || state.seen.is_empty();

    let mut found_sections = BTreeMap::new();
    for section in [Section::Thought, Section::Action, Section::ActionInput, Section::FinalAnswer] {
        found_sections.insert(section.key().to_string(), state.seen.contains(&section));
    }

    ParsedReActResponse {
        thought: state.thought,
        has_action,
        action: state.action,
        action_input: state.action_input,
        is_final_answer,
        final_answer: state.final_answer,
        is_unknown_tool,
        is_malformed,
        error_message,
        found_sections,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
