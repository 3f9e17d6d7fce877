// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use sre_config::TruncationConfig;
use sre_tools::OutputCategory;

/// Storage-bound truncation applied before a tool result is persisted
/// (§4.5 step 4, §6's content-truncation boundary).
///
/// Dispatches on [`OutputCategory`] rather than tool name, so this function
/// never needs to know about any concrete tool; each tool definition
/// declares its own output shape. The bound itself always comes from
/// `config` — the core never inlines a size.
pub fn truncate_for_storage(content: &str, category: OutputCategory, config: &TruncationConfig) -> String {
    let cap_chars = match category {
        OutputCategory::HeadTail => config.storage_bound_head_tail,
        OutputCategory::MatchList => config.storage_bound_match_list,
        OutputCategory::FileContent => config.storage_bound_file_content,
        OutputCategory::Generic => config.storage_bound_generic,
    };
    truncate_to(content, category, cap_chars)
}

/// The larger safety-net bound applied to text handed to a summarization
/// sub-call (§4.5 step 6, §6).
pub fn truncate_for_summarization_input(content: &str, config: &TruncationConfig) -> String {
    truncate_to(content, OutputCategory::Generic, config.summarization_safety_net)
}

fn truncate_to(content: &str, category: OutputCategory, cap_chars: usize) -> String {
    if cap_chars == 0 || content.len() <= cap_chars {
        return content.to_string();
    }
    let omitted_bytes = content.len().saturating_sub(cap_chars);
    match category {
        OutputCategory::HeadTail => head_tail_lines(
            content,
            cap_chars,
            60,
            40,
            &format!("[... {{lines}} lines / {omitted_bytes} bytes omitted ...]"),
        ),
        OutputCategory::MatchList => head_lines(
            content,
            cap_chars,
            &format!(
                "[... {{lines}} more matches omitted ({omitted_bytes} bytes); \
                 use a more specific query to see them ...]"
            ),
        ),
        OutputCategory::FileContent => head_tail_lines(
            content,
            cap_chars,
            usize::MAX,
            usize::MAX,
            &format!(
                "[... {{lines}} lines omitted ({omitted_bytes} bytes); \
                 fetch a narrower range to see more ...]"
            ),
        ),
        OutputCategory::Generic => {
            let cut = content
                .char_indices()
                .take_while(|(i, _)| *i < cap_chars)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            let boundary = content[..cut].rfind('\n').map(|p| p + 1).unwrap_or(cut);
            format!(
                "{}\n[... {omitted_bytes} bytes omitted; content truncated to fit the storage bound ...]",
                &content[..boundary]
            )
        }
    }
}

fn head_tail_lines(content: &str, cap_chars: usize, head_n: usize, tail_n: usize, notice_tpl: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= head_n + tail_n {
        return hard_cut(content, cap_chars);
    }
    let head: Vec<&str> = lines.iter().take(head_n).copied().collect();
    let tail: Vec<&str> = lines.iter().skip(lines.len() - tail_n).copied().collect();
    let omitted_lines = lines.len() - head.len() - tail.len();
    let notice = notice_tpl.replace("{lines}", &omitted_lines.to_string());
    format!("{}\n{notice}\n{}", head.join("\n"), tail.join("\n"))
}

fn head_lines(content: &str, cap_chars: usize, notice_tpl: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept = Vec::new();
    let mut used = 0usize;
    for line in &lines {
        if used + line.len() + 1 > cap_chars {
            break;
        }
        used += line.len() + 1;
        kept.push(*line);
    }
    if kept.len() >= lines.len() {
        return content.to_string();
    }
    let omitted = lines.len() - kept.len();
    let notice = notice_tpl.replace("{lines}", &omitted.to_string());
    format!("{}\n{notice}", kept.join("\n"))
}

fn hard_cut(content: &str, cap_chars: usize) -> String {
    let cut = content
        .char_indices()
        .take_while(|(i, _)| *i < cap_chars)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    content[..cut].to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TruncationConfig {
        TruncationConfig {
            storage_bound_generic: 100,
            storage_bound_head_tail: 200,
            storage_bound_match_list: 150,
            storage_bound_file_content: 300,
            summarization_safety_net: 1000,
        }
    }

    #[test]
    fn short_content_passes_through_unchanged() {
        let out = truncate_for_storage("short", OutputCategory::Generic, &cfg());
        assert_eq!(out, "short");
    }

    #[test]
    fn generic_truncation_adds_notice() {
        let content = "x".repeat(500);
        let out = truncate_for_storage(&content, OutputCategory::Generic, &cfg());
        assert!(out.len() < content.len());
        assert!(out.contains("bytes omitted"));
    }

    #[test]
    fn head_tail_keeps_both_ends() {
        let lines: Vec<String> = (0..200).map(|i| format!("line {i}")).collect();
        let content = lines.join("\n");
        let out = truncate_for_storage(&content, OutputCategory::HeadTail, &cfg());
        assert!(out.contains("line 0"));
        assert!(out.contains("line 199"));
        assert!(out.contains("omitted"));
    }

    #[test]
    fn match_list_keeps_only_head() {
        let lines: Vec<String> = (0..200).map(|i| format!("match {i}")).collect();
        let content = lines.join("\n");
        let out = truncate_for_storage(&content, OutputCategory::MatchList, &cfg());
        assert!(out.contains("match 0"));
        assert!(!out.contains("match 199"));
    }

    #[test]
    fn summarization_input_uses_larger_bound() {
        let content = "y".repeat(2000);
        let out = truncate_for_summarization_input(&content, &cfg());
        assert!(out.len() > cfg().storage_bound_generic);
    }
}
