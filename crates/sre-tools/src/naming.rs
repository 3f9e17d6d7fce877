// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use regex::Regex;
use std::sync::OnceLock;

fn endpoint_tool_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9_-]+)\.([A-Za-z0-9_-]+)$").unwrap())
}

/// Split a raw model-emitted tool name into `(endpoint, tool)` (§4.5 step 1).
///
/// Names are expected to take the shape `endpoint.tool`, each part made of
/// letters, digits, underscore, or hyphen.  If the name does not match that
/// shape — no dot, more than one dot, or disallowed characters — splitting
/// fails: the endpoint is `None` and the raw name is used verbatim as the
/// tool name, so a malformed name never panics or silently drops the call.
pub fn canonicalize_tool_name(raw: &str) -> (Option<String>, String) {
    match endpoint_tool_re().captures(raw) {
        Some(caps) => (Some(caps[1].to_string()), caps[2].to_string()),
        None => (None, raw.to_string()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_endpoint_dot_tool() {
        let (ep, tool) = canonicalize_tool_name("kubernetes.get_pods");
        assert_eq!(ep.as_deref(), Some("kubernetes"));
        assert_eq!(tool, "get_pods");
    }

    #[test]
    fn allows_hyphen_and_underscore_in_each_part() {
        let (ep, tool) = canonicalize_tool_name("k8s-prod.get_pod-status");
        assert_eq!(ep.as_deref(), Some("k8s-prod"));
        assert_eq!(tool, "get_pod-status");
    }

    #[test]
    fn no_dot_falls_back_to_raw_name() {
        let (ep, tool) = canonicalize_tool_name("get_logs");
        assert_eq!(ep, None);
        assert_eq!(tool, "get_logs");
    }

    #[test]
    fn multiple_dots_falls_back_to_raw_name() {
        let (ep, tool) = canonicalize_tool_name("a.b.c");
        assert_eq!(ep, None);
        assert_eq!(tool, "a.b.c");
    }

    #[test]
    fn disallowed_characters_fall_back_to_raw_name() {
        let (ep, tool) = canonicalize_tool_name("k8s prod.get pods");
        assert_eq!(ep, None);
        assert_eq!(tool, "k8s prod.get pods");
    }

    #[test]
    fn empty_string_falls_back() {
        let (ep, tool) = canonicalize_tool_name("");
        assert_eq!(ep, None);
        assert_eq!(tool, "");
    }
}
