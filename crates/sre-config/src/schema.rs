// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    50
}

fn default_iteration_timeout_secs() -> u64 {
    120
}

fn default_summarization_threshold_tokens() -> usize {
    5000
}

fn default_storage_bound_generic() -> usize {
    8_000
}

fn default_storage_bound_head_tail() -> usize {
    12_000
}

fn default_storage_bound_match_list() -> usize {
    10_000
}

fn default_storage_bound_file_content() -> usize {
    16_000
}

fn default_summarization_safety_net() -> usize {
    60_000
}

fn default_scoring_max_retries() -> u32 {
    5
}

fn default_consecutive_timeout_threshold() -> u32 {
    2
}

fn default_loop_window_chars() -> usize {
    6_000
}

fn default_loop_min_pattern_len() -> usize {
    30
}

fn default_loop_max_pattern_len() -> usize {
    500
}

fn default_loop_min_repeats() -> usize {
    5
}

fn default_loop_check_interval_chars() -> usize {
    2_000
}

/// Top-level runtime configuration for the iteration controller core.
///
/// Loaded by [`crate::load`] by merging layered YAML/TOML files; every field
/// carries a typed default so a missing file (or a partial one) still
/// produces a usable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub iteration: IterationConfig,
    #[serde(default)]
    pub summarization: SummarizationConfig,
    #[serde(default)]
    pub truncation: TruncationConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub loop_detection: LoopDetectionConfig,
}

/// Identifies and parameterizes the model provider the controller's
/// `ModelClient` is built from.  The provider implementation itself is an
/// external collaborator — this struct only carries the dial-string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier, e.g. "anthropic", "openai", "mock".
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Base URL override, for local proxies or self-hosted gateways.
    pub base_url: Option<String>,
    /// Maximum tokens requested in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0-2.0).
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            name: "mock-model".to_string(),
            api_key_env: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Bounds governing the bounded multi-turn loop (§3 `IterationState`, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationConfig {
    /// Maximum number of turns before `forceConclusion` is invoked.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Per-turn deadline applied to the model call (and any tool executions
    /// started within that turn — the child deadline governs both).
    #[serde(default = "default_iteration_timeout_secs")]
    pub iteration_timeout_secs: u64,
    /// Number of consecutive timeout failures that aborts a run (§4.8).
    #[serde(default = "default_consecutive_timeout_threshold")]
    pub consecutive_timeout_threshold: u32,
}

impl IterationConfig {
    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_secs(self.iteration_timeout_secs)
    }
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            iteration_timeout_secs: default_iteration_timeout_secs(),
            consecutive_timeout_threshold: default_consecutive_timeout_threshold(),
        }
    }
}

/// Tuning for the tail-window substring-repetition loop detector (§4.6).
/// Exposed as configuration rather than hard-coded constants so operators
/// can tune detector sensitivity per model family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDetectionConfig {
    #[serde(default = "default_loop_window_chars")]
    pub window_chars: usize,
    #[serde(default = "default_loop_min_pattern_len")]
    pub min_pattern_len: usize,
    #[serde(default = "default_loop_max_pattern_len")]
    pub max_pattern_len: usize,
    #[serde(default = "default_loop_min_repeats")]
    pub min_repeats: usize,
    #[serde(default = "default_loop_check_interval_chars")]
    pub check_interval_chars: usize,
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            window_chars: default_loop_window_chars(),
            min_pattern_len: default_loop_min_pattern_len(),
            max_pattern_len: default_loop_max_pattern_len(),
            min_repeats: default_loop_min_repeats(),
            check_interval_chars: default_loop_check_interval_chars(),
        }
    }
}

/// Controls the tool-result summarization fan-out (§4.5 step 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    /// Whether a tool-serving endpoint may request summarization of its own
    /// oversized results.  Per-endpoint opt-out overrides this default.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tool-result size (chars ÷ 4 heuristic) above which summarization is
    /// triggered.
    #[serde(default = "default_summarization_threshold_tokens")]
    pub threshold_tokens: usize,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            threshold_tokens: default_summarization_threshold_tokens(),
        }
    }
}

/// Content-truncation boundary (§6).  Tool results are truncated to a
/// storage bound before DB write; summarization input uses a larger
/// safety-net bound.  The core never inlines these sizes — it always reads
/// them from here, keyed by the tool's declared output shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationConfig {
    #[serde(default = "default_storage_bound_generic")]
    pub storage_bound_generic: usize,
    #[serde(default = "default_storage_bound_head_tail")]
    pub storage_bound_head_tail: usize,
    #[serde(default = "default_storage_bound_match_list")]
    pub storage_bound_match_list: usize,
    #[serde(default = "default_storage_bound_file_content")]
    pub storage_bound_file_content: usize,
    /// Safety-net bound applied to the text handed to the summarization
    /// sub-call — larger than any storage bound since the model, not the
    /// store, consumes it.
    #[serde(default = "default_summarization_safety_net")]
    pub summarization_safety_net: usize,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            storage_bound_generic: default_storage_bound_generic(),
            storage_bound_head_tail: default_storage_bound_head_tail(),
            storage_bound_match_list: default_storage_bound_match_list(),
            storage_bound_file_content: default_storage_bound_file_content(),
            summarization_safety_net: default_summarization_safety_net(),
        }
    }
}

/// Controls the scoring controller's retry-until-parseable-score loop (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_scoring_max_retries")]
    pub max_retries: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_retries: default_scoring_max_retries(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_iteration_bounds() {
        let cfg = Config::default();
        assert_eq!(cfg.iteration.max_iterations, 50);
        assert_eq!(cfg.iteration.iteration_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn default_summarization_threshold_matches_spec() {
        assert_eq!(SummarizationConfig::default().threshold_tokens, 5000);
    }

    #[test]
    fn default_scoring_retries_matches_spec() {
        assert_eq!(ScoringConfig::default().max_retries, 5);
    }

    #[test]
    fn default_consecutive_timeout_threshold_is_two() {
        assert_eq!(Config::default().iteration.consecutive_timeout_threshold, 2);
    }

    #[test]
    fn default_loop_detection_matches_spec_bounds() {
        let cfg = LoopDetectionConfig::default();
        assert_eq!(cfg.window_chars, 6000);
        assert_eq!(cfg.min_pattern_len, 30);
        assert_eq!(cfg.max_pattern_len, 500);
        assert_eq!(cfg.min_repeats, 5);
        assert_eq!(cfg.check_interval_chars, 2000);
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.iteration.max_iterations, cfg.iteration.max_iterations);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let yaml = "model:\n  provider: anthropic\n  name: claude\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.model.provider, "anthropic");
        assert_eq!(cfg.iteration.max_iterations, 50);
    }
}
