// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Error taxonomy the controllers branch on (§7, §4.8).
///
/// `is_timeout` is defined EXCLUSIVELY by whether an error wraps one of
/// these two sentinels — never by matching on error message text, since
/// full error chains are propagated and surface text is unstable.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The per-turn deadline elapsed before the model (or a tool it
    /// triggered) returned.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The caller's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

/// `true` iff `err`'s chain contains [`ControllerError::DeadlineExceeded`]
/// or a raw [`tokio::time::error::Elapsed`] (the type `tokio::time::timeout`
/// returns directly, before a caller wraps it).
pub fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ControllerError>()
            .map(|e| matches!(e, ControllerError::DeadlineExceeded))
            .unwrap_or(false)
            || cause.downcast_ref::<tokio::time::error::Elapsed>().is_some()
    })
}

/// `true` iff `err`'s chain contains [`ControllerError::Cancelled`].
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ControllerError>()
            .map(|e| matches!(e, ControllerError::Cancelled))
            .unwrap_or(false)
    })
}

/// Mutable per-run tracker (§3 `IterationState`).
#[derive(Debug, Clone)]
pub struct IterationState {
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub consecutive_timeout_failures: u32,
    pub consecutive_timeout_threshold: u32,
    pub last_interaction_failed: bool,
    pub last_error_message: Option<String>,
}

impl IterationState {
    pub fn new(max_iterations: u32, consecutive_timeout_threshold: u32) -> Self {
        Self {
            current_iteration: 0,
            max_iterations,
            consecutive_timeout_failures: 0,
            consecutive_timeout_threshold,
            last_interaction_failed: false,
            last_error_message: None,
        }
    }

    /// §4.8: clears both the counter and the last-failure flag.
    pub fn record_success(&mut self) {
        self.consecutive_timeout_failures = 0;
        self.last_interaction_failed = false;
        self.last_error_message = None;
    }

    /// §4.8: increments the counter only when `is_timeout`; any
    /// non-timeout failure resets it to 0.  Always sets the last-failure
    /// flag and message.
    pub fn record_failure(&mut self, message: impl Into<String>, is_timeout: bool) {
        if is_timeout {
            self.consecutive_timeout_failures += 1;
        } else {
            self.consecutive_timeout_failures = 0;
        }
        self.last_interaction_failed = true;
        self.last_error_message = Some(message.into());
    }

    /// §4.1 step 1 / §8 invariant 3: true once the consecutive-timeout
    /// counter has reached the configured threshold.
    pub fn consecutive_timeout_exceeded(&self) -> bool {
        self.consecutive_timeout_failures >= self.consecutive_timeout_threshold
    }

    pub fn iterations_exhausted(&self) -> bool {
        self.current_iteration >= self.max_iterations
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_success_clears_counter_and_flag() {
        let mut st = IterationState::new(10, 2);
        st.record_failure("boom", true);
        st.record_success();
        assert_eq!(st.consecutive_timeout_failures, 0);
        assert!(!st.last_interaction_failed);
    }

    #[test]
    fn timeout_failure_increments_counter() {
        let mut st = IterationState::new(10, 2);
        st.record_failure("timeout", true);
        st.record_failure("timeout", true);
        assert_eq!(st.consecutive_timeout_failures, 2);
        assert!(st.consecutive_timeout_exceeded());
    }

    #[test]
    fn non_timeout_failure_resets_counter_but_sets_flag() {
        let mut st = IterationState::new(10, 2);
        st.record_failure("timeout", true);
        st.record_failure("tool error", false);
        assert_eq!(st.consecutive_timeout_failures, 0);
        assert!(st.last_interaction_failed);
    }

    #[test]
    fn is_timeout_detects_sentinel_through_context_wrap() {
        let base = anyhow::Error::new(ControllerError::DeadlineExceeded);
        let wrapped = base.context("while calling model");
        assert!(is_timeout(&wrapped));
    }

    #[test]
    fn is_timeout_false_for_unrelated_error() {
        let err = anyhow::anyhow!("tool exploded");
        assert!(!is_timeout(&err));
    }

    #[test]
    fn is_cancelled_detects_sentinel() {
        let err = anyhow::Error::new(ControllerError::Cancelled);
        assert!(is_cancelled(&err));
        assert!(!is_timeout(&err));
    }
}
