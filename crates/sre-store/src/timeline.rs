// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a [`TimelineEvent`] (§3).
///
/// A streaming event is created empty and must reach a terminal status —
/// `Completed` or `Failed` — before a run returns; it must never be left at
/// `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Streaming,
    Completed,
    Failed,
}

/// A durable timeline record (§3).
///
/// `sequence_number` increments monotonically per execution; gaps are
/// permitted — a create failure burns a sequence number rather than
/// retrying, so the number is never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub sequence_number: u64,
    pub event_type: String,
    pub status: EventStatus,
    pub content: String,
    pub metadata: Value,
}

impl TimelineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, EventStatus::Completed | EventStatus::Failed)
    }
}
