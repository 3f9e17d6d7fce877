// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::timeline::TimelineEvent;

/// Optional live event bus (§6). May be absent — the core then degrades to
/// collect-and-persist with no live streaming.
///
/// Ordering guarantee: for a given event id, `publish_timeline_completed`
/// is never delivered before the matching `publish_timeline_created`
/// (per-event-id FIFO); no cross-event ordering is promised.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_timeline_created(&self, event: &TimelineEvent) -> anyhow::Result<()>;

    async fn publish_timeline_completed(&self, event: &TimelineEvent) -> anyhow::Result<()>;

    /// A small delta payload for an in-progress streaming event — clients
    /// concatenate locally, so individual payloads stay well under 8 KB.
    async fn publish_stream_chunk(&self, sequence_number: u64, delta: &str) -> anyhow::Result<()>;
}
