// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;
use sre_model::ConversationMessage;

use crate::publisher::EventPublisher;
use crate::store::{LlmInteraction, McpInteraction, PersistenceStore};
use crate::timeline::{EventStatus, TimelineEvent};

/// Reference [`PersistenceStore`] implementation backed by in-process
/// vectors, used by the demo binary and by every controller test in
/// `sre-core`. One instance is scoped to a single execution — sequence
/// numbers start at 1 and increase monotonically for the instance's
/// lifetime.
#[derive(Default)]
pub struct InMemoryStore {
    next_seq: AtomicU64,
    messages: Mutex<Vec<ConversationMessage>>,
    events: Mutex<Vec<TimelineEvent>>,
    llm_interactions: Mutex<Vec<LlmInteraction>>,
    mcp_interactions: Mutex<Vec<McpInteraction>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            ..Default::default()
        }
    }

    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn llm_interactions(&self) -> Vec<LlmInteraction> {
        self.llm_interactions.lock().unwrap().clone()
    }

    pub fn mcp_interactions(&self) -> Vec<McpInteraction> {
        self.mcp_interactions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn append_message(&self, message: &ConversationMessage) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn create_timeline_event(
        &self,
        event_type: &str,
        status: EventStatus,
        content: String,
        metadata: Value,
    ) -> anyhow::Result<TimelineEvent> {
        let sequence_number = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let event = TimelineEvent {
            sequence_number,
            event_type: event_type.to_string(),
            status,
            content,
            metadata,
        };
        self.events.lock().unwrap().push(event.clone());
        Ok(event)
    }

    async fn complete_timeline_event(
        &self,
        sequence_number: u64,
        status: EventStatus,
        content: String,
        metadata: Value,
    ) -> anyhow::Result<()> {
        let mut events = self.events.lock().unwrap();
        match events.iter_mut().find(|e| e.sequence_number == sequence_number) {
            Some(event) => {
                event.status = status;
                event.content = content;
                event.metadata = metadata;
                Ok(())
            }
            None => bail!("no timeline event with sequence_number {sequence_number}"),
        }
    }

    async fn record_llm_interaction(&self, interaction: LlmInteraction) -> anyhow::Result<()> {
        self.llm_interactions.lock().unwrap().push(interaction);
        Ok(())
    }

    async fn record_mcp_interaction(&self, interaction: McpInteraction) -> anyhow::Result<()> {
        self.mcp_interactions.lock().unwrap().push(interaction);
        Ok(())
    }

    async fn list_timeline_events(&self) -> anyhow::Result<Vec<TimelineEvent>> {
        Ok(self.events.lock().unwrap().clone())
    }
}

/// Reference [`EventPublisher`] implementation: records every publish call
/// so tests can assert per-event-id FIFO and payload-size claims without a
/// real transport.
#[derive(Default)]
pub struct InMemoryPublisher {
    log: Mutex<Vec<String>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish_timeline_created(&self, event: &TimelineEvent) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("created:{}", event.sequence_number));
        Ok(())
    }

    async fn publish_timeline_completed(&self, event: &TimelineEvent) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("completed:{}", event.sequence_number));
        Ok(())
    }

    async fn publish_stream_chunk(&self, sequence_number: u64, delta: &str) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("chunk:{sequence_number}:{}", delta.len()));
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn sequence_numbers_are_strictly_increasing() {
        let store = InMemoryStore::new();
        let e1 = store
            .create_timeline_event("tool_call", EventStatus::Streaming, String::new(), json!({}))
            .await
            .unwrap();
        let e2 = store
            .create_timeline_event("tool_call", EventStatus::Streaming, String::new(), json!({}))
            .await
            .unwrap();
        assert!(e1.sequence_number < e2.sequence_number);
    }

    #[tokio::test]
    async fn complete_timeline_event_updates_status() {
        let store = InMemoryStore::new();
        let e1 = store
            .create_timeline_event("tool_call", EventStatus::Streaming, String::new(), json!({}))
            .await
            .unwrap();
        store
            .complete_timeline_event(e1.sequence_number, EventStatus::Completed, "done".into(), json!({}))
            .await
            .unwrap();
        let events = store.list_timeline_events().await.unwrap();
        let found = events.iter().find(|e| e.sequence_number == e1.sequence_number).unwrap();
        assert!(found.is_terminal());
        assert_eq!(found.content, "done");
    }

    #[tokio::test]
    async fn complete_unknown_sequence_number_errors() {
        let store = InMemoryStore::new();
        let result = store
            .complete_timeline_event(999, EventStatus::Completed, "x".into(), json!({}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn append_message_preserves_order() {
        let store = InMemoryStore::new();
        store.append_message(&ConversationMessage::user("first")).await.unwrap();
        store.append_message(&ConversationMessage::assistant("second")).await.unwrap();
        let msgs = store.messages();
        assert_eq!(msgs[0].content, "first");
        assert_eq!(msgs[1].content, "second");
    }

    #[tokio::test]
    async fn publisher_records_fifo_per_event() {
        let publisher = InMemoryPublisher::new();
        let event = TimelineEvent {
            sequence_number: 1,
            event_type: "tool_call".into(),
            status: EventStatus::Streaming,
            content: String::new(),
            metadata: json!({}),
        };
        publisher.publish_timeline_created(&event).await.unwrap();
        publisher.publish_timeline_completed(&event).await.unwrap();
        assert_eq!(publisher.log(), vec!["created:1".to_string(), "completed:1".to_string()]);
    }
}
