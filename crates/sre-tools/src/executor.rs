// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::tool::{OutputCategory, ToolCall, ToolResult};

/// One tool a remote endpoint advertises (§6 `ToolExecutor.ListTools`).
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Bare tool name — without the `endpoint.` prefix; the prefix is added
    /// by the endpoint grouping in [`ToolCatalogue`].
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub output_category: OutputCategory,
}

/// The abstract tool-transport interface the controller core consumes (§6).
///
/// Concrete transports (an MCP bridge, a local process, a webhook) are
/// external collaborators; the core only ever calls these two operations
/// with a per-turn deadline already attached to `ctx`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Stable identifier for this endpoint, used as the `endpoint` half of
    /// `endpoint.tool` names and as the sort key for deterministic
    /// tool-list persistence (Design Notes: "Deterministic iteration").
    fn endpoint_id(&self) -> &str;

    /// Execute one call.  `deadline` is the remaining budget for the turn
    /// that triggered this call — a runaway tool counts against the turn
    /// budget by design (§5).
    async fn execute(&self, call: &ToolCall, deadline: Duration) -> anyhow::Result<ToolResult>;

    /// List the tools this endpoint serves.
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDefinition>>;
}

/// Aggregates the tool catalogues of every configured endpoint into one
/// flat, deterministically-ordered view the controller binds to the model.
pub struct ToolCatalogue {
    /// `(endpoint_id, tool_name) -> definition`, built once at construction.
    entries: HashMap<(String, String), ToolDefinition>,
    /// Sorted `(endpoint_id, tool_name)` pairs — endpoint id then tool name
    /// alphabetically, matching the persistence ordering the Design Notes
    /// require for per-endpoint tool-list records.
    order: Vec<(String, String)>,
}

impl ToolCatalogue {
    /// Build the catalogue by querying every executor's `list_tools`,
    /// sorted by endpoint id then tool name for deterministic iteration.
    pub async fn build(executors: &[std::sync::Arc<dyn ToolExecutor>]) -> anyhow::Result<Self> {
        let mut entries = HashMap::new();
        let mut order = Vec::new();
        let mut per_endpoint: Vec<(String, Vec<ToolDefinition>)> = Vec::new();
        for ex in executors {
            let tools = ex.list_tools().await?;
            per_endpoint.push((ex.endpoint_id().to_string(), tools));
        }
        per_endpoint.sort_by(|a, b| a.0.cmp(&b.0));
        for (endpoint, mut tools) in per_endpoint {
            tools.sort_by(|a, b| a.name.cmp(&b.name));
            for def in tools {
                let key = (endpoint.clone(), def.name.clone());
                order.push(key.clone());
                entries.insert(key, def);
            }
        }
        Ok(Self { entries, order })
    }

    /// Every endpoint id that contributed tools, in the deterministic order
    /// used for per-endpoint tool-list persistence.
    pub fn endpoint_ids(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for (endpoint, _) in &self.order {
            if !seen.contains(endpoint) {
                seen.push(endpoint.clone());
            }
        }
        seen
    }

    /// Tools served by a single endpoint, sorted by name.
    pub fn tools_for_endpoint(&self, endpoint: &str) -> Vec<&ToolDefinition> {
        self.order
            .iter()
            .filter(|(e, _)| e == endpoint)
            .filter_map(|key| self.entries.get(key))
            .collect()
    }

    /// `true` if `endpoint.tool` exists in the catalogue.  Used by the
    /// controllers to perform the final existence check against parsed
    /// ReAct actions and to distinguish "unknown tool" from a transport
    /// error.
    pub fn contains(&self, endpoint: &str, tool: &str) -> bool {
        self.entries.contains_key(&(endpoint.to_string(), tool.to_string()))
    }

    /// Fully-qualified `endpoint.tool` names in deterministic order — used
    /// to list "available tools" in ReAct unknown-tool observations (§4.2).
    pub fn qualified_names(&self) -> Vec<String> {
        self.order.iter().map(|(e, t)| format!("{e}.{t}")).collect()
    }

    /// Look up a definition by its fully-qualified key.
    pub fn get(&self, endpoint: &str, tool: &str) -> Option<&ToolDefinition> {
        self.entries.get(&(endpoint.to_string(), tool.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
