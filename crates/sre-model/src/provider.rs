// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{Chunk, CompletionRequest};

/// A stream of [`Chunk`]s produced by one [`ModelClient::generate`] call.
///
/// Closes on normal completion; emits at most one terminal `Chunk::Error`
/// before closing (§6).  Implementations must respect the cancellation of
/// whatever future drives this stream — the controller's streaming wrapper
/// owns a child deadline and drops the stream to signal "stop producing".
pub type ChunkStream = Pin<Box<dyn Stream<Item = Chunk> + Send>>;

/// The abstract model-provider interface the controller core consumes.
///
/// Concrete provider wiring (HTTP clients, auth, wire-format translation) is
/// an external collaborator — this trait is the only seam the core depends
/// on, so it can be driven by a live provider in production or by
/// [`crate::ScriptedMockClient`] in tests.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Human-readable identifier for logging/diagnostics.
    fn name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn generate(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream>;
}
