// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod mock;
mod provider;
mod types;

pub use mock::{MockModelClient, ScriptedMockClient};
pub use provider::{ChunkStream, ModelClient};
pub use types::*;
