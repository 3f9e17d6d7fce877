// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod common;
pub mod iterating;
pub mod react;
pub mod scoring;
pub mod single_shot;

pub use single_shot::SingleShotController;

use crate::context::ExecutionContext;
use crate::result::ExecutionResult;

/// The four controller variants (§4), collected behind one small sum type
/// rather than a trait-object inheritance tree (Design Notes "Non-OO
/// polymorphism") — each variant's `run` has its own signature internally,
/// but callers that just want to kick off a stage don't need to know which
/// one they're holding.
pub enum Controller {
    /// §4.1: native tool-call loop.
    Iterating,
    /// §4.2: text-format tool-call loop, parsed with [`crate::react_parser`].
    React,
    /// §4.3: one model call, no tools.
    SingleShot(SingleShotController),
    /// §4.4: score extraction followed by a missing-tools report.
    Scoring,
}

impl Controller {
    /// Runs the controller. `input` is the previous pipeline stage's context
    /// for the iterating/ReAct variants, or the raw input text for the
    /// single-shot/scoring variants.
    pub async fn run(&self, ctx: &ExecutionContext, input: &str) -> ExecutionResult {
        match self {
            Controller::Iterating => iterating::run(ctx, input).await,
            Controller::React => react::run(ctx, input).await,
            Controller::SingleShot(controller) => controller.run(ctx, input).await,
            Controller::Scoring => scoring::run(ctx, input).await,
        }
    }
}
