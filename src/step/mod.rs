//! Pipeline step contract.
//!
//! A provisioning pipeline runs steps in order. Each step gets a context with
//! the collaborators it needs and answers with a [`StepAction`]: keep going or
//! halt the pipeline. Every step also gets a `cleanup` call, whatever the
//! outcome.

mod shutdown;

pub use shutdown::{ShutdownContext, ShutdownStep, POLL_INTERVAL};

use crate::error::ShutdownError;
use async_trait::async_trait;

/// Outcome of running a step.
#[derive(Debug)]
pub enum StepAction {
    /// The step succeeded; the pipeline proceeds.
    Continue,
    /// The step failed; the pipeline stops.
    Halt(ShutdownError),
}

impl StepAction {
    /// Check if the pipeline should proceed.
    pub fn is_continue(&self) -> bool {
        matches!(self, StepAction::Continue)
    }

    /// The failure, if the step halted.
    pub fn error(&self) -> Option<&ShutdownError> {
        match self {
            StepAction::Continue => None,
            StepAction::Halt(err) => Some(err),
        }
    }

    /// Convert into a `Result`, for callers that want `?`.
    pub fn into_result(self) -> Result<(), ShutdownError> {
        match self {
            StepAction::Continue => Ok(()),
            StepAction::Halt(err) => Err(err),
        }
    }
}

/// A single step of a provisioning pipeline.
#[async_trait]
pub trait Step<Ctx: Sync>: Send + Sync {
    /// Human-readable step name for logging.
    fn name(&self) -> &str;

    /// Execute the step.
    async fn run(&self, ctx: &Ctx) -> StepAction;

    /// Release anything the step acquired. Called regardless of outcome.
    async fn cleanup(&self, _ctx: &Ctx) {}
}
