//! Bounded execute-and-repair loop.
//!
//! Runs the persisted program, and while it reports errors asks the backend
//! for a fix, up to `max_fix_retries` repair calls. Repaired source is
//! screened like a first generation and persisted under a fresh name; older
//! attempts stay on disk.

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backends::{ChatBackend, GenerationOptions};
use crate::core::extract::extract_code;
use crate::core::sanitize::screen;
use crate::core::types::{Cancelled, ExecutionOutcome};
use crate::io::artifact::ArtifactStore;
use crate::io::interpreter::Interpreter;
use crate::io::prompt::PromptEngine;

/// Reason why the repair loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStop {
    /// The last run succeeded, or reported no error text.
    Accepted,
    /// `max_fix_retries` repair calls were spent and the last run still failed.
    Exhausted,
    /// A repair returned the source unchanged.
    NoProgress,
}

/// Summary of one repair loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    /// Source of the last executed attempt.
    pub source: String,
    pub path: PathBuf,
    /// Repair calls made. Never exceeds `max_fix_retries`.
    pub attempts: u32,
    pub last: ExecutionOutcome,
    pub stop: RepairStop,
}

/// Collaborators borrowed by the loop for one request.
pub struct RepairContext<'a> {
    pub backend: &'a dyn ChatBackend,
    pub interpreter: &'a dyn Interpreter,
    pub prompts: &'a PromptEngine,
    pub store: &'a ArtifactStore,
    pub options: &'a GenerationOptions,
    pub max_fix_retries: u32,
}

/// Request-local loop state; dropped when the loop exits.
struct RetryState {
    source: String,
    path: PathBuf,
    attempts: u32,
}

impl RetryState {
    fn finish(self, last: ExecutionOutcome, stop: RepairStop) -> RepairOutcome {
        RepairOutcome {
            source: self.source,
            path: self.path,
            attempts: self.attempts,
            last,
            stop,
        }
    }
}

/// Execute `path` and repair it until it runs cleanly or the budget is spent.
///
/// Interpreter failures are reported in the outcome, never as errors.
/// Backend, template and persistence failures are errors; cancellation is an
/// error carrying [`Cancelled`].
#[instrument(skip_all, fields(max_fix_retries = ctx.max_fix_retries, path = %path.display()))]
pub async fn run_with_repairs(
    ctx: &RepairContext<'_>,
    source: String,
    path: PathBuf,
    goal: Option<&str>,
    cancel: &CancellationToken,
) -> Result<RepairOutcome> {
    let mut state = RetryState {
        source,
        path,
        attempts: 0,
    };

    loop {
        let outcome = ctx.interpreter.run_file(&state.path, goal, cancel).await?;
        debug!(
            attempt = state.attempts,
            success = outcome.success,
            exit_code = outcome.exit_code,
            "execution finished"
        );

        if outcome.success || outcome.error.is_empty() {
            return Ok(state.finish(outcome, RepairStop::Accepted));
        }
        if state.attempts >= ctx.max_fix_retries {
            warn!(attempts = state.attempts, "repair budget exhausted");
            return Ok(state.finish(outcome, RepairStop::Exhausted));
        }

        let messages = ctx.prompts.fix_messages(&state.source, goal, &outcome.error)?;
        let completion = cancellable(cancel, ctx.backend.chat(&messages, ctx.options))
            .await
            .context("repair completion")?;
        state.attempts += 1;

        let screened = screen(extract_code(&completion.text));
        if screened.neutralized > 0 {
            warn!(
                attempt = state.attempts,
                lines = screened.neutralized,
                findings = %screened.verdict.summary(),
                "neutralized unsafe lines in repaired source"
            );
        }
        if screened.source == state.source {
            warn!(attempt = state.attempts, "repair made no progress");
            return Ok(state.finish(outcome, RepairStop::NoProgress));
        }

        state.path = ctx
            .store
            .persist(&screened.source)
            .await
            .context("persist repaired source")?;
        state.source = screened.source;
        info!(attempt = state.attempts, path = %state.path.display(), "persisted repair");
    }
}

/// Race `fut` against `cancel`; cancellation wins ties.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(anyhow::Error::new(Cancelled)),
        result = fut => result,
    }
}
