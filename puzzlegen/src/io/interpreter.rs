//! Interpreter abstraction and the SWI-Prolog runner.
//!
//! The [`Interpreter`] trait decouples the repair loop from the external
//! interpreter process. Tests use scripted interpreters that return
//! predetermined outcomes without spawning processes.
//!
//! Process-level failures (missing file, spawn error, timeout) are folded
//! into an [`ExecutionOutcome`] with exit code -1. Only cancellation escapes
//! as an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::diagnostics::classify_stderr;
use crate::core::goal::{file_args, query_args};
use crate::core::types::{Cancelled, ExecutionOutcome};
use crate::io::config::InterpreterConfig;
use crate::io::process::{CommandOutput, run_command};

/// Binary name looked up on `PATH`.
pub const SWIPL: &str = "swipl";

/// Substring a genuine SWI-Prolog prints for `--version`.
const PRODUCT_ID: &str = "SWI-Prolog";

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const VERSION_PROBE_LIMIT: usize = 4096;

/// Install locations checked when `swipl` is not on `PATH`.
const WELL_KNOWN_PATHS: &[&str] = &[
    "/usr/bin/swipl",
    "/usr/local/bin/swipl",
    "/opt/homebrew/bin/swipl",
    "/opt/local/bin/swipl",
    "/Applications/SWI-Prolog.app/Contents/MacOS/swipl",
    r"C:\Program Files\swipl\bin\swipl.exe",
    r"C:\Program Files (x86)\swipl\bin\swipl.exe",
];

/// Abstraction over logic-language interpreters.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Load `path` and run `goal` (or only load it when `goal` is `None`).
    async fn run_file(
        &self,
        path: &Path,
        goal: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, Cancelled>;

    /// Run a goal with no program loaded.
    async fn run_query(
        &self,
        goal: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, Cancelled>;

    /// Best-effort probe that the interpreter is reachable. Never fails.
    async fn check_available(&self) -> bool;

    /// Human-readable label for reports, e.g. the binary path.
    fn name(&self) -> String;
}

/// Interpreter backed by a `swipl` subprocess.
#[derive(Debug, Clone)]
pub struct SwiplRunner {
    binary: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl SwiplRunner {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            output_limit_bytes,
        }
    }

    /// Build a runner from config, discovering the binary unless one is set.
    pub async fn locate(cfg: &InterpreterConfig) -> Self {
        let binary = match &cfg.path {
            Some(path) => path.clone(),
            None => discover_binary().await,
        };
        info!(binary = %binary.display(), "using interpreter");
        Self::new(
            binary,
            Duration::from_secs(cfg.timeout_secs),
            cfg.output_limit_bytes,
        )
    }

    async fn run(
        &self,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, Cancelled> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args);
        match run_command(cmd, self.timeout, self.output_limit_bytes, cancel).await {
            Ok(output) => Ok(self.outcome_from(output)),
            Err(err) if err.downcast_ref::<Cancelled>().is_some() => Err(Cancelled),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "interpreter did not run");
                Ok(ExecutionOutcome::failure(format!("{err:#}")))
            }
        }
    }

    fn outcome_from(&self, output: CommandOutput) -> ExecutionOutcome {
        let diagnostics = classify_stderr(&output.stderr_lossy());
        let mut stdout = output.stdout_lossy();
        stdout.push_str(&output.truncated_notice("interpreter"));

        if output.timed_out {
            return ExecutionOutcome::from_parts(
                -1,
                stdout,
                format!("timed out after {}s", self.timeout.as_secs()),
                diagnostics.warnings,
            );
        }

        let outcome = ExecutionOutcome::from_parts(
            output.exit_code(),
            stdout,
            diagnostics.errors,
            diagnostics.warnings,
        );
        debug!(
            exit_code = outcome.exit_code,
            success = outcome.success,
            has_warnings = !outcome.warnings.is_empty(),
            "interpreter finished"
        );
        outcome
    }
}

#[async_trait]
impl Interpreter for SwiplRunner {
    #[instrument(skip_all, fields(path = %path.display(), goal = goal.unwrap_or("")))]
    async fn run_file(
        &self,
        path: &Path,
        goal: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, Cancelled> {
        if !path.is_file() {
            warn!("program file missing");
            return Ok(ExecutionOutcome::failure(format!(
                "file not found: {}",
                path.display()
            )));
        }
        self.run(file_args(path, goal), cancel).await
    }

    #[instrument(skip_all, fields(goal = %goal))]
    async fn run_query(
        &self,
        goal: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, Cancelled> {
        self.run(query_args(goal), cancel).await
    }

    async fn check_available(&self) -> bool {
        probe_version(&self.binary).await
    }

    fn name(&self) -> String {
        self.binary.display().to_string()
    }
}

/// `PATH` lookup first (must identify itself), then fixed install locations
/// (must exist). Falls back to the bare name so a later run fails with a
/// useful spawn error instead of here.
async fn discover_binary() -> PathBuf {
    if probe_version(Path::new(SWIPL)).await {
        return PathBuf::from(SWIPL);
    }
    for candidate in WELL_KNOWN_PATHS {
        let path = Path::new(candidate);
        if path.is_file() {
            return path.to_path_buf();
        }
    }
    warn!("no SWI-Prolog installation found, falling back to PATH lookup");
    PathBuf::from(SWIPL)
}

async fn probe_version(binary: &Path) -> bool {
    let mut cmd = Command::new(binary);
    cmd.arg("--version");
    match run_command(
        cmd,
        VERSION_PROBE_TIMEOUT,
        VERSION_PROBE_LIMIT,
        &CancellationToken::new(),
    )
    .await
    {
        Ok(output) => {
            let identified = !output.timed_out
                && (output.stdout_lossy().contains(PRODUCT_ID)
                    || output.stderr_lossy().contains(PRODUCT_ID));
            debug!(binary = %binary.display(), identified, "version probe");
            identified
        }
        Err(err) => {
            debug!(binary = %binary.display(), err = %err, "version probe failed");
            false
        }
    }
}
