//! Generation orchestrator: idea, code, screening, persistence, execution.
//!
//! One request runs as a single sequential pipeline. All per-request state
//! lives on the stack of [`Orchestrator::generate`], so one orchestrator can
//! serve concurrent requests.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::backends::{BackendKind, BackendRouter, BackendStatus};
use crate::core::extract::extract_code;
use crate::core::goal::normalize_goal;
use crate::core::safety::validate_text;
use crate::core::sanitize::screen;
use crate::core::types::{Cancelled, ExecutionOutcome, GenerationRequest, GenerationResult};
use crate::io::artifact::ArtifactStore;
use crate::io::config::{GeneratorConfig, SamplingConfig};
use crate::io::interpreter::{Interpreter, SwiplRunner};
use crate::io::prompt::PromptEngine;
use crate::repair::{RepairContext, cancellable, run_with_repairs};

/// Pipeline knobs taken from [`GeneratorConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub sampling: SamplingConfig,
    pub max_fix_retries: u32,
    pub default_goal: Option<String>,
}

impl PipelineSettings {
    pub fn from_config(cfg: &GeneratorConfig) -> Self {
        Self {
            sampling: cfg.sampling.clone(),
            max_fix_retries: cfg.max_fix_retries,
            default_goal: cfg.default_goal.clone(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&GeneratorConfig::default())
    }
}

/// Interpreter availability and backend readiness.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub interpreter: String,
    pub interpreter_available: bool,
    pub default_backend: BackendKind,
    pub backends: Vec<BackendStatus>,
}

impl HealthReport {
    /// Healthy when the interpreter answers and the default backend is ready.
    pub fn is_healthy(&self) -> bool {
        self.interpreter_available
            && self
                .backends
                .iter()
                .any(|status| status.kind == self.default_backend && status.ready)
    }
}

pub struct Orchestrator {
    router: BackendRouter,
    interpreter: Arc<dyn Interpreter>,
    prompts: PromptEngine,
    store: ArtifactStore,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        router: BackendRouter,
        interpreter: Arc<dyn Interpreter>,
        prompts: PromptEngine,
        store: ArtifactStore,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            router,
            interpreter,
            prompts,
            store,
            settings,
        }
    }

    /// Wire HTTP backends, the SWI-Prolog runner, templates and the artifact
    /// directory from config.
    pub async fn from_config(cfg: &GeneratorConfig) -> Result<Self> {
        let router = BackendRouter::from_config(cfg).context("configure backends")?;
        let prompts =
            PromptEngine::load(cfg.templates_dir.as_deref()).context("load prompt templates")?;
        let interpreter = SwiplRunner::locate(&cfg.interpreter).await;
        Ok(Self::new(
            router,
            Arc::new(interpreter),
            prompts,
            ArtifactStore::new(cfg.resolved_output_dir()),
            PipelineSettings::from_config(cfg),
        ))
    }

    /// Probe the interpreter and every configured backend.
    pub async fn health(&self) -> HealthReport {
        HealthReport {
            interpreter: self.interpreter.name(),
            interpreter_available: self.interpreter.check_available().await,
            default_backend: self.router.default_kind(),
            backends: self.router.readiness().await,
        }
    }

    /// Run one request end to end.
    ///
    /// Every failure other than cancellation is reported inside the result
    /// (`success = false`, `error` set) with whatever was produced so far.
    /// Cancellation aborts and returns [`Cancelled`] instead of a result.
    #[instrument(skip_all, fields(
        provider = request.provider.as_deref().unwrap_or(""),
        execute = request.execute,
    ))]
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, Cancelled> {
        let started = Instant::now();
        let mut result = GenerationResult::default();

        match self.run_pipeline(request, cancel, &mut result).await {
            Ok(()) => result.success = true,
            Err(err) if err.downcast_ref::<Cancelled>().is_some() => {
                info!("generation cancelled");
                return Err(Cancelled);
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(err = %message, "generation failed");
                result.success = false;
                result.error = Some(message);
            }
        }

        result.total_duration = started.elapsed();
        info!(
            success = result.success,
            backend = %result.backend,
            fix_attempts = result.fix_attempts,
            total_ms = result.total_duration.as_millis() as u64,
            "generation finished"
        );
        Ok(result)
    }

    async fn run_pipeline(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        result: &mut GenerationResult,
    ) -> Result<()> {
        let backend = self.router.resolve(request.provider.as_deref())?;
        result.backend = backend.id();
        let sampling = &self.settings.sampling;

        let phase = Instant::now();
        let messages = self
            .prompts
            .idea_messages(request.theme.as_deref(), request.description.as_deref())?;
        let idea = cancellable(cancel, backend.chat(&messages, &sampling.idea))
            .await
            .context("idea completion")?;
        result.idea = idea.text.trim().to_string();
        result.timings.idea = phase.elapsed();

        let phase = Instant::now();
        let messages = self.prompts.code_messages(&result.idea)?;
        let completion = cancellable(cancel, backend.chat(&messages, &sampling.code))
            .await
            .context("code completion")?;
        let screened = screen(extract_code(&completion.text));
        result.timings.code = phase.elapsed();
        if screened.source.is_empty() {
            return Err(anyhow!("backend returned no code"));
        }
        if screened.neutralized > 0 {
            warn!(
                lines = screened.neutralized,
                findings = %screened.verdict.summary(),
                "neutralized unsafe lines in generated source"
            );
        }
        result.code = screened.source;

        let path = self
            .store
            .persist(&result.code)
            .await
            .context("persist generated source")?;
        info!(path = %path.display(), "persisted generated source");
        result.file_path = Some(path.clone());

        if !request.execute {
            return Ok(());
        }

        let phase = Instant::now();
        let goal = request
            .goal
            .as_deref()
            .and_then(normalize_goal)
            .or_else(|| self.settings.default_goal.as_deref().and_then(normalize_goal));

        if let Some(goal) = goal.as_deref() {
            let verdict = validate_text("goal", goal);
            if verdict.is_unsafe() {
                warn!(findings = %verdict.summary(), "refusing to run unsafe goal");
                result.record_execution(&ExecutionOutcome::failure(format!(
                    "unsafe goal not executed: {}",
                    verdict.summary()
                )));
                result.timings.execution = Some(phase.elapsed());
                return Ok(());
            }
        }

        let ctx = RepairContext {
            backend: backend.as_ref(),
            interpreter: self.interpreter.as_ref(),
            prompts: &self.prompts,
            store: &self.store,
            options: &sampling.fix,
            max_fix_retries: self.settings.max_fix_retries,
        };
        let repaired = run_with_repairs(&ctx, result.code.clone(), path, goal.as_deref(), cancel)
            .await?;

        result.code = repaired.source;
        result.file_path = Some(repaired.path);
        result.fix_attempts = repaired.attempts;
        result.record_execution(&repaired.last);
        result.timings.execution = Some(phase.elapsed());
        Ok(())
    }
}
