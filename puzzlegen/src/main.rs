//! `puzzlegen` command-line interface.
//!
//! Results go to stdout, diagnostics to stderr. Exit codes are listed in
//! [`puzzlegen::exit_codes`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use puzzlegen::core::safety::{SafetyVerdict, validate_text};
use puzzlegen::core::sanitize::sanitize;
use puzzlegen::core::types::{Cancelled, ExecutionOutcome, GenerationRequest, GenerationResult};
use puzzlegen::exit_codes;
use puzzlegen::generate::Orchestrator;
use puzzlegen::io::config::{DEFAULT_CONFIG_FILE, GeneratorConfig, load_config, write_config};
use puzzlegen::io::interpreter::{Interpreter, SwiplRunner};
use puzzlegen::logging;

#[derive(Parser)]
#[command(
    name = "puzzlegen",
    version,
    about = "Generate runnable Prolog logic puzzles with a language model"
)]
struct Cli {
    /// Config file (TOML). A missing file means built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a puzzle program, optionally running and repairing it.
    Generate {
        /// Short theme, e.g. "mystery".
        #[arg(long)]
        theme: Option<String>,
        /// Free-text description of the puzzle.
        #[arg(long)]
        description: Option<String>,
        /// Backend to use (ollama, lmstudio, openai, local). Unknown names use the default.
        #[arg(long)]
        provider: Option<String>,
        /// Run the generated program and repair it on failure.
        #[arg(long)]
        execute: bool,
        /// Goal to run (defaults to `default_goal` from config).
        #[arg(long)]
        goal: Option<String>,
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Load a Prolog file and run a goal (or only load it).
    Run {
        file: PathBuf,
        #[arg(long)]
        goal: Option<String>,
    },
    /// Run a goal with no program loaded.
    Query { goal: String },
    /// Report interpreter availability and backend readiness.
    Check,
    /// Report unsafe predicates in a Prolog file (exits 1 when any is blocking).
    Scan {
        file: PathBuf,
        /// Print the neutralized source instead; findings go to stderr.
        #[arg(long)]
        sanitize: bool,
    },
    /// Write the default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Generate {
            theme,
            description,
            provider,
            execute,
            goal,
            json,
        } => {
            let request = GenerationRequest {
                theme,
                description,
                provider,
                execute,
                goal,
            };
            cmd_generate(&cli.config, request, json).await
        }
        Command::Run { file, goal } => cmd_run(&cli.config, &file, goal.as_deref()).await,
        Command::Query { goal } => cmd_query(&cli.config, &goal).await,
        Command::Check => cmd_check(&cli.config).await,
        Command::Scan { file, sanitize } => cmd_scan(&file, sanitize),
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
    }
}

async fn cmd_generate(config: &Path, request: GenerationRequest, json: bool) -> Result<i32> {
    let errors = request.validate();
    if !errors.is_empty() {
        bail!("invalid request:\n- {}", errors.join("\n- "));
    }
    let cfg = load_config(config)?;
    let orchestrator = Orchestrator::from_config(&cfg).await?;

    let cancel = cancel_on_ctrl_c();
    let result = match orchestrator.generate(&request, &cancel).await {
        Ok(result) => result,
        Err(Cancelled) => {
            eprintln!("cancelled");
            return Ok(exit_codes::CANCELLED);
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("serialize result")?
        );
    } else {
        print_result(&result);
    }

    Ok(if !result.success {
        exit_codes::GENERATION_FAILED
    } else if result.execution_success == Some(false) {
        exit_codes::EXECUTION_FAILED
    } else {
        exit_codes::OK
    })
}

async fn cmd_run(config: &Path, file: &Path, goal: Option<&str>) -> Result<i32> {
    if let Some(goal) = goal {
        reject_unsafe_goal(goal)?;
    }
    let cfg = load_config(config)?;
    let runner = SwiplRunner::locate(&cfg.interpreter).await;
    let cancel = cancel_on_ctrl_c();
    match runner.run_file(file, goal, &cancel).await {
        Ok(outcome) => Ok(report_outcome(&outcome)),
        Err(Cancelled) => Ok(exit_codes::CANCELLED),
    }
}

async fn cmd_query(config: &Path, goal: &str) -> Result<i32> {
    reject_unsafe_goal(goal)?;
    let cfg = load_config(config)?;
    let runner = SwiplRunner::locate(&cfg.interpreter).await;
    let cancel = cancel_on_ctrl_c();
    match runner.run_query(goal, &cancel).await {
        Ok(outcome) => Ok(report_outcome(&outcome)),
        Err(Cancelled) => Ok(exit_codes::CANCELLED),
    }
}

async fn cmd_check(config: &Path) -> Result<i32> {
    let cfg = load_config(config)?;
    let report = Orchestrator::from_config(&cfg).await?.health().await;
    println!(
        "interpreter {}: {}",
        report.interpreter,
        if report.interpreter_available {
            "available"
        } else {
            "unavailable"
        }
    );
    for status in &report.backends {
        println!(
            "backend {} ({}): {}{}",
            status.kind,
            status.model,
            if status.ready { "ready" } else { "unreachable" },
            if status.kind == report.default_backend {
                " [default]"
            } else {
                ""
            }
        );
    }

    Ok(if report.is_healthy() {
        exit_codes::OK
    } else {
        exit_codes::EXECUTION_FAILED
    })
}

fn cmd_scan(file: &Path, sanitize_source: bool) -> Result<i32> {
    let source =
        fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let verdict = validate_text("code", &source);
    if sanitize_source {
        for line in finding_lines(&verdict) {
            eprintln!("{line}");
        }
        print!("{}", sanitize(&source));
        return Ok(exit_codes::OK);
    }

    for line in finding_lines(&verdict) {
        println!("{line}");
    }
    if verdict.findings.is_empty() {
        println!("no findings");
    }
    Ok(if verdict.is_unsafe() {
        exit_codes::INVALID
    } else {
        exit_codes::OK
    })
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &GeneratorConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn reject_unsafe_goal(goal: &str) -> Result<()> {
    let verdict = validate_text("goal", goal);
    if verdict.is_unsafe() {
        bail!("unsafe goal: {}", verdict.summary());
    }
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

fn finding_lines(verdict: &SafetyVerdict) -> Vec<String> {
    verdict
        .findings
        .iter()
        .map(|f| format!("{:?}\t{}: {}", f.severity, f.field, f.message))
        .collect()
}

fn report_outcome(outcome: &ExecutionOutcome) -> i32 {
    print_block(&outcome.output);
    if !outcome.warnings.is_empty() {
        eprintln!("{}", outcome.warnings);
    }
    if !outcome.error.is_empty() {
        eprintln!("{}", outcome.error);
    }
    if outcome.success {
        exit_codes::OK
    } else {
        exit_codes::EXECUTION_FAILED
    }
}

fn print_result(result: &GenerationResult) {
    if let Some(error) = &result.error {
        eprintln!("generation failed: {error}");
    }
    println!("backend: {}", result.backend);
    if let Some(path) = &result.file_path {
        println!("file: {}", path.display());
    }
    if !result.idea.is_empty() {
        println!("\n--- idea ---");
        print_block(&result.idea);
    }
    if !result.code.is_empty() {
        println!("\n--- code ---");
        print_block(&result.code);
    }
    if let Some(success) = result.execution_success {
        println!(
            "\n--- execution: {} after {} fix attempt(s) ---",
            if success { "succeeded" } else { "failed" },
            result.fix_attempts
        );
        if let Some(output) = &result.execution_output {
            print_block(output);
        }
        if let Some(warnings) = &result.execution_warnings {
            eprintln!("{warnings}");
        }
        if let Some(error) = &result.execution_error {
            eprintln!("{error}");
        }
    }
    println!("\ntotal: {} ms", result.total_duration.as_millis());
}

fn print_block(text: &str) {
    if text.is_empty() {
        return;
    }
    if text.ends_with('\n') {
        print!("{text}");
    } else {
        println!("{text}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_generate_flags() {
        let cli = Cli::parse_from([
            "puzzlegen",
            "generate",
            "--theme",
            "mystery",
            "--execute",
            "--provider",
            "lmstudio",
        ]);
        match cli.command {
            Command::Generate {
                theme,
                execute,
                provider,
                json,
                ..
            } => {
                assert_eq!(theme.as_deref(), Some("mystery"));
                assert!(execute);
                assert_eq!(provider.as_deref(), Some("lmstudio"));
                assert!(!json);
            }
            _ => panic!("expected generate"),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["puzzlegen", "check", "--config", "alt.toml"]);
        assert!(matches!(cli.command, Command::Check));
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["puzzlegen", "init-config", "--force"]);
        assert!(matches!(cli.command, Command::InitConfig { force: true }));
    }

    #[test]
    fn unsafe_goal_is_rejected() {
        let err = reject_unsafe_goal("shell('rm -rf /')").unwrap_err();
        assert!(err.to_string().contains("shell"));
        assert!(reject_unsafe_goal("solve(X), write(X)").is_ok());
    }
}
