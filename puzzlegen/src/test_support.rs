//! Test-only collaborators with scripted behavior.
//!
//! [`ScriptedBackend`] answers chat calls from a queue and records every
//! request; [`ScriptedInterpreter`] does the same for interpreter runs. Both
//! can be told to hang so cancellation paths can be exercised.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backends::{BackendKind, ChatBackend, ChatMessage, Completion, GenerationOptions};
use crate::core::types::{Cancelled, ExecutionOutcome};
use crate::io::interpreter::Interpreter;

/// One scripted chat response.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
    /// Never answers; only a cancelled caller gets past it.
    Hang,
}

pub fn reply(text: &str) -> ScriptedReply {
    ScriptedReply::Text(text.to_string())
}

/// Wrap `code` in a fenced `prolog` block the way models usually answer.
pub fn fenced(code: &str) -> ScriptedReply {
    ScriptedReply::Text(format!("Here is the program:\n\n```prolog\n{code}\n```\n"))
}

/// A recorded chat call.
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
}

/// Chat backend answering from a queue. An exhausted queue is an error.
pub struct ScriptedBackend {
    kind: BackendKind,
    model: Mutex<String>,
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<ChatCall>>,
    ready: bool,
}

impl ScriptedBackend {
    pub fn new(kind: BackendKind, replies: Vec<ScriptedReply>) -> Self {
        Self {
            kind,
            model: Mutex::new("scripted".to_string()),
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            ready: true,
        }
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model(&self) -> String {
        self.model.lock().expect("model lock").clone()
    }

    fn set_model(&self, model: &str) {
        *self.model.lock().expect("model lock") = model.to_string();
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        self.calls.lock().expect("calls lock").push(ChatCall {
            messages: messages.to_vec(),
            options: *options,
        });
        let next = self.replies.lock().expect("replies lock").pop_front();
        match next {
            Some(ScriptedReply::Text(text)) => Ok(Completion {
                tokens: text.split_whitespace().count() as u32,
                text,
                elapsed: Duration::from_millis(1),
            }),
            Some(ScriptedReply::Fail(message)) => Err(anyhow!(message)),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Err(anyhow!("scripted backend has no replies left")),
        }
    }

    async fn is_ready(&self) -> bool {
        self.ready
    }
}

/// A recorded interpreter run. `source` is the file content at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCall {
    pub path: PathBuf,
    pub goal: Option<String>,
    pub source: Option<String>,
}

/// One scripted interpreter response.
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Outcome(ExecutionOutcome),
    Hang,
}

/// Interpreter answering from a queue. An exhausted queue yields a failed outcome.
pub struct ScriptedInterpreter {
    outcomes: Mutex<VecDeque<ScriptedRun>>,
    calls: Mutex<Vec<RunCall>>,
    available: bool,
}

impl ScriptedInterpreter {
    pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self::scripted(outcomes.into_iter().map(ScriptedRun::Outcome).collect())
    }

    pub fn scripted(runs: Vec<ScriptedRun>) -> Self {
        Self {
            outcomes: Mutex::new(runs.into()),
            calls: Mutex::new(Vec::new()),
            available: true,
        }
    }

    /// Report the interpreter as missing from `check_available`.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn calls(&self) -> Vec<RunCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    async fn next(&self, cancel: &CancellationToken) -> Result<ExecutionOutcome, Cancelled> {
        let next = self.outcomes.lock().expect("outcomes lock").pop_front();
        match next {
            Some(ScriptedRun::Outcome(outcome)) => Ok(outcome),
            Some(ScriptedRun::Hang) => {
                cancel.cancelled().await;
                Err(Cancelled)
            }
            None => Ok(ExecutionOutcome::failure("scripted interpreter has no outcomes left")),
        }
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn run_file(
        &self,
        path: &Path,
        goal: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, Cancelled> {
        self.calls.lock().expect("calls lock").push(RunCall {
            path: path.to_path_buf(),
            goal: goal.map(str::to_string),
            source: std::fs::read_to_string(path).ok(),
        });
        self.next(cancel).await
    }

    async fn run_query(
        &self,
        goal: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, Cancelled> {
        self.calls.lock().expect("calls lock").push(RunCall {
            path: PathBuf::new(),
            goal: Some(goal.to_string()),
            source: None,
        });
        self.next(cancel).await
    }

    async fn check_available(&self) -> bool {
        self.available
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

pub fn succeeded(output: &str) -> ExecutionOutcome {
    ExecutionOutcome::from_parts(0, output.to_string(), String::new(), String::new())
}

pub fn failed(error: &str) -> ExecutionOutcome {
    ExecutionOutcome::from_parts(1, String::new(), error.to_string(), String::new())
}

/// Non-zero exit without any error text.
pub fn silent_failure() -> ExecutionOutcome {
    ExecutionOutcome::from_parts(1, String::new(), String::new(), String::new())
}
