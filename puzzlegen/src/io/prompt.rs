//! Prompt rendering for the idea, code and fix phases.
//!
//! Templates are markdown rendered with minijinja. Each one is split into a
//! system and a user message by `<!-- role:system -->` and
//! `<!-- role:user -->` markers.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::backends::{ChatMessage, Role};

const IDEA_TEMPLATE: &str = include_str!("prompts/idea.md");
const CODE_TEMPLATE: &str = include_str!("prompts/code.md");
const FIX_TEMPLATE: &str = include_str!("prompts/fix.md");

const TEMPLATES: [(&str, &str); 3] = [
    ("idea.md", IDEA_TEMPLATE),
    ("code.md", CODE_TEMPLATE),
    ("fix.md", FIX_TEMPLATE),
];

static ROLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*role:(system|user)\s*-->").expect("role marker regex should compile")
});

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    /// Engine with the built-in templates only.
    pub fn builtin() -> Self {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .expect("built-in template should be valid");
        }
        Self { env }
    }

    /// Engine with built-ins, overridden by any `idea.md`, `code.md` or
    /// `fix.md` found in `templates_dir`.
    pub fn load(templates_dir: Option<&Path>) -> Result<Self> {
        let Some(dir) = templates_dir else {
            return Ok(Self::builtin());
        };
        let mut env = Environment::new();
        for (name, builtin) in TEMPLATES {
            let path = dir.join(name);
            let source = if path.is_file() {
                debug!(path = %path.display(), "using template override");
                fs::read_to_string(&path)
                    .with_context(|| format!("read template {}", path.display()))?
            } else {
                builtin.to_string()
            };
            check_markers(name, &source)?;
            env.add_template_owned(name.to_string(), source)
                .with_context(|| format!("parse template {}", path.display()))?;
        }
        Ok(Self { env })
    }

    pub fn idea_messages(
        &self,
        theme: Option<&str>,
        description: Option<&str>,
    ) -> Result<Vec<ChatMessage>> {
        self.render(
            "idea.md",
            context! {
                theme => non_empty(theme),
                description => non_empty(description),
            },
        )
    }

    pub fn code_messages(&self, idea: &str) -> Result<Vec<ChatMessage>> {
        self.render("code.md", context! { idea => idea.trim() })
    }

    /// `goal` is the goal that failed; `None` means the program failed to load.
    pub fn fix_messages(
        &self,
        code: &str,
        goal: Option<&str>,
        error: &str,
    ) -> Result<Vec<ChatMessage>> {
        self.render(
            "fix.md",
            context! {
                code => code.trim(),
                goal => non_empty(goal),
                error => non_empty(Some(error)),
            },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<Vec<ChatMessage>> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render template {name}"))?;
        Ok(split_roles(&rendered))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn check_markers(name: &str, source: &str) -> Result<()> {
    for role in ["system", "user"] {
        let found = ROLE_RE
            .captures_iter(source)
            .any(|caps| caps.get(1).is_some_and(|m| m.as_str() == role));
        if !found {
            return Err(anyhow!(
                "template {name} is missing the <!-- role:{role} --> marker"
            ));
        }
    }
    Ok(())
}

/// Split rendered output at role markers. Text before the first marker is
/// dropped; empty system sections are skipped.
fn split_roles(rendered: &str) -> Vec<ChatMessage> {
    let markers: Vec<_> = ROLE_RE.captures_iter(rendered).collect();
    let mut messages = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(role)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim();
        let role = if role.as_str() == "system" {
            Role::System
        } else {
            Role::User
        };
        if content.is_empty() && role == Role::System {
            continue;
        }
        messages.push(ChatMessage::new(role, content));
    }

    messages
}
