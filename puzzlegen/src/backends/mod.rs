//! Text-generation backends.
//!
//! The pipeline only sees the [`ChatBackend`] trait: an ordered list of
//! role-tagged messages plus sampling options in, one completion out. The
//! closed set of supported servers is [`BackendKind`]; [`HttpBackend`] speaks
//! their wire protocols and [`BackendRouter`] picks one per request.

pub mod http;
pub mod parse;
pub mod router;

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpBackend;
pub use router::{BackendRouter, BackendStatus};

/// Supported text-generation servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ollama native API.
    Ollama,
    /// LM Studio (OpenAI-compatible).
    #[serde(alias = "lm-studio", alias = "lm_studio")]
    LmStudio,
    /// OpenAI or any hosted OpenAI-compatible API.
    OpenAi,
    /// llama.cpp server (OpenAI-compatible).
    #[serde(alias = "llamacpp", alias = "llama.cpp")]
    Local,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Ollama,
        BackendKind::LmStudio,
        BackendKind::OpenAi,
        BackendKind::Local,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Ollama => "ollama",
            BackendKind::LmStudio => "lmstudio",
            BackendKind::OpenAi => "openai",
            BackendKind::Local => "local",
        }
    }

    /// Lenient, case-insensitive parse. Separators are ignored, so
    /// `LM Studio`, `lm-studio` and `lm_studio` all name [`BackendKind::LmStudio`].
    pub fn parse(name: &str) -> Option<Self> {
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' ' | '.'))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "ollama" => Some(BackendKind::Ollama),
            "lmstudio" => Some(BackendKind::LmStudio),
            "openai" | "gpt" => Some(BackendKind::OpenAi),
            "local" | "llamacpp" => Some(BackendKind::Local),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling options for one completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub repeat_penalty: f64,
}

/// One completion returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Generated tokens as reported by the server; 0 when unreported.
    pub tokens: u32,
    pub elapsed: Duration,
}

/// Capability interface shared by every text-generation backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn model(&self) -> String;

    fn set_model(&self, model: &str);

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Completion>;

    /// Whether the server answers. Never fails.
    async fn is_ready(&self) -> bool;

    /// `kind:model`, recorded in results.
    fn id(&self) -> String {
        format!("{}:{}", self.kind(), self.model())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_lenient() {
        assert_eq!(BackendKind::parse("Ollama"), Some(BackendKind::Ollama));
        assert_eq!(BackendKind::parse("LM Studio"), Some(BackendKind::LmStudio));
        assert_eq!(BackendKind::parse("lm_studio"), Some(BackendKind::LmStudio));
        assert_eq!(BackendKind::parse("OpenAI"), Some(BackendKind::OpenAi));
        assert_eq!(BackendKind::parse("llama.cpp"), Some(BackendKind::Local));
        assert_eq!(BackendKind::parse("claude"), None);
        assert_eq!(BackendKind::parse(""), None);
    }

    #[test]
    fn as_str_round_trips_through_parse() {
        for kind in BackendKind::ALL {
            assert_eq!(BackendKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn serde_names_match_as_str() {
        for kind in BackendKind::ALL {
            let json = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        let aliased: BackendKind = serde_json::from_str("\"lm-studio\"").expect("deserialize");
        assert_eq!(aliased, BackendKind::LmStudio);
    }
}
