//! HTTP chat backend for Ollama and OpenAI-compatible servers.

use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument, warn};

use crate::backends::parse::{
    Reply, ollama_request, openai_request, parse_ollama_chat, parse_openai_chat, truncate,
};
use crate::backends::{BackendKind, ChatBackend, ChatMessage, Completion, GenerationOptions};
use crate::io::config::EndpointConfig;

const READINESS_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_BODY_CHARS: usize = 320;

pub struct HttpBackend {
    kind: BackendKind,
    base_url: String,
    api_key: Option<String>,
    model: RwLock<String>,
    client: Client,
}

impl HttpBackend {
    pub fn new(kind: BackendKind, endpoint: &EndpointConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            kind,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            model: RwLock::new(endpoint.model.clone()),
            client,
        })
    }

    fn chat_url(&self) -> String {
        match self.kind {
            BackendKind::Ollama => format!("{}/api/chat", self.base_url),
            _ => format!("{}/v1/chat/completions", self.base_url),
        }
    }

    fn ready_url(&self) -> String {
        match self.kind {
            BackendKind::Ollama => format!("{}/api/tags", self.base_url),
            _ => format!("{}/v1/models", self.base_url),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model(&self) -> String {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_model(&self, model: &str) {
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = model.to_string();
    }

    #[instrument(skip_all, fields(backend = %self.kind, messages = messages.len()))]
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let started = Instant::now();
        let model = self.model();
        let url = self.chat_url();
        let body = match self.kind {
            BackendKind::Ollama => ollama_request(&model, messages, options),
            BackendKind::OpenAi => openai_request(&model, messages, options, false),
            BackendKind::LmStudio | BackendKind::Local => {
                openai_request(&model, messages, options, true)
            }
        };

        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .with_context(|| format!("{} request to {url}", self.kind))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("read {} response", self.kind))?;
        if !status.is_success() {
            warn!(%status, "backend returned an error status");
            return Err(anyhow!(
                "{} returned {status}: {}",
                self.kind,
                truncate(&text, ERROR_BODY_CHARS)
            ));
        }

        let Reply { text, tokens } = match self.kind {
            BackendKind::Ollama => parse_ollama_chat(&text)?,
            _ => parse_openai_chat(&text)?,
        };
        let elapsed = started.elapsed();
        debug!(%model, tokens, elapsed_ms = elapsed.as_millis() as u64, "completion received");
        Ok(Completion {
            text,
            tokens,
            elapsed,
        })
    }

    async fn is_ready(&self) -> bool {
        let request = self
            .authorize(self.client.get(self.ready_url()))
            .timeout(READINESS_TIMEOUT);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(backend = %self.kind, err = %err, "readiness probe failed");
                false
            }
        }
    }
}
