//! Request bodies and response parsing for the supported wire protocols.
//!
//! Pure functions over JSON so they can be tested without a server.

use anyhow::{Context, Result, anyhow};
use serde_json::{Value as JsonValue, json};

use crate::backends::{ChatMessage, GenerationOptions};

/// Text and token count extracted from a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub tokens: u32,
}

/// Body for Ollama's native `/api/chat`.
pub fn ollama_request(
    model: &str,
    messages: &[ChatMessage],
    options: &GenerationOptions,
) -> JsonValue {
    json!({
        "model": model,
        "messages": messages,
        "stream": false,
        "options": {
            "num_predict": options.max_tokens,
            "temperature": options.temperature,
            "top_p": options.top_p,
            "repeat_penalty": options.repeat_penalty,
        },
    })
}

/// Body for OpenAI-compatible `/v1/chat/completions`.
///
/// `repeat_penalty` is a llama.cpp/LM Studio extension; hosted OpenAI
/// rejects unknown sampling fields, so it is only sent when requested.
pub fn openai_request(
    model: &str,
    messages: &[ChatMessage],
    options: &GenerationOptions,
    with_repeat_penalty: bool,
) -> JsonValue {
    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": false,
        "max_tokens": options.max_tokens,
        "temperature": options.temperature,
        "top_p": options.top_p,
    });
    if with_repeat_penalty {
        body["repeat_penalty"] = json!(options.repeat_penalty);
    }
    body
}

pub fn parse_ollama_chat(body: &str) -> Result<Reply> {
    let json: JsonValue = serde_json::from_str(body).context("parse ollama response")?;
    if let Some(err) = json.get("error").and_then(JsonValue::as_str) {
        return Err(anyhow!("ollama error: {err}"));
    }
    let text = json
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(JsonValue::as_str)
        .ok_or_else(|| anyhow!("ollama response missing message.content"))?;
    Ok(Reply {
        text: text.to_string(),
        tokens: token_count(json.get("eval_count")),
    })
}

pub fn parse_openai_chat(body: &str) -> Result<Reply> {
    let json: JsonValue = serde_json::from_str(body).context("parse chat completion")?;
    if let Some(err) = json.get("error") {
        let message = err
            .get("message")
            .and_then(JsonValue::as_str)
            .map_or_else(|| err.to_string(), str::to_string);
        return Err(anyhow!("chat completion error: {message}"));
    }
    let text = json["choices"]
        .get(0)
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(JsonValue::as_str)
        .ok_or_else(|| anyhow!("chat completion missing choices[0].message.content"))?;
    Ok(Reply {
        text: text.to_string(),
        tokens: token_count(json.get("usage").and_then(|u| u.get("completion_tokens"))),
    })
}

fn token_count(value: Option<&JsonValue>) -> u32 {
    value
        .and_then(JsonValue::as_u64)
        .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}

/// Shorten an error body for logs and messages.
pub fn truncate(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
