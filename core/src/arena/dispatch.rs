//! Per-session dispatch against the provider chat endpoints.
//!
//! The client builds the provider-specific request, performs the single
//! network round trip, and classifies what came back. It never touches
//! session state; the controller applies the returned outcome under its own
//! lock. Classification is a strict three-way split: transport problems are
//! the only hard failures, a non-success status becomes a synthetic reply,
//! and an empty reply body becomes a fixed fallback string.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::providers::catalog;
use crate::providers::registry::AiInstance;

/// Synthetic reply stored when the provider answered with a non-success
/// status. Rendered as an ordinary assistant message, not an error.
pub const NO_REPLY_FALLBACK: &str = "No reply received.";

/// Fallback stored when the provider answered successfully but the reply
/// payload was empty.
pub const EMPTY_REPLY_FALLBACK: &str = "No response from AI";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1000;

/// Classified result of one dispatch round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Reply text extracted from a successful response.
    Success(String),
    /// Non-success status: the text is rendered as a plain reply.
    SoftFailure(String),
    /// Transport or decode failure: the message is rendered as an error.
    HardFailure(String),
}

impl DispatchOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::SoftFailure(_) => "soft_failure",
            Self::HardFailure(_) => "hard_failure",
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Success(text) | Self::SoftFailure(text) | Self::HardFailure(text) => text,
        }
    }
}

#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Perform the network call for one instance and classify the outcome.
    async fn dispatch(
        &self,
        instance: &AiInstance,
        prompt: &str,
        credential: Option<&str>,
    ) -> DispatchOutcome;
}

/// Dispatch client that talks to the provider chat APIs over HTTPS.
pub struct HttpDispatchClient {
    client: Client,
}

impl HttpDispatchClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(45))
            .user_agent("Arena-Core/0.1")
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Dispatch for HttpDispatchClient {
    async fn dispatch(
        &self,
        instance: &AiInstance,
        prompt: &str,
        credential: Option<&str>,
    ) -> DispatchOutcome {
        let call = match build_call(instance, prompt, credential) {
            Ok(call) => call,
            Err(err) => return DispatchOutcome::HardFailure(err.to_string()),
        };

        let mut request = self.client.post(call.url.as_str()).json(&call.payload);
        for (name, value) in &call.headers {
            request = request.header(*name, value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return DispatchOutcome::HardFailure(err.to_string()),
        };
        if !response.status().is_success() {
            return DispatchOutcome::SoftFailure(NO_REPLY_FALLBACK.to_string());
        }
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => return DispatchOutcome::HardFailure(err.to_string()),
        };
        classify_reply(extract_reply(&instance.provider_key, &body))
    }
}

struct ProviderCall {
    url: String,
    headers: Vec<(&'static str, String)>,
    payload: Value,
}

fn build_call(instance: &AiInstance, prompt: &str, credential: Option<&str>) -> Result<ProviderCall> {
    let seed = catalog::seed_for(&instance.provider_key)
        .ok_or_else(|| anyhow!("Unsupported provider: {}", instance.provider_key))?;
    let base = seed.base_url.trim_end_matches('/');
    let key = credential.unwrap_or_default();

    let call = match instance.provider_key.as_str() {
        "claude" => ProviderCall {
            url: format!("{base}/v1/messages"),
            headers: vec![
                ("x-api-key", key.to_string()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            payload: json!({
                "model": instance.model,
                "max_tokens": MAX_TOKENS,
                "messages": [{"role": "user", "content": prompt}],
            }),
        },
        "gemini" => ProviderCall {
            url: format!("{base}/models/{}:generateContent?key={key}", instance.model),
            headers: Vec::new(),
            payload: json!({
                "contents": [{"parts": [{"text": prompt}]}],
            }),
        },
        "cohere" => ProviderCall {
            url: format!("{base}/v1/chat"),
            headers: vec![("Authorization", format!("Bearer {key}"))],
            payload: json!({
                "model": instance.model,
                "message": prompt,
                "max_tokens": MAX_TOKENS,
            }),
        },
        "qwen" => ProviderCall {
            url: format!("{base}/api/v1/services/aigc/text-generation/generation"),
            headers: vec![("Authorization", format!("Bearer {key}"))],
            payload: json!({
                "model": instance.model,
                "input": {"prompt": prompt},
                "parameters": {"max_tokens": MAX_TOKENS},
            }),
        },
        // openai, copilot, deepseek, grok, llama, mistral all speak the
        // OpenAI chat-completions shape at their own base URL.
        _ => ProviderCall {
            url: format!("{base}/v1/chat/completions"),
            headers: vec![("Authorization", format!("Bearer {key}"))],
            payload: json!({
                "model": instance.model,
                "messages": [{"role": "user", "content": prompt}],
                "max_tokens": MAX_TOKENS,
            }),
        },
    };
    Ok(call)
}

fn extract_reply(provider_key: &str, body: &Value) -> String {
    let reply = match provider_key {
        "claude" => body
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|part| part.get("text")),
        "gemini" => body
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|cand| cand.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(|parts| parts.get(0))
            .and_then(|part| part.get("text")),
        "cohere" => body.get("text"),
        "qwen" => body.get("output").and_then(|o| o.get("text")),
        _ => body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content")),
    };
    reply.and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

fn classify_reply(reply: String) -> DispatchOutcome {
    if reply.trim().is_empty() {
        DispatchOutcome::Success(EMPTY_REPLY_FALLBACK.to_string())
    } else {
        DispatchOutcome::Success(reply)
    }
}
