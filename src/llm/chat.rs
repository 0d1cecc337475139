//! Chat-completion endpoint description and the non-streaming call.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::VibecastConfig;
use crate::error::{PipelineError, Result};
use crate::llm::message::ChatMessage;

/// Cap on how much of an error body is kept for diagnostics.
pub(crate) const ERROR_BODY_LIMIT: usize = 64 * 1024;

/// Everything needed to call one provider's chat-completion endpoint.
#[derive(Clone)]
pub struct ChatEndpoint {
    /// Provider name, as configured.
    pub provider: String,
    /// Full chat completions URL.
    pub url: String,
    /// Model name.
    pub model: String,
    /// Bearer token.
    pub api_key: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Optional reasoning effort hint.
    pub reasoning_effort: Option<String>,
}

impl std::fmt::Debug for ChatEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEndpoint")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatEndpoint {
    /// Resolve `provider` from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the provider is unknown, has no
    /// inference URL or chat model, or has no API key.
    pub fn from_config(config: &VibecastConfig, provider: &str) -> Result<Self> {
        let entry = config.providers.get(provider)?;
        if entry.inference_url.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "inference url not configured for provider {provider}"
            )));
        }
        if entry.chat_model.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "chat model not configured for provider {provider}"
            )));
        }
        let api_key = config.providers.api_key(provider)?;
        Ok(Self {
            provider: provider.to_owned(),
            url: entry.inference_url.clone(),
            model: entry.chat_model.clone(),
            api_key,
            temperature: config.ai.temperature,
            reasoning_effort: config.ai.reasoning_effort_for(provider).map(str::to_owned),
        })
    }

    /// Build the JSON request body.
    pub fn request_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        if let Some(obj) = body.as_object_mut() {
            if stream {
                obj.insert("stream".into(), serde_json::json!(true));
            }
            if let Some(effort) = &self.reasoning_effort {
                obj.insert("reasoning_effort".into(), serde_json::json!(effort));
            }
        }
        body
    }
}

/// Read at most [`ERROR_BODY_LIMIT`] bytes of a failed response body.
///
/// The rest of the body is never read. A read error ends the body early.
pub(crate) async fn error_body(mut response: reqwest::Response) -> String {
    let mut body = Vec::new();
    while body.len() < ERROR_BODY_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(ERROR_BODY_LIMIT - body.len());
                body.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "error body read failed");
                break;
            }
        }
    }
    body_text(&body)
}

/// Lossy text of a possibly truncated body. A character cut off at the end is dropped.
fn body_text(body: &[u8]) -> String {
    let end = match std::str::from_utf8(body) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => body.len(),
    };
    String::from_utf8_lossy(&body[..end]).trim().to_owned()
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Non-streaming chat completion client.
#[derive(Debug, Clone)]
pub struct ChatClient {
    endpoint: ChatEndpoint,
    client: reqwest::Client,
}

impl ChatClient {
    /// Create a client with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the HTTP client cannot be built.
    pub fn new(endpoint: ChatEndpoint, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        Ok(Self { endpoint, client })
    }

    /// Send `messages` and return the trimmed content of the first choice.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StreamOpen`] for transport failures and
    /// non-2xx responses, and [`PipelineError::StreamDecode`] when the
    /// response has no usable choice.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = self.endpoint.request_body(messages, false);
        let response = self
            .client
            .post(&self.endpoint.url)
            .bearer_auth(&self.endpoint.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(provider = %self.endpoint.provider, error = %e, "chat request failed");
                PipelineError::StreamOpen(format!("chat request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = error_body(response).await;
            warn!(provider = %self.endpoint.provider, %status, body = %text, "chat error");
            return Err(PipelineError::StreamOpen(format!(
                "chat completion failed: {status}: {text}"
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::StreamDecode(format!("decode chat response: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::StreamDecode("chat completion: no choices".into()))?;
        Ok(choice.message.content.unwrap_or_default().trim().to_owned())
    }
}
