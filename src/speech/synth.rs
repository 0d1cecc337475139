//! Speech synthesis client.
//!
//! [`SpeechClient`] normalizes a block, optionally asks a chat model to
//! rephrase it for speaking (see [`SpeechPreparer`]), then posts it to an
//! OpenAI-compatible `/audio/speech` endpoint and returns the raw audio.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{ProvidersConfig, TtsConfig};
use crate::error::{PipelineError, Result};
use crate::llm::chat::{ChatClient, error_body};
use crate::llm::message::ChatMessage;
use crate::llm::prompts::PromptLibrary;
use crate::speech::normalize::normalize_for_speech;

/// One block to voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisJob {
    /// Block text, as extracted.
    pub text: String,
    /// Voice name sent to the provider.
    pub voice_id: String,
    /// Provider requested for synthesis.
    pub provider: String,
}

impl SynthesisJob {
    /// Create a job.
    pub fn new(
        text: impl Into<String>,
        voice_id: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            voice_id: voice_id.into(),
            provider: provider.into(),
        }
    }
}

/// Turns one block of text into audio bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `job`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Synthesis`] on any failure.
    async fn synthesize(&self, job: &SynthesisJob) -> Result<Bytes>;
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a str>,
}

/// Rewrites a line into natural spoken phrasing with a chat model.
#[derive(Debug, Clone)]
pub struct SpeechPreparer {
    chat: ChatClient,
    prompts: PromptLibrary,
    persona: String,
    topic: String,
}

impl SpeechPreparer {
    /// Create a preparer for one conversation's persona and topic.
    pub fn new(
        chat: ChatClient,
        prompts: PromptLibrary,
        persona: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            chat,
            prompts,
            persona: persona.into(),
            topic: topic.into(),
        }
    }

    /// Rewrite `text` for `voice`.
    ///
    /// # Errors
    ///
    /// Fails if the prompt cannot be rendered, the chat call fails, or the
    /// model returns nothing.
    pub async fn prepare(&self, voice: &str, text: &str) -> Result<String> {
        let prompt = self
            .prompts
            .text_to_speech(&self.persona, &self.topic, voice, text)?;
        // Single system message; the template already embeds the line.
        let out = self.chat.complete(&[ChatMessage::system(prompt)]).await?;
        if out.is_empty() {
            return Err(PipelineError::StreamDecode("empty speech prep output".into()));
        }
        Ok(out)
    }
}

/// HTTP implementation of [`SpeechSynthesizer`].
#[derive(Debug, Clone)]
pub struct SpeechClient {
    providers: ProvidersConfig,
    tts: TtsConfig,
    client: reqwest::Client,
    preparer: Option<SpeechPreparer>,
}

impl SpeechClient {
    /// Create a client from provider and TTS configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the HTTP client cannot be built.
    pub fn new(providers: ProvidersConfig, tts: TtsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(tts.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            providers,
            tts,
            client,
            preparer: None,
        })
    }

    /// Enable the speech-prep rewrite.
    #[must_use]
    pub fn with_preparer(mut self, preparer: SpeechPreparer) -> Self {
        self.preparer = Some(preparer);
        self
    }

    /// Text that will actually be sent for `job`: normalized, then rewritten
    /// when a preparer is set and succeeds.
    pub async fn speakable_text(&self, job: &SynthesisJob) -> String {
        let normalized = normalize_for_speech(&job.text);
        let Some(preparer) = &self.preparer else {
            return normalized;
        };
        if normalized.is_empty() {
            return normalized;
        }
        match preparer.prepare(&self.voice(job), &normalized).await {
            Ok(prepared) => {
                let prepared = normalize_for_speech(&prepared);
                if prepared.is_empty() { normalized } else { prepared }
            }
            Err(e) => {
                debug!(error = %e, "speech prep failed; using normalized text");
                normalized
            }
        }
    }

    fn voice(&self, job: &SynthesisJob) -> String {
        let voice = job.voice_id.trim();
        if voice.is_empty() {
            self.tts.default_voice.clone()
        } else {
            voice.to_owned()
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechClient {
    async fn synthesize(&self, job: &SynthesisJob) -> Result<Bytes> {
        let provider = self.providers.resolve_tts_provider(&job.provider);
        let entry = self
            .providers
            .get(&provider)
            .map_err(|e| PipelineError::Synthesis(e.to_string()))?;
        if entry.tts_url.trim().is_empty() {
            return Err(PipelineError::Synthesis(format!(
                "tts url not configured for provider {provider}"
            )));
        }
        if entry.tts_model.trim().is_empty() {
            return Err(PipelineError::Synthesis(format!(
                "tts model not configured for provider {provider}"
            )));
        }
        let api_key = self
            .providers
            .api_key(&provider)
            .map_err(|e| PipelineError::Synthesis(e.to_string()))?;

        let input = self.speakable_text(job).await;
        if input.is_empty() {
            return Err(PipelineError::Synthesis("nothing speakable in block".into()));
        }
        let voice = self.voice(job);

        let request = SpeechRequest {
            model: &entry.tts_model,
            voice: &voice,
            input: &input,
            response_format: Some(self.tts.response_format.trim()).filter(|f| !f.is_empty()),
        };
        let response = self
            .client
            .post(&entry.tts_url)
            .bearer_auth(&api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(%provider, error = %e, "tts request failed");
                PipelineError::Synthesis(format!("tts request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = error_body(response).await;
            warn!(%provider, %status, body = %text, "tts error");
            return Err(PipelineError::Synthesis(format!(
                "tts failed: {status}: {text}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| PipelineError::Synthesis(format!("tts read error: {e}")))?;
        if audio.is_empty() {
            warn!(%provider, "tts returned empty audio");
            return Err(PipelineError::Synthesis("tts returned empty audio".into()));
        }
        debug!(%provider, %voice, bytes = audio.len(), "synthesized block");
        Ok(audio)
    }
}
