//! Configuration types for the conversation pipeline.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Provider used for conversation turns when none is configured.
pub const DEFAULT_CONVERSATION_PROVIDER: &str = "groq";
/// Provider used for speech synthesis when none is configured.
pub const DEFAULT_TTS_PROVIDER: &str = "openai";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VibecastConfig {
    /// Which providers handle which job.
    pub ai: AiConfig,
    /// Named provider endpoints and credentials.
    pub providers: ProvidersConfig,
    /// Speech synthesis settings.
    pub tts: TtsConfig,
    /// Chat stream transport settings.
    pub stream: StreamConfig,
    /// Playback settings.
    pub audio: AudioConfig,
    /// Persistence settings.
    pub storage: StorageConfig,
}

/// Provider routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Provider that generates Guest replies.
    pub conversation_provider: String,
    /// Provider that synthesizes speech.
    pub tts_provider: String,
    /// Provider used to rewrite blocks into spoken phrasing before synthesis.
    ///
    /// Empty disables the rewrite.
    pub speech_prep_provider: String,
    /// Reasoning effort hint. Only sent to the `openai` provider.
    pub reasoning_effort: String,
    /// Sampling temperature for conversation turns.
    pub temperature: f64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            conversation_provider: DEFAULT_CONVERSATION_PROVIDER.to_owned(),
            tts_provider: DEFAULT_TTS_PROVIDER.to_owned(),
            speech_prep_provider: String::new(),
            reasoning_effort: String::new(),
            temperature: 1.0,
        }
    }
}

impl AiConfig {
    /// Reasoning effort to send to `provider`, if any.
    pub fn reasoning_effort_for(&self, provider: &str) -> Option<&str> {
        let effort = self.reasoning_effort.trim();
        (provider == "openai" && !effort.is_empty()).then_some(effort)
    }
}

/// One OpenAI-compatible provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Model used for chat completions.
    pub chat_model: String,
    /// Model used for speech synthesis.
    pub tts_model: String,
    /// Full chat completions URL.
    pub inference_url: String,
    /// Full speech synthesis URL.
    pub tts_url: String,
    /// Inline API key.
    pub api_key: String,
    /// Read the key from `<PROVIDER>_API_KEY` instead of `api_key`.
    pub api_key_from_env: bool,
}

/// Named providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvidersConfig(pub BTreeMap<String, ProviderConfig>);

impl Default for ProvidersConfig {
    fn default() -> Self {
        let mut providers = Self(BTreeMap::new());
        providers.fill_builtin();
        providers
    }
}

fn builtin_groq() -> ProviderConfig {
    ProviderConfig {
        chat_model: "llama-3.3-70b-versatile".to_owned(),
        inference_url: "https://api.groq.com/openai/v1/chat/completions".to_owned(),
        api_key_from_env: true,
        ..ProviderConfig::default()
    }
}

fn builtin_openai() -> ProviderConfig {
    ProviderConfig {
        chat_model: "gpt-4o".to_owned(),
        tts_model: "tts-1".to_owned(),
        inference_url: "https://api.openai.com/v1/chat/completions".to_owned(),
        tts_url: "https://api.openai.com/v1/audio/speech".to_owned(),
        api_key_from_env: true,
        ..ProviderConfig::default()
    }
}

impl ProvidersConfig {
    /// Re-add built-in providers missing from a loaded file.
    pub fn fill_builtin(&mut self) {
        self.0.entry("groq".to_owned()).or_insert_with(builtin_groq);
        self.0
            .entry("openai".to_owned())
            .or_insert_with(builtin_openai);
    }

    /// Look up a provider by name.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the provider is not configured.
    pub fn get(&self, name: &str) -> Result<&ProviderConfig> {
        self.0
            .get(name)
            .ok_or_else(|| PipelineError::Config(format!("provider {name} not found in config")))
    }

    /// Choose the provider that will actually serve speech synthesis.
    ///
    /// A provider without a TTS URL falls back to `openai` when that one is
    /// configured.
    pub fn resolve_tts_provider(&self, requested: &str) -> String {
        let requested = requested.trim();
        let requested = if requested.is_empty() {
            DEFAULT_TTS_PROVIDER
        } else {
            requested
        };
        let has_url = self
            .0
            .get(requested)
            .is_some_and(|p| !p.tts_url.trim().is_empty());
        if !has_url && self.0.contains_key(DEFAULT_TTS_PROVIDER) {
            return DEFAULT_TTS_PROVIDER.to_owned();
        }
        requested.to_owned()
    }

    /// Resolve the API key for `name` from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if no key is available.
    pub fn api_key(&self, name: &str) -> Result<String> {
        self.api_key_with(name, |var| std::env::var(var).ok())
    }

    /// Resolve the API key for `name` using `lookup` for environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if no key is available.
    pub fn api_key_with<F>(&self, name: &str, lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = self.get(name)?;
        let env_var = api_key_env_var(name);
        let from_env = lookup(&env_var).filter(|k| !k.trim().is_empty());

        if provider.api_key_from_env {
            return from_env.ok_or_else(|| {
                PipelineError::Config(format!("environment variable {env_var} is not set"))
            });
        }
        if !provider.api_key.trim().is_empty() {
            return Ok(provider.api_key.clone());
        }
        from_env.ok_or_else(|| {
            PipelineError::Config(format!(
                "api_key not configured and environment variable {env_var} not set"
            ))
        })
    }
}

/// Environment variable holding the key for `provider` (e.g. `OPENAI_API_KEY`).
pub fn api_key_env_var(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase())
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Requested audio encoding.
    pub response_format: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Voice used when a conversation does not pick one.
    pub default_voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            response_format: "wav".to_owned(),
            timeout_secs: 60,
            default_voice: "alloy".to_owned(),
        }
    }
}

/// Chat stream transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Capacity of the per-turn event channel.
    pub channel_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 90,
            channel_size: 32,
        }
    }
}

/// Playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Explicit player command (None = discover on `PATH`).
    pub player: Option<String>,
    /// Arguments placed before the clip path.
    pub player_args: Vec<String>,
    /// Maximum clips waiting for playback.
    pub queue_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            player: None,
            player_args: Vec::new(),
            queue_size: 64,
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Override for the data root (None = platform data dir).
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Directory that holds one subdirectory per conversation.
    pub fn conversations_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.join("conversations"),
            None => crate::vibecast_dirs::conversations_dir(),
        }
    }
}

impl VibecastConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self =
            toml::from_str(&content).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.providers.fill_builtin();
        Ok(config)
    }

    /// Load `path`, writing the defaults there first if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or created.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::from_file(path);
        }
        let config = Self::default();
        config.save_to_file(path)?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// The file is replaced atomically via a temporary sibling.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Returns the default config file path: `~/.config/vibecast/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("vibecast").join("config.toml")
        } else {
            crate::vibecast_dirs::config_dir().join("config.toml")
        }
    }
}
