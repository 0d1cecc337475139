//! Prompt templates for the Guest persona and the speech-prep rewrite.
//!
//! Templates use `{{name}}` placeholders. Built-in templates are compiled in
//! from `Prompts/`; a file with the same name in the prompts directory
//! replaces the built-in one.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::llm::message::{ChatMessage, ConversationLine};

/// Guest system prompt file name.
pub const SYSTEM_PROMPT_FILE: &str = "system_prompt.txt";
/// Speech-prep rewrite prompt file name.
pub const TEXT_TO_SPEECH_FILE: &str = "text_to_speech.txt";

const BUILTIN_SYSTEM_PROMPT: &str = include_str!("../../Prompts/system_prompt.txt");
const BUILTIN_TEXT_TO_SPEECH: &str = include_str!("../../Prompts/text_to_speech.txt");

/// Substitute `{{name}}` placeholders from `vars`.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] for an unterminated placeholder or one
/// with no value in `vars`.
///
/// # Examples
///
/// ```
/// use vibecast::llm::prompts::render_template;
///
/// let out = render_template("Hi {{ topic }}!", &[("topic", "jazz")]).unwrap();
/// assert_eq!(out, "Hi jazz!");
/// ```
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            PipelineError::Config("unterminated placeholder in prompt template".into())
        })?;
        let name = after[..end].trim();
        let value = vars
            .iter()
            .find_map(|(k, v)| (*k == name).then_some(*v))
            .ok_or_else(|| {
                PipelineError::Config(format!("unknown placeholder {{{{{name}}}}} in prompt template"))
            })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Loads prompt templates, preferring overrides on disk.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    override_dir: Option<PathBuf>,
}

impl PromptLibrary {
    /// Library using only the built-in templates.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Library that checks `dir` for overrides first.
    pub fn with_override_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            override_dir: Some(dir.into()),
        }
    }

    fn load(&self, file: &str, builtin: &'static str) -> Result<String> {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(file);
            if path.is_file() {
                debug!(path = %path.display(), "using prompt override");
                return read_template(&path);
            }
        }
        Ok(builtin.to_owned())
    }

    /// Render the Guest system prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be read or fails to render.
    pub fn system_prompt(&self, persona: &str, topic: &str) -> Result<String> {
        let template = self.load(SYSTEM_PROMPT_FILE, BUILTIN_SYSTEM_PROMPT)?;
        render_template(&template, &[("persona", persona), ("topic", topic)])
    }

    /// Render the speech-prep rewrite prompt for one line.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be read or fails to render.
    pub fn text_to_speech(&self, persona: &str, topic: &str, voice: &str, text: &str) -> Result<String> {
        let template = self.load(TEXT_TO_SPEECH_FILE, BUILTIN_TEXT_TO_SPEECH)?;
        render_template(
            &template,
            &[("persona", persona), ("topic", topic), ("voice", voice), ("text", text)],
        )
    }
}

fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Config(format!("read prompt template {}: {e}", path.display()))
    })
}

/// The synthetic opener used when the Guest speaks first.
pub fn opening_request(topic: &str) -> String {
    format!(
        "Start the episode with a brief warm greeting to the host, then invite the first question about the topic: {topic}."
    )
}

/// Build the model input for a Guest turn.
///
/// An empty history means the Guest opens the episode.
pub fn guest_turn_messages(
    system_prompt: String,
    history: &[ConversationLine],
    topic: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(system_prompt));
    if history.is_empty() {
        messages.push(ChatMessage::user(opening_request(topic)));
    } else {
        messages.extend(history.iter().map(ConversationLine::to_chat));
    }
    messages
}
