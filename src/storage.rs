//! Filesystem persistence for conversations.
//!
//! Layout under the conversations root:
//!
//! ```text
//! <root>/<conversation_id>/transcript.txt
//! <root>/<conversation_id>/audio/001.wav
//! <root>/<conversation_id>/audio/002.wav
//! ```
//!
//! Transcript lines look like `[2025-01-31T20:15:02+00:00] Guest: Hello! [Audio: 001.wav]`,
//! the audio suffix being optional. Clips are numbered one past the highest
//! existing index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, SecondsFormat};
use tokio::io::AsyncWriteExt;

use crate::error::{PipelineError, Result};
use crate::llm::message::{ConversationLine, Speaker};

const TRANSCRIPT_FILE: &str = "transcript.txt";
const AUDIO_DIR: &str = "audio";
const AUDIO_EXT: &str = "wav";
const AUDIO_MARKER: &str = " [Audio:";

/// What the pipeline needs from persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append one line to the conversation transcript.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] if the transcript cannot be written.
    async fn append_message(&self, conversation_id: &str, speaker: Speaker, text: &str) -> Result<()>;

    /// Persist a clip and return its file name.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] if the clip cannot be written.
    async fn save_audio(&self, conversation_id: &str, audio: &[u8]) -> Result<String>;

    /// Full path of a clip returned by [`save_audio`](Self::save_audio).
    fn audio_path(&self, conversation_id: &str, filename: &str) -> PathBuf;
}

/// One parsed transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// When the line was written.
    pub timestamp: DateTime<FixedOffset>,
    /// Who spoke.
    pub speaker: Speaker,
    /// What was said, without any audio reference.
    pub content: String,
}

impl TranscriptEntry {
    /// Drop the timestamp.
    pub fn to_line(&self) -> ConversationLine {
        ConversationLine::new(self.speaker, self.content.clone())
    }
}

/// Parse transcript text, skipping lines that do not match the format.
pub fn parse_transcript(content: &str) -> Vec<TranscriptEntry> {
    content.lines().filter_map(parse_transcript_line).collect()
}

fn parse_transcript_line(line: &str) -> Option<TranscriptEntry> {
    let line = line.trim();
    let rest = line.strip_prefix('[')?;
    let (stamp, rest) = rest.split_once(']')?;
    let timestamp = DateTime::parse_from_rfc3339(stamp).ok()?;
    let (speaker, content) = rest.trim().split_once(':')?;
    let speaker = Speaker::from_label(speaker)?;
    let content = content.trim();
    let content = strip_audio_suffix(content).unwrap_or(content);
    Some(TranscriptEntry {
        timestamp,
        speaker,
        content: content.to_owned(),
    })
}

/// Content before a trailing `[Audio: NNN.wav]` reference, if there is one.
fn strip_audio_suffix(content: &str) -> Option<&str> {
    let body = content.strip_suffix(']')?;
    let idx = body.rfind(AUDIO_MARKER)?;
    clip_index(body[idx + AUDIO_MARKER.len()..].trim())?;
    Some(content[..idx].trim_end())
}

fn format_transcript_line(speaker: Speaker, text: &str, audio_file: Option<&str>) -> String {
    let stamp = Local::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match audio_file {
        Some(file) => format!("[{stamp}] {speaker}: {text}{AUDIO_MARKER} {file}]\n"),
        None => format!("[{stamp}] {speaker}: {text}\n"),
    }
}

/// Index of a clip named `NNN.wav`. Indexes past 999 widen the stem.
fn clip_index(name: &str) -> Option<u32> {
    let (stem, ext) = name.split_once('.')?;
    if ext != AUDIO_EXT || stem.len() < 3 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

fn storage_err(action: &str, path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::Storage(format!("failed to {action} {}: {e}", path.display()))
}

/// Transcript and clip store rooted at one directory.
#[derive(Debug, Clone)]
pub struct FsConversationStore {
    root: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl FsConversationStore {
    /// Create a store rooted at `root` (created lazily).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Conversations root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(id.to_owned()).or_default())
    }

    /// Directory of one conversation.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] for ids that are empty or contain
    /// path separators.
    pub fn conversation_dir(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && !id.contains('\0');
        if !valid {
            return Err(PipelineError::Storage(format!("invalid conversation id {id:?}")));
        }
        Ok(self.root.join(id))
    }

    fn transcript_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.conversation_dir(id)?.join(TRANSCRIPT_FILE))
    }

    fn audio_dir(&self, id: &str) -> Result<PathBuf> {
        Ok(self.conversation_dir(id)?.join(AUDIO_DIR))
    }

    /// Create the conversation directories and an empty transcript if missing.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] on I/O failure.
    pub async fn create_conversation(&self, id: &str) -> Result<PathBuf> {
        let dir = self.conversation_dir(id)?;
        let audio = self.audio_dir(id)?;
        tokio::fs::create_dir_all(&audio)
            .await
            .map_err(|e| storage_err("create", &audio, e))?;
        let transcript = dir.join(TRANSCRIPT_FILE);
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&transcript)
            .await
            .map_err(|e| storage_err("create", &transcript, e))?;
        Ok(dir)
    }

    /// Whether the conversation directory exists.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] for invalid ids or I/O failure.
    pub async fn exists(&self, id: &str) -> Result<bool> {
        let dir = self.conversation_dir(id)?;
        tokio::fs::try_exists(&dir)
            .await
            .map_err(|e| storage_err("stat", &dir, e))
    }

    /// Append a line that references a clip.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] if the transcript cannot be written.
    pub async fn append_message_with_audio(
        &self,
        id: &str,
        speaker: Speaker,
        text: &str,
        audio_file: &str,
    ) -> Result<()> {
        self.append_line(id, format_transcript_line(speaker, text, Some(audio_file)))
            .await
    }

    async fn append_line(&self, id: &str, line: String) -> Result<()> {
        let path = self.transcript_path(id)?;
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err("create", parent, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| storage_err("open", &path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| storage_err("write", &path, e))?;
        file.flush().await.map_err(|e| storage_err("write", &path, e))
    }

    /// Raw transcript text.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] if the transcript cannot be read.
    pub async fn read_transcript(&self, id: &str) -> Result<String> {
        let path = self.transcript_path(id)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| storage_err("read", &path, e))
    }

    /// Parsed transcript; empty when the conversation has none yet.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] on I/O failure other than a missing file.
    pub async fn load_messages(&self, id: &str) -> Result<Vec<TranscriptEntry>> {
        let path = self.transcript_path(id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(parse_transcript(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(storage_err("read", &path, e)),
        }
    }

    async fn file_names(dir: &Path) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err("read", dir, e)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err("read", dir, e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Clip file names, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] if the audio directory cannot be read.
    pub async fn list_audio_files(&self, id: &str) -> Result<Vec<String>> {
        let dir = self.audio_dir(id)?;
        let mut names: Vec<String> = Self::file_names(&dir)
            .await?
            .into_iter()
            .filter(|n| !n.ends_with(".tmp"))
            .collect();
        names.sort_by_key(|n| (clip_index(n).unwrap_or(u32::MAX), n.clone()));
        Ok(names)
    }

    /// Ids of stored conversations, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] if the root cannot be read.
    pub async fn list_conversations(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for name in Self::file_names(&self.root).await? {
            if self.root.join(&name).is_dir() {
                ids.push(name);
            }
        }
        Ok(ids)
    }

    /// Remove a conversation and everything in it. Missing is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] on I/O failure.
    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        let dir = self.conversation_dir(id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err("delete", &dir, e)),
        }
    }

    async fn next_clip_index(dir: &Path) -> Result<u32> {
        let max = Self::file_names(dir)
            .await?
            .iter()
            .filter_map(|n| clip_index(n))
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }
}

#[async_trait]
impl ConversationStore for FsConversationStore {
    async fn append_message(&self, conversation_id: &str, speaker: Speaker, text: &str) -> Result<()> {
        self.append_line(conversation_id, format_transcript_line(speaker, text, None))
            .await
    }

    async fn save_audio(&self, conversation_id: &str, audio: &[u8]) -> Result<String> {
        let dir = self.audio_dir(conversation_id)?;
        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_err("create", &dir, e))?;
        let index = Self::next_clip_index(&dir).await?;
        let filename = format!("{index:03}.{AUDIO_EXT}");
        let path = dir.join(&filename);
        let tmp = dir.join(format!("{filename}.tmp"));
        tokio::fs::write(&tmp, audio)
            .await
            .map_err(|e| storage_err("write", &tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(storage_err("rename", &path, e));
        }
        Ok(filename)
    }

    fn audio_path(&self, conversation_id: &str, filename: &str) -> PathBuf {
        self.root.join(conversation_id).join(AUDIO_DIR).join(filename)
    }
}
