//! Centralized application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | App data | `~/Library/Application Support/vibecast/` | `~/.local/share/vibecast/` |
//! | Config | `~/Library/Application Support/vibecast/` | `~/.config/vibecast/` |
//!
//! # Environment Overrides
//!
//! - `VIBECAST_DATA_DIR` overrides [`data_dir`]
//! - `VIBECAST_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds conversations (transcripts and synthesized clips) and logs.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("VIBECAST_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("vibecast"))
        .unwrap_or_else(|| PathBuf::from("/tmp/vibecast-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("VIBECAST_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("vibecast"))
        .unwrap_or_else(|| PathBuf::from("/tmp/vibecast-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Conversations root (`data_dir()/conversations/`).
#[must_use]
pub fn conversations_dir() -> PathBuf {
    data_dir().join("conversations")
}

/// Prompt template overrides (`config_dir()/prompts/`).
#[must_use]
pub fn prompts_dir() -> PathBuf {
    config_dir().join("prompts")
}
