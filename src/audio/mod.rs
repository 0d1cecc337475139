//! Audio playback of synthesized clips.

pub mod playback;

pub use playback::{ClipPlayer, CommandPlayer, NullPlayer, PlaybackQueue, player_from_config};
