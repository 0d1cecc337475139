//! From tagged model output to synthesized audio.
//!
//! - [`tags`] pulls `<speech>` blocks out of streamed text
//! - [`normalize`] cleans a block for the voice model
//! - [`synth`] calls the speech endpoint
//! - [`dispatch`] runs synthesis jobs one at a time, in order

pub mod dispatch;
pub mod normalize;
pub mod synth;
pub mod tags;

pub use dispatch::{ClipSink, SynthesisDispatcher};
pub use synth::{SpeechClient, SpeechPreparer, SpeechSynthesizer, SynthesisJob};
pub use tags::{Extraction, ParserState, SpeechTagExtractor};
