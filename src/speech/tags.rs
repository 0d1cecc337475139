//! Incremental `<speech>…</speech>` extraction over streamed model output.
//!
//! The model interleaves plain text with spans meant to be voiced:
//!
//! ```text
//! Hi there<speech>Welcome to the show</speech>!
//! ```
//!
//! Every character except the tags themselves is visible transcript text.
//! Span contents are additionally emitted as speech blocks once the closing
//! tag arrives. Deltas can split a tag anywhere, so the extractor holds back
//! the shortest suffix that might still become the tag it is looking for.
//!
//! A `<speech>` seen while already inside a span is literal content; only
//! `</speech>` ends a span.

/// Opening tag of a voiced span.
pub const OPEN_TAG: &str = "<speech>";
/// Closing tag of a voiced span.
pub const CLOSE_TAG: &str = "</speech>";

/// Carry-over state between deltas of one turn.
///
/// `raw_carry` never holds a complete tag: any complete tag is consumed as
/// soon as it is seen. It holds at most `tag.len() - 1` bytes, all of which
/// form a prefix of the tag currently searched for.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParserState {
    /// Unscanned tail that may be the start of a tag.
    pub raw_carry: String,
    /// Whether a `<speech>` has been opened and not yet closed.
    pub in_speech: bool,
    /// Content of the open span so far.
    pub speech_carry: String,
}

/// Output of one extractor step.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Transcript text released by this step, in stream order.
    pub visible: String,
    /// Completed, trimmed, non-empty speech blocks.
    pub blocks: Vec<String>,
}

impl Extraction {
    /// Whether this step released nothing.
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty() && self.blocks.is_empty()
    }
}

/// Length of the longest suffix of `buf` that is a proper prefix of `tag`.
fn partial_tag_len(buf: &str, tag: &str) -> usize {
    let max = tag.len().saturating_sub(1).min(buf.len());
    (1..=max)
        .rev()
        .find(|&k| buf.ends_with(&tag[..k]))
        .unwrap_or(0)
}

fn push_block(blocks: &mut Vec<String>, raw: &str) {
    let block = raw.trim();
    if !block.is_empty() {
        blocks.push(block.to_owned());
    }
}

/// Streaming speech-tag extractor. One per turn; [`reset`](Self::reset) between turns.
#[derive(Debug, Default)]
pub struct SpeechTagExtractor {
    state: ParserState,
}

impl SpeechTagExtractor {
    /// Create an extractor with empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current carry-over state.
    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// Discard all carry-over state.
    pub fn reset(&mut self) {
        self.state = ParserState::default();
    }

    /// Feed one delta.
    pub fn consume(&mut self, delta: &str) -> Extraction {
        let mut out = Extraction::default();
        if delta.is_empty() {
            return out;
        }
        let mut buf = std::mem::take(&mut self.state.raw_carry);
        buf.push_str(delta);

        loop {
            let tag = if self.state.in_speech { CLOSE_TAG } else { OPEN_TAG };
            if let Some(pos) = buf.find(tag) {
                self.release(&buf[..pos], &mut out);
                if self.state.in_speech {
                    let content = std::mem::take(&mut self.state.speech_carry);
                    push_block(&mut out.blocks, &content);
                }
                self.state.in_speech = !self.state.in_speech;
                buf.drain(..pos + tag.len());
                continue;
            }

            let keep = partial_tag_len(&buf, tag);
            let emit = buf.len() - keep;
            self.release(&buf[..emit], &mut out);
            buf.drain(..emit);
            break;
        }

        self.state.raw_carry = buf;
        out
    }

    /// Flush at end of stream.
    ///
    /// An unterminated span becomes a final block; a held-back fragment of
    /// `</speech>` is dropped. Outside a span, held-back text is released as
    /// visible text. All state is cleared.
    pub fn finalize(&mut self) -> Extraction {
        let state = std::mem::take(&mut self.state);
        let mut out = Extraction::default();
        if state.in_speech {
            push_block(&mut out.blocks, &state.speech_carry);
        } else {
            out.visible = state.raw_carry;
        }
        out
    }

    fn release(&mut self, text: &str, out: &mut Extraction) {
        if text.is_empty() {
            return;
        }
        out.visible.push_str(text);
        if self.state.in_speech {
            self.state.speech_carry.push_str(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `deltas`, finalize, and return (visible, blocks).
    fn run(deltas: &[&str]) -> (String, Vec<String>) {
        let mut extractor = SpeechTagExtractor::new();
        let mut visible = String::new();
        let mut blocks = Vec::new();
        for delta in deltas {
            let step = extractor.consume(delta);
            visible.push_str(&step.visible);
            blocks.extend(step.blocks);
        }
        let tail = extractor.finalize();
        visible.push_str(&tail.visible);
        blocks.extend(tail.blocks);
        (visible, blocks)
    }

    #[test]
    fn podcast_greeting_scenario() {
        let (visible, blocks) = run(&[
            "Hi",
            " there<speech>",
            "Welcome",
            " to",
            " the",
            " show</speech>",
            "!",
        ]);
        assert_eq!(visible, "Hi thereWelcome to the show!");
        assert_eq!(blocks, vec!["Welcome to the show".to_owned()]);
    }

    #[test]
    fn split_open_tag_matches_single_delta() {
        let split = run(&["<spe", "ech>hello</speech>"]);
        let whole = run(&["<speech>hello</speech>"]);
        assert_eq!(split, whole);
        assert_eq!(split.1, vec!["hello".to_owned()]);
    }

    #[test]
    fn chunking_invariance_over_every_split() {
        let text = "Intro. <speech> First line. </speech>between<speech>Second</speech> outro";
        let expected = run(&[text]);
        assert_eq!(
            expected.1,
            vec!["First line.".to_owned(), "Second".to_owned()]
        );
        for i in 0..=text.len() {
            for j in i..=text.len() {
                let got = run(&[&text[..i], &text[i..j], &text[j..]]);
                assert_eq!(got, expected, "split at {i},{j}");
            }
        }
    }

    #[test]
    fn one_byte_deltas() {
        let text = "a<speech>b c</speech>d";
        let deltas: Vec<String> = text.chars().map(String::from).collect();
        let refs: Vec<&str> = deltas.iter().map(String::as_str).collect();
        assert_eq!(run(&refs), run(&[text]));
    }

    #[test]
    fn blocks_are_trimmed_and_empty_ones_dropped() {
        let (_, blocks) = run(&["<speech>  padded \n</speech><speech>   </speech>"]);
        assert_eq!(blocks, vec!["padded".to_owned()]);
    }

    #[test]
    fn no_tags_means_no_blocks() {
        let (visible, blocks) = run(&["just ", "text"]);
        assert_eq!(visible, "just text");
        assert!(blocks.is_empty());
    }

    #[test]
    fn finalize_mid_span_emits_partial_block_once() {
        let mut extractor = SpeechTagExtractor::new();
        let step = extractor.consume("<speech>never closed");
        assert!(step.blocks.is_empty());
        let tail = extractor.finalize();
        assert_eq!(tail.blocks, vec!["never closed".to_owned()]);
        assert_eq!(extractor.finalize(), Extraction::default());
    }

    #[test]
    fn finalize_drops_partial_closing_tag() {
        let (visible, blocks) = run(&["<speech>almost", " done</spe"]);
        assert_eq!(visible, "almost done");
        assert_eq!(blocks, vec!["almost done".to_owned()]);
    }

    #[test]
    fn finalize_outside_span_releases_held_text() {
        let mut extractor = SpeechTagExtractor::new();
        let step = extractor.consume("price < 5 <spe");
        assert_eq!(step.visible, "price < 5 ");
        assert_eq!(extractor.state().raw_carry, "<spe");
        assert_eq!(extractor.finalize().visible, "<spe");
    }

    #[test]
    fn nested_open_tag_is_literal_content() {
        let (_, blocks) = run(&["<speech>a <speech>b</speech> c"]);
        assert_eq!(blocks, vec!["a <speech>b".to_owned()]);
    }

    #[test]
    fn carry_never_holds_a_complete_tag() {
        let mut extractor = SpeechTagExtractor::new();
        for delta in ["x<", "speech", ">y</", "speech", ">z<sp"] {
            let _ = extractor.consume(delta);
            let carry = &extractor.state().raw_carry;
            assert!(!carry.contains(OPEN_TAG) && !carry.contains(CLOSE_TAG));
            assert!(carry.len() < CLOSE_TAG.len());
        }
    }

    #[test]
    fn multibyte_text_around_tags() {
        let (visible, blocks) = run(&["caf\u{e9} <spe", "ech>na\u{ef}ve</speech> \u{1f3a4}"]);
        assert_eq!(visible, "caf\u{e9} na\u{ef}ve \u{1f3a4}");
        assert_eq!(blocks, vec!["na\u{ef}ve".to_owned()]);
    }

    #[test]
    fn reset_clears_state() {
        let mut extractor = SpeechTagExtractor::new();
        let _ = extractor.consume("<speech>half");
        extractor.reset();
        assert_eq!(extractor.state(), &ParserState::default());
        assert!(extractor.finalize().is_empty());
    }
}
