//! Clean a speech block before it reaches the voice model.

fn is_sentence_punct(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | ',' | ':' | ';')
}

/// Remove anything between `<` and `>`, including the brackets.
///
/// An unclosed `<` hides the rest of the text.
pub fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Insert a space after sentence punctuation that runs into the next word.
///
/// Runs of punctuation (`?!`, `...`) stay together.
pub fn ensure_sentence_spacing(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if is_sentence_punct(c)
            && let Some(&next) = chars.peek()
            && !next.is_whitespace()
            && !is_sentence_punct(next)
        {
            out.push(' ');
        }
    }
    out
}

/// Normalize text for synthesis: strip markup, fix punctuation spacing,
/// collapse whitespace runs to single spaces and trim.
///
/// # Examples
///
/// ```
/// use vibecast::speech::normalize::normalize_for_speech;
///
/// assert_eq!(
///     normalize_for_speech("<b>Hello</b>,world.\n\n  Bye!"),
///     "Hello, world. Bye!"
/// );
/// ```
pub fn normalize_for_speech(text: &str) -> String {
    let spaced = ensure_sentence_spacing(&strip_markup(text));
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}
