//! Sentence segmentation over an incremental text stream.
//!
//! [`SentenceSegmenter`] appends arriving fragments to a rolling buffer and
//! splits off a complete sentence as soon as one exists.  The boundary
//! heuristic is deliberately simple: terminal punctuation (`.` `!` `?` `…`)
//! followed by whitespace or the end of the buffer.  Fragments carry no
//! alignment guarantees — a sentence may span many fragments and one
//! fragment may close several sentences.

// ---------------------------------------------------------------------------
// Utterance
// ---------------------------------------------------------------------------

/// One synthesizable unit of output text (typically a sentence).
///
/// Produced exactly once by the segmenter; `sequence` increases by one per
/// utterance within a stream, and playback must preserve this order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Sentence text, trimmed.
    pub text: String,
    /// Zero-based position within the stream.
    pub sequence: u64,
}

// ---------------------------------------------------------------------------
// SentenceSegmenter
// ---------------------------------------------------------------------------

/// Rolling-buffer sentence splitter.
///
/// # Example
///
/// ```rust
/// use voice_loop::output::SentenceSegmenter;
///
/// let mut seg = SentenceSegmenter::new();
/// assert!(seg.push("Hello").is_empty());          // no boundary yet
/// let done = seg.push(" world, how are you?");
/// assert_eq!(done.len(), 1);
/// assert_eq!(done[0].text, "Hello world, how are you?");
/// ```
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
    next_sequence: u64,
}

impl SentenceSegmenter {
    /// Create an empty segmenter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `fragment` and return every sentence completed by it, in text
    /// order.
    pub fn push(&mut self, fragment: &str) -> Vec<Utterance> {
        self.buffer.push_str(fragment);

        let mut completed = Vec::new();
        while let Some(end) = boundary(&self.buffer) {
            let sentence: String = self.buffer.drain(..end).collect();
            // Drop the separator whitespace so the next sentence starts clean.
            let rest_start = self.buffer.len() - self.buffer.trim_start().len();
            self.buffer.drain(..rest_start);
            if let Some(utterance) = self.emit(&sentence) {
                completed.push(utterance);
            }
        }
        completed
    }

    /// Take whatever remains in the buffer as a final utterance, if any.
    pub fn flush(&mut self) -> Option<Utterance> {
        let rest = std::mem::take(&mut self.buffer);
        self.emit(&rest)
    }

    /// Text currently waiting for a boundary.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn emit(&mut self, raw: &str) -> Option<Utterance> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }
        let utterance = Utterance {
            text: text.to_string(),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        Some(utterance)
    }
}

/// Byte offset just past the first sentence boundary, if the buffer holds a
/// complete sentence.
///
/// A boundary is terminal punctuation followed by whitespace or the end of
/// the buffer.  `"3."` at the buffer end therefore splits — streaming cannot
/// wait to find out whether `"14"` follows; the heuristic favours latency
/// over decimal numbers.
fn boundary(buffer: &str) -> Option<usize> {
    let mut chars = buffer.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if is_terminal(c) {
            match chars.peek() {
                None => return Some(i + c.len_utf8()),
                Some(&(_, next)) if next.is_whitespace() => return Some(i + c.len_utf8()),
                Some(_) => {}
            }
        }
    }
    None
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(utterances: &[Utterance]) -> Vec<&str> {
        utterances.iter().map(|u| u.text.as_str()).collect()
    }

    #[test]
    fn complete_sentence_splits_immediately() {
        let mut seg = SentenceSegmenter::new();
        let done = seg.push("Hello there.");
        assert_eq!(texts(&done), vec!["Hello there."]);
        assert_eq!(seg.pending(), "");
    }

    #[test]
    fn boundary_can_arrive_across_fragments() {
        let mut seg = SentenceSegmenter::new();
        assert!(seg.push("Hello").is_empty());
        let done = seg.push(" world, how are you?");
        assert_eq!(texts(&done), vec!["Hello world, how are you?"]);
    }

    #[test]
    fn one_fragment_can_close_several_sentences() {
        let mut seg = SentenceSegmenter::new();
        let done = seg.push("One. Two! Three? And the rest");
        assert_eq!(texts(&done), vec!["One.", "Two!", "Three?"]);
        assert_eq!(seg.pending(), "And the rest");
    }

    #[test]
    fn k_boundaries_produce_k_utterances_in_order() {
        let mut seg = SentenceSegmenter::new();
        let mut all = Vec::new();
        for fragment in ["First sen", "tence. Second", " one! Third ", "here? tail"] {
            all.extend(seg.push(fragment));
        }
        assert_eq!(
            texts(&all),
            vec!["First sentence.", "Second one!", "Third here?"]
        );
        let sequences: Vec<u64> = all.iter().map(|u| u.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn flush_returns_non_empty_remainder() {
        let mut seg = SentenceSegmenter::new();
        seg.push("Done. And a trailing bit");
        let rest = seg.flush().unwrap();
        assert_eq!(rest.text, "And a trailing bit");
        assert_eq!(rest.sequence, 1);
    }

    #[test]
    fn flush_empty_remainder_is_none() {
        let mut seg = SentenceSegmenter::new();
        seg.push("Hello there.");
        assert!(seg.flush().is_none());
    }

    #[test]
    fn flush_whitespace_only_remainder_is_none() {
        let mut seg = SentenceSegmenter::new();
        seg.push("Hello there.   ");
        assert!(seg.flush().is_none());
    }

    #[test]
    fn punctuation_run_stays_in_one_sentence() {
        let mut seg = SentenceSegmenter::new();
        let done = seg.push("Really?! Yes.");
        assert_eq!(texts(&done), vec!["Really?!", "Yes."]);
    }

    #[test]
    fn ellipsis_is_a_terminal() {
        let mut seg = SentenceSegmenter::new();
        let done = seg.push("Well… maybe.");
        assert_eq!(texts(&done), vec!["Well…", "maybe."]);
    }

    #[test]
    fn terminal_at_buffer_end_splits_without_waiting() {
        let mut seg = SentenceSegmenter::new();
        let done = seg.push("Pi is 3.");
        // Favouring latency: the split happens now, even though "14" could
        // still arrive in the next fragment.
        assert_eq!(texts(&done), vec!["Pi is 3."]);
    }

    #[test]
    fn mid_token_punctuation_does_not_split() {
        let mut seg = SentenceSegmenter::new();
        let done = seg.push("Version 1.2 is out");
        assert!(done.is_empty());
        assert_eq!(seg.pending(), "Version 1.2 is out");
    }

    #[test]
    fn empty_and_whitespace_fragments_are_harmless() {
        let mut seg = SentenceSegmenter::new();
        assert!(seg.push("").is_empty());
        assert!(seg.push("   ").is_empty());
        let done = seg.push("Fine.");
        assert_eq!(texts(&done), vec!["Fine."]);
    }

    #[test]
    fn sequences_keep_increasing_across_flush_boundaries() {
        let mut seg = SentenceSegmenter::new();
        let a = seg.push("One. Two.");
        assert_eq!(a.last().unwrap().sequence, 1);
        seg.push("tail");
        let rest = seg.flush().unwrap();
        assert_eq!(rest.sequence, 2);
    }
}
