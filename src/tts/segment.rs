//! Sentence segmentation for incremental synthesis
//!
//! Reply text arrives as arbitrary chunks; the segmenter buffers them and
//! emits complete sentences as numbered synthesis units. Units without
//! enough speakable content (punctuation-only, emoji-only) are rejected
//! before they are numbered, so accepted units are always contiguous.

/// Sentence boundaries, full-width and half-width
const DELIMITERS: &[char] = &['。', '．', '！', '？', '.', '!', '?', '\n'];

/// A numbered span of reply text awaiting synthesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisUnit {
    /// Zero-based dispatch order, contiguous across accepted units
    pub seq: u32,
    /// Sentence text, trimmed
    pub text: String,
}

/// Splits streamed text into speakable sentence units
#[derive(Debug)]
pub struct SentenceSegmenter {
    buffer: String,
    next_seq: u32,
    min_chars: usize,
}

impl SentenceSegmenter {
    /// Create a segmenter; `min_chars` is the minimum count of
    /// alphanumeric/ideographic characters for a unit to be speakable.
    #[must_use]
    pub const fn new(min_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            next_seq: 0,
            min_chars,
        }
    }

    /// Append a chunk of reply text and return any completed units.
    pub fn push(&mut self, chunk: &str) -> Vec<SynthesisUnit> {
        self.buffer.push_str(chunk);
        let mut units = Vec::new();
        while let Some(end) = self
            .buffer
            .char_indices()
            .find(|(_, c)| DELIMITERS.contains(c))
            .map(|(i, c)| i + c.len_utf8())
        {
            let sentence: String = self.buffer.drain(..end).collect();
            if let Some(unit) = self.accept(&sentence) {
                units.push(unit);
            }
        }
        units
    }

    /// Flush the remainder at end of stream, if it is speakable.
    pub fn finish(&mut self) -> Option<SynthesisUnit> {
        let remainder = std::mem::take(&mut self.buffer);
        self.accept(&remainder)
    }

    /// Units accepted so far.
    #[must_use]
    pub const fn accepted(&self) -> u32 {
        self.next_seq
    }

    fn accept(&mut self, sentence: &str) -> Option<SynthesisUnit> {
        let text = sentence.trim();
        if !is_speakable(text, self.min_chars) {
            return None;
        }
        let unit = SynthesisUnit {
            seq: self.next_seq,
            text: text.to_owned(),
        };
        self.next_seq += 1;
        Some(unit)
    }
}

/// Whether text has enough pronounceable content to be worth a synthesis
/// round trip. `char::is_alphanumeric` covers CJK ideographs; punctuation
/// and emoji do not count.
#[must_use]
pub fn is_speakable(text: &str, min_chars: usize) -> bool {
    text.chars().filter(|c| c.is_alphanumeric()).count() >= min_chars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_full_width_delimiters() {
        let mut seg = SentenceSegmenter::new(2);
        let units = seg.push("你好。今天天气不错！");
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], SynthesisUnit { seq: 0, text: "你好。".into() });
        assert_eq!(units[1], SynthesisUnit { seq: 1, text: "今天天气不错！".into() });
        assert!(seg.finish().is_none());
    }

    #[test]
    fn buffers_across_pushes() {
        let mut seg = SentenceSegmenter::new(2);
        assert!(seg.push("hello wor").is_empty());
        let units = seg.push("ld. next");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "hello world.");
        let tail = seg.finish().unwrap();
        assert_eq!(tail.seq, 1);
        assert_eq!(tail.text, "next");
    }

    #[test]
    fn emoji_only_sentence_is_rejected() {
        let mut seg = SentenceSegmenter::new(2);
        assert!(seg.push("😊!").is_empty());
        assert!(seg.finish().is_none());
        assert_eq!(seg.accepted(), 0);
    }

    #[test]
    fn two_letter_word_is_kept() {
        let mut seg = SentenceSegmenter::new(2);
        let unit = seg.push("ok.").remove(0);
        assert_eq!(unit.text, "ok.");
    }

    #[test]
    fn rejected_units_do_not_consume_sequence_numbers() {
        let mut seg = SentenceSegmenter::new(2);
        let mut units = seg.push("first one. ... second one.");
        assert_eq!(units.len(), 2);
        let second = units.pop().unwrap();
        assert_eq!(second.seq, 1);
        assert_eq!(second.text, "second one.");
    }

    #[test]
    fn newline_ends_a_sentence() {
        let mut seg = SentenceSegmenter::new(2);
        let units = seg.push("line one\nline two\n");
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].text, "line one");
    }
}
