//! Sentence segmentation of streamed reply text.

/// Accumulates reply fragments and cuts them into speakable sentences at
/// terminal punctuation.
#[derive(Debug, Clone)]
pub struct Segmenter {
    boundaries: Vec<char>,
    max_pending_chars: usize,
    pending: String,
}

impl Segmenter {
    /// `max_pending_chars` of zero disables the forced flush.
    pub fn new(boundaries: impl IntoIterator<Item = char>, max_pending_chars: usize) -> Self {
        Self {
            boundaries: boundaries.into_iter().collect(),
            max_pending_chars,
            pending: String::new(),
        }
    }

    fn is_boundary(&self, c: char) -> bool {
        self.boundaries.contains(&c)
    }

    /// Append `fragment` and return the sentences it completes.
    ///
    /// Everything up to and including the last boundary character is
    /// emitted as one sentence; the text after it stays pending. Pending
    /// text that grows past the cap without a boundary is emitted whole.
    pub fn feed(&mut self, fragment: &str) -> Vec<String> {
        self.pending.push_str(fragment);

        let mut sentences = Vec::new();
        if let Some((idx, c)) = self
            .pending
            .char_indices()
            .rev()
            .find(|&(_, c)| self.is_boundary(c))
        {
            let rest = self.pending.split_off(idx + c.len_utf8());
            sentences.push(std::mem::replace(&mut self.pending, rest));
        }

        if self.max_pending_chars > 0 && self.pending.chars().count() > self.max_pending_chars {
            sentences.push(std::mem::take(&mut self.pending));
        }
        sentences
    }

    /// Take whatever is still pending.
    pub fn flush(&mut self) -> Option<String> {
        (!self.pending.is_empty()).then(|| std::mem::take(&mut self.pending))
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }
}
