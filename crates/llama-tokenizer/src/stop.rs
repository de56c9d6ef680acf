//! Stop-sequence detection over streamed text.

/// Outcome of feeding text to a [`StopMatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopScan {
    /// No stop sequence yet. The text is safe to emit (may be empty when
    /// everything was held back).
    Continue(String),
    /// A stop sequence matched. The text is what preceded it and should be
    /// emitted before stopping; the stop sequence itself is swallowed.
    Matched(String),
}

/// Detects stop sequences across fragment boundaries.
///
/// Text that could still turn into a stop sequence is held back until it
/// either completes the match or diverges.
#[derive(Debug, Clone, Default)]
pub struct StopMatcher {
    stops: Vec<String>,
    held: String,
}

impl StopMatcher {
    /// Empty strings are ignored.
    pub fn new<I, S>(stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stops: stops
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
            held: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn push(&mut self, text: &str) -> StopScan {
        if self.stops.is_empty() {
            return StopScan::Continue(text.to_string());
        }

        self.held.push_str(text);

        let earliest = self
            .stops
            .iter()
            .filter_map(|stop| self.held.find(stop.as_str()))
            .min();
        if let Some(at) = earliest {
            let before = self.held[..at].to_string();
            self.held.clear();
            return StopScan::Matched(before);
        }

        let split = self.held.len() - self.partial_suffix_len();
        let ready = self.held[..split].to_string();
        self.held.drain(..split);
        StopScan::Continue(ready)
    }

    /// Release held-back text once the stream ends without a match.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.held)
    }

    /// Length of the longest suffix of `held` that is a proper prefix of a stop.
    fn partial_suffix_len(&self) -> usize {
        for (start, _) in self.held.char_indices() {
            let suffix = &self.held[start..];
            if self
                .stops
                .iter()
                .any(|stop| stop.len() > suffix.len() && stop.starts_with(suffix))
            {
                return suffix.len();
            }
        }
        0
    }
}
