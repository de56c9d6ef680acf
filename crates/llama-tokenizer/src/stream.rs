//! Streaming decoding of token pieces.

/// Streaming decoding state for handling partial UTF-8 sequences.
///
/// Token pieces are raw bytes and a multi-byte character may be split across
/// tokens. [`DecodingState::push`] returns only complete characters and keeps
/// an incomplete tail for the next call. Invalid sequences become U+FFFD.
#[derive(Debug, Clone, Default)]
pub struct DecodingState {
    pending_utf8: Vec<u8>,
}

impl DecodingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one piece; returns the text that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending_utf8.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending_utf8) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending_utf8.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending_utf8[..valid]).unwrap_or_default());
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending_utf8.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            self.pending_utf8.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is still pending, replacing an incomplete tail with U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending_utf8.is_empty() {
            return String::new();
        }
        let out = String::from_utf8_lossy(&self.pending_utf8).into_owned();
        self.pending_utf8.clear();
        out
    }

    /// Bytes waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending_utf8.len()
    }

    pub fn clear(&mut self) {
        self.pending_utf8.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        let mut state = DecodingState::new();
        assert_eq!(state.push(b"hello"), "hello");
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn split_character_is_held_back() {
        let bytes = "é".as_bytes();
        let mut state = DecodingState::new();
        assert_eq!(state.push(&bytes[..1]), "");
        assert_eq!(state.pending_len(), 1);
        assert_eq!(state.push(&bytes[1..]), "é");
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn invalid_byte_is_replaced() {
        let mut state = DecodingState::new();
        assert_eq!(state.push(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn finish_flushes_incomplete_tail() {
        let mut state = DecodingState::new();
        assert_eq!(state.push(&"€".as_bytes()[..2]), "");
        assert_eq!(state.finish(), "\u{FFFD}");
        assert_eq!(state.finish(), "");
    }

    #[test]
    fn clear_drops_pending() {
        let mut state = DecodingState::new();
        state.push(&"€".as_bytes()[..1]);
        state.clear();
        assert_eq!(state.pending_len(), 0);
        assert_eq!(state.push(b"x"), "x");
    }
}
