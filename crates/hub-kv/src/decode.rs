/// Streaming UTF-8 assembly for per-token detokenization.
///
/// Tokens may split a multi-byte character; the trailing partial sequence
/// is held back until the bytes completing it arrive.
#[derive(Debug, Clone, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the bytes of one token, returning whatever text is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // invalid sequence: replace it and keep going
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        // incomplete sequence: wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Emit any held-back bytes lossily and reset.
    pub fn flush(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.push(b"hi"), "hi");
        assert!(!d.has_pending());
    }

    #[test]
    fn split_multibyte_is_held() {
        let bytes = "é".as_bytes();
        let mut d = Utf8Decoder::new();
        assert_eq!(d.push(&bytes[..1]), "");
        assert!(d.has_pending());
        assert_eq!(d.push(&bytes[1..]), "é");
    }

    #[test]
    fn invalid_bytes_replaced() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.push(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn flush_emits_partial() {
        let mut d = Utf8Decoder::new();
        d.push(&"€".as_bytes()[..2]);
        assert_eq!(d.flush(), "\u{FFFD}");
        assert!(!d.has_pending());
    }
}
