//! Tokenizer for text encoding and decoding
//!
//! The demo runtime uses a byte-level tokenizer: every UTF-8 byte is one
//! token id, plus a single end-of-text marker. Encoding is total and
//! decoding reverses it exactly, which keeps the server surface honest
//! without shipping a vocabulary file.

/// End-of-text token id
pub const EOT_TOKEN: u32 = 256;

/// Byte-level tokenizer
#[derive(Debug, Clone, Default)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    /// Create a tokenizer
    pub fn new() -> Self {
        Self
    }

    /// Encode text as one token per UTF-8 byte
    pub fn encode(&self, text: &str) -> Vec<u32> {
        text.bytes().map(u32::from).collect()
    }

    /// Decode token ids back to text
    ///
    /// Ids outside the byte range (the end-of-text marker) are skipped;
    /// invalid UTF-8 sequences decode lossily.
    pub fn decode(&self, tokens: &[u32]) -> String {
        let bytes: Vec<u8> = tokens
            .iter()
            .filter(|&&t| t < 256)
            .map(|&t| t as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Vocabulary size including the end-of-text marker
    pub fn vocab_size(&self) -> usize {
        257
    }

    /// End-of-text token id
    pub fn eot_token(&self) -> u32 {
        EOT_TOKEN
    }
}
