//! Byte-level reference tokenizer.
//!
//! Every byte maps to its own token, shifted past the special tokens, so
//! any text round-trips exactly.

use hub_engine::TokenId;

pub const TOKEN_BOS: TokenId = 1;
pub const TOKEN_EOS: TokenId = 2;
const BYTE_OFFSET: TokenId = 3;
pub const VOCAB_SIZE: usize = 256 + BYTE_OFFSET as usize;

pub fn byte_token(byte: u8) -> TokenId {
    byte as TokenId + BYTE_OFFSET
}

pub fn token_nl() -> TokenId {
    byte_token(b'\n')
}

pub fn encode(text: &str, add_bos: bool) -> Vec<TokenId> {
    let mut tokens = Vec::with_capacity(text.len() + 1);
    if add_bos {
        tokens.push(TOKEN_BOS);
    }
    tokens.extend(text.bytes().map(byte_token));
    tokens
}

/// Bytes of a single token; special and unknown tokens decode to nothing.
pub fn piece(token: TokenId) -> Vec<u8> {
    match u8::try_from(token - BYTE_OFFSET) {
        Ok(byte) if token >= BYTE_OFFSET => vec![byte],
        _ => Vec::new(),
    }
}

pub fn decode(tokens: &[TokenId]) -> String {
    let bytes: Vec<u8> = tokens.iter().flat_map(|&t| piece(t)).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
