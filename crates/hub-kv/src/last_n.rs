use std::collections::VecDeque;

use hub_engine::TokenId;

/// Fixed-capacity ring of the most recent tokens.
///
/// Starts zero-filled at full capacity, so `len() == capacity()` always
/// holds once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastNTokens {
    buf: VecDeque<TokenId>,
    capacity: usize,
}

impl LastNTokens {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: std::iter::repeat(0).take(capacity).collect(),
            capacity,
        }
    }

    /// Append a token, evicting the oldest when full.
    pub fn push(&mut self, token: TokenId) {
        if self.capacity == 0 {
            return;
        }
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(token);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<TokenId> {
        self.buf.back().copied()
    }

    /// Tokens in `[start, end)`, oldest first. Out-of-range bounds are clamped.
    pub fn range(&self, start: usize, end: usize) -> Vec<TokenId> {
        let end = end.min(self.buf.len());
        let start = start.min(end);
        self.buf.range(start..end).copied().collect()
    }

    /// The newest `n` tokens, oldest first.
    pub fn tail(&self, n: usize) -> Vec<TokenId> {
        let len = self.buf.len();
        self.range(len.saturating_sub(n), len)
    }

    pub fn as_slice(&mut self) -> &[TokenId] {
        self.buf.make_contiguous()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenId> {
        self.buf.iter()
    }
}
