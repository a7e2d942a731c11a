//! Candidate token arrays and the filters that narrow them.
//!
//! Every filter keeps at least `min_keep` tokens. Filters that need
//! probabilities call [`Candidates::softmax`] first, which also sorts the
//! array by descending logit.

use hub_engine::TokenId;

/// One vocabulary entry under consideration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenData {
    pub id: TokenId,
    pub logit: f32,
    pub p: f32,
}

/// The candidate set for one sampling step.
#[derive(Debug, Clone)]
pub struct Candidates {
    data: Vec<TokenData>,
    sorted: bool,
}

impl Candidates {
    /// One candidate per logit, in token id order.
    pub fn from_logits(logits: &[f32]) -> Self {
        let data = logits
            .iter()
            .enumerate()
            .map(|(id, &logit)| TokenData {
                id: id as TokenId,
                logit,
                p: 0.0,
            })
            .collect();
        Self {
            data,
            sorted: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[TokenData] {
        &self.data
    }

    pub fn ids(&self) -> Vec<TokenId> {
        self.data.iter().map(|t| t.id).collect()
    }

    pub fn get(&self, id: TokenId) -> Option<&TokenData> {
        self.data.iter().find(|t| t.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: TokenId) -> Option<&mut TokenData> {
        self.data.iter_mut().find(|t| t.id == id)
    }

    /// Highest-logit token; ties resolve to the earliest entry.
    pub fn argmax(&self) -> Option<TokenId> {
        let mut best: Option<&TokenData> = None;
        for token in &self.data {
            match best {
                Some(b) if token.logit <= b.logit => {}
                _ => best = Some(token),
            }
        }
        best.map(|t| t.id)
    }

    fn sort_desc(&mut self) {
        if !self.sorted {
            self.data.sort_by(|a, b| {
                b.logit
                    .partial_cmp(&a.logit)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            self.sorted = true;
        }
    }

    /// Sort by logit and fill in normalized probabilities.
    pub fn softmax(&mut self) {
        if self.data.is_empty() {
            return;
        }
        self.sort_desc();
        let max_logit = self.data[0].logit;
        let mut sum = 0.0;
        for token in &mut self.data {
            token.p = (token.logit - max_logit).exp();
            sum += token.p;
        }
        if sum > 0.0 && sum.is_finite() {
            for token in &mut self.data {
                token.p /= sum;
            }
        } else {
            let uniform = 1.0 / self.data.len() as f32;
            for token in &mut self.data {
                token.p = uniform;
            }
        }
    }

    /// Keep the `k` most likely tokens. `k <= 0` keeps everything.
    pub fn top_k(&mut self, k: i32, min_keep: usize) {
        let n = self.data.len();
        let k = usize::try_from(k).ok().filter(|&k| k > 0).unwrap_or(n);
        let k = k.max(min_keep).min(n);
        self.sort_desc();
        self.data.truncate(k);
    }

    /// Tail-free sampling: cut where the curvature of the sorted
    /// probability curve has accumulated `z` of its mass.
    pub fn tail_free(&mut self, z: f32, min_keep: usize) {
        if z >= 1.0 || self.data.len() <= 2 {
            return;
        }
        self.softmax();

        let first: Vec<f32> = self.data.windows(2).map(|w| w[0].p - w[1].p).collect();
        let mut second: Vec<f32> = first.windows(2).map(|w| (w[0] - w[1]).abs()).collect();
        let total: f32 = second.iter().sum();
        if total <= 0.0 {
            return;
        }
        for d in &mut second {
            *d /= total;
        }

        let mut cum = 0.0;
        let mut last_idx = self.data.len();
        for (i, d) in second.iter().enumerate() {
            cum += d;
            if cum > z && i >= min_keep {
                last_idx = i;
                break;
            }
        }
        self.data.truncate(last_idx.max(min_keep));
    }

    /// Locally typical sampling: keep tokens whose surprise is closest to
    /// the distribution's entropy until `p` of the mass is covered.
    pub fn typical(&mut self, p: f32, min_keep: usize) {
        if p >= 1.0 || self.data.is_empty() {
            return;
        }
        self.softmax();

        let entropy: f32 = self
            .data
            .iter()
            .filter(|t| t.p > 0.0)
            .map(|t| -t.p * t.p.ln())
            .sum();

        let mut order: Vec<(usize, f32)> = self
            .data
            .iter()
            .enumerate()
            .map(|(i, t)| (i, (-t.p.ln() - entropy).abs()))
            .collect();
        order.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut cum = 0.0;
        let mut last_idx = order.len();
        for (i, &(idx, _)) in order.iter().enumerate() {
            cum += self.data[idx].p;
            if cum > p && i + 1 >= min_keep {
                last_idx = i + 1;
                break;
            }
        }

        self.data = order[..last_idx]
            .iter()
            .map(|&(idx, _)| self.data[idx])
            .collect();
        self.sorted = false;
    }

    /// Nucleus sampling: smallest prefix whose cumulative probability reaches `p`.
    pub fn top_p(&mut self, p: f32, min_keep: usize) {
        if p >= 1.0 || self.data.is_empty() {
            return;
        }
        self.softmax();

        let mut cum = 0.0;
        let mut last_idx = self.data.len();
        for (i, token) in self.data.iter().enumerate() {
            cum += token.p;
            if cum >= p && i + 1 >= min_keep {
                last_idx = i + 1;
                break;
            }
        }
        self.data.truncate(last_idx);
    }

    pub fn temperature(&mut self, temp: f32) {
        for token in &mut self.data {
            token.logit /= temp;
        }
    }

    /// Penalize tokens present in `recent`: positive logits are divided by
    /// `penalty`, negative ones multiplied, so both lose probability.
    pub fn repetition_penalty(&mut self, recent: &[TokenId], penalty: f32) {
        if recent.is_empty() || penalty == 1.0 {
            return;
        }
        for token in &mut self.data {
            if recent.contains(&token.id) {
                if token.logit <= 0.0 {
                    token.logit *= penalty;
                } else {
                    token.logit /= penalty;
                }
            }
        }
        self.sorted = false;
    }

    /// Subtract `count * frequency + (count > 0) * presence` from every
    /// token seen in `recent`.
    pub fn frequency_and_presence_penalties(
        &mut self,
        recent: &[TokenId],
        frequency: f32,
        presence: f32,
    ) {
        if recent.is_empty() || (frequency == 0.0 && presence == 0.0) {
            return;
        }
        let mut counts: std::collections::HashMap<TokenId, usize> =
            std::collections::HashMap::new();
        for &id in recent {
            *counts.entry(id).or_default() += 1;
        }
        for token in &mut self.data {
            if let Some(&count) = counts.get(&token.id) {
                token.logit -= count as f32 * frequency + presence;
            }
        }
        self.sorted = false;
    }
}
