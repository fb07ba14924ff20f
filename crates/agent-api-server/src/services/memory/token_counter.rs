/// Fixed per-turn token estimate.
///
/// No tokenizer is involved: every turn costs `tokens_per_turn`, and the budget is
/// expressed in the same unit, so the policy effectively caps the number of recent turns.
#[derive(Debug, Clone, Copy)]
pub struct TokenCounter {
    tokens_per_turn: usize,
}

impl TokenCounter {
    pub fn new(tokens_per_turn: usize) -> Self {
        Self { tokens_per_turn }
    }

    pub fn tokens_per_turn(&self) -> usize {
        self.tokens_per_turn
    }

    pub fn estimate(&self, turn_count: usize) -> usize {
        turn_count.saturating_mul(self.tokens_per_turn)
    }

    pub fn exceeds(&self, turn_count: usize, budget: usize) -> bool {
        self.estimate(turn_count) > budget
    }

    /// How many turns fit in `budget`.
    pub fn capacity(&self, budget: usize) -> usize {
        if self.tokens_per_turn == 0 {
            return usize::MAX;
        }
        budget / self.tokens_per_turn
    }
}
