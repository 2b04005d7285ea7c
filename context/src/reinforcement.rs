//! Periodic instruction reinforcement.
//!
//! Instruction-following decays as a conversation grows. Every `interval`
//! tokens of growth, the caller re-injects a short reminder block and marks
//! the state. Growth is measured on the manager's appended-token counter, not
//! on the current history total, so compaction neither suppresses nor
//! re-fires the trigger.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReinforcementState {
    tokens_at_last_reinforcement: u64,
    interval: u32,
}

impl ReinforcementState {
    pub const DEFAULT_INTERVAL: u32 = 3000;

    /// `interval == 0` disables reinforcement.
    #[must_use]
    pub const fn new(interval: u32) -> Self {
        Self {
            tokens_at_last_reinforcement: 0,
            interval,
        }
    }

    #[must_use]
    pub const fn interval(&self) -> u32 {
        self.interval
    }

    #[must_use]
    pub const fn tokens_at_last_reinforcement(&self) -> u64 {
        self.tokens_at_last_reinforcement
    }

    #[must_use]
    pub fn needs(&self, current_tokens: u64) -> bool {
        self.interval > 0
            && current_tokens.saturating_sub(self.tokens_at_last_reinforcement)
                >= u64::from(self.interval)
    }

    pub fn mark(&mut self, current_tokens: u64) {
        self.tokens_at_last_reinforcement = current_tokens;
    }

    pub fn reset(&mut self) {
        self.tokens_at_last_reinforcement = 0;
    }
}

impl Default for ReinforcementState {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::ReinforcementState;

    #[test]
    fn fires_once_per_interval() {
        let mut state = ReinforcementState::new(100);
        let mut fired = Vec::new();
        let mut tokens = 0_u64;
        for _ in 0..50 {
            tokens += 9;
            if state.needs(tokens) {
                fired.push(tokens);
                state.mark(tokens);
            }
        }
        // 450 tokens of growth in steps of 9: fires at 108, 216, 324, 432.
        assert_eq!(fired, vec![108, 216, 324, 432]);
    }

    #[test]
    fn no_double_fire_after_mark() {
        let mut state = ReinforcementState::new(50);
        assert!(state.needs(60));
        state.mark(60);
        assert!(!state.needs(60));
        assert!(!state.needs(109));
        assert!(state.needs(110));
    }

    #[test]
    fn zero_interval_disables() {
        let state = ReinforcementState::new(0);
        assert!(!state.needs(u64::MAX));
    }
}
