//! Completion-length budget invariant types.
//!
//! A reasoning model that runs out of completion tokens is retried with a
//! larger budget. These types bound that growth by construction: the budget
//! never exceeds its ceiling and never doubles more than `max_doublings` times.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenBudgetError {
    #[error("completion token budget must be at least 1")]
    Zero,
    #[error("initial budget ({initial}) exceeds the ceiling ({ceiling})")]
    AboveCeiling { initial: u32, ceiling: u32 },
}

/// Bounds for growing a completion budget after a token-limit failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenGrowth {
    max_doublings: u8,
    ceiling: u32,
}

impl TokenGrowth {
    pub const DEFAULT_MAX_DOUBLINGS: u8 = 3;
    pub const DEFAULT_CEILING: u32 = 32_000;

    #[must_use]
    pub const fn new(max_doublings: u8, ceiling: u32) -> Self {
        Self {
            max_doublings,
            ceiling,
        }
    }

    #[must_use]
    pub const fn max_doublings(self) -> u8 {
        self.max_doublings
    }

    #[must_use]
    pub const fn ceiling(self) -> u32 {
        self.ceiling
    }
}

impl Default for TokenGrowth {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_DOUBLINGS, Self::DEFAULT_CEILING)
    }
}

/// Completion-token limit for one logical call, with its growth history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionTokenBudget {
    current: u32,
    doublings: u8,
    growth: TokenGrowth,
}

impl CompletionTokenBudget {
    pub fn new(initial: u32, growth: TokenGrowth) -> Result<Self, TokenBudgetError> {
        if initial == 0 {
            return Err(TokenBudgetError::Zero);
        }
        if initial > growth.ceiling {
            return Err(TokenBudgetError::AboveCeiling {
                initial,
                ceiling: growth.ceiling,
            });
        }
        Ok(Self {
            current: initial,
            doublings: 0,
            growth,
        })
    }

    /// Like [`CompletionTokenBudget::new`], but clamps into `1..=ceiling`.
    #[must_use]
    pub fn clamped(initial: u32, growth: TokenGrowth) -> Self {
        let ceiling = growth.ceiling.max(1);
        Self {
            current: initial.clamp(1, ceiling),
            doublings: 0,
            growth,
        }
    }

    #[must_use]
    pub const fn current(self) -> u32 {
        self.current
    }

    #[must_use]
    pub const fn doublings(self) -> u8 {
        self.doublings
    }

    /// Double the budget. Returns `None` once the doubling count or the
    /// ceiling is exhausted.
    #[must_use]
    pub fn grow(self) -> Option<Self> {
        if self.doublings >= self.growth.max_doublings || self.current >= self.growth.ceiling {
            return None;
        }
        Some(Self {
            current: self.current.saturating_mul(2).min(self.growth.ceiling),
            doublings: self.doublings + 1,
            growth: self.growth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{CompletionTokenBudget, TokenBudgetError, TokenGrowth};

    #[test]
    fn grows_at_most_max_doublings() {
        let mut budget = CompletionTokenBudget::new(500, TokenGrowth::default()).unwrap();
        let mut seen = vec![budget.current()];
        while let Some(next) = budget.grow() {
            budget = next;
            seen.push(budget.current());
        }
        assert_eq!(seen, vec![500, 1000, 2000, 4000]);
        assert_eq!(budget.doublings(), 3);
    }

    #[test]
    fn growth_stops_at_ceiling() {
        let growth = TokenGrowth::new(10, 3000);
        let budget = CompletionTokenBudget::new(1000, growth).unwrap();
        let budget = budget.grow().unwrap();
        assert_eq!(budget.current(), 2000);
        let budget = budget.grow().unwrap();
        assert_eq!(budget.current(), 3000);
        assert!(budget.grow().is_none());
    }

    #[test]
    fn rejects_invalid_initial() {
        let growth = TokenGrowth::new(3, 100);
        assert_eq!(
            CompletionTokenBudget::new(0, growth),
            Err(TokenBudgetError::Zero)
        );
        assert!(matches!(
            CompletionTokenBudget::new(200, growth),
            Err(TokenBudgetError::AboveCeiling { .. })
        ));
        assert_eq!(CompletionTokenBudget::clamped(200, growth).current(), 100);
        assert_eq!(CompletionTokenBudget::clamped(0, growth).current(), 1);
    }
}
