//! Windowing of an over-budget history.
//!
//! The newest `recent_window` turns are kept verbatim. Earlier turns survive
//! only if a [`PreservationRule`] flags them; every run of consecutive
//! non-preserved earlier turns collapses into one placeholder turn. If that is
//! still over budget, the fallback order is:
//!
//! 1. demote preserved earlier turns to placeholders, oldest first;
//! 2. drop the placeholders;
//! 3. drop the oldest recent turns, always keeping the newest one.

use persona_types::{ConversationTurn, Role};

use crate::history::HistoryEntry;
use crate::markers::{MarkerSet, word_count};
use crate::token_counter::TokenCounter;

/// Flags an earlier turn as worth keeping verbatim.
#[derive(Debug, Clone)]
pub enum PreservationRule {
    /// Contains one of the marker phrases.
    ContainsMarker(MarkerSet),
    /// Has fewer than this many words.
    BelowWordCount(usize),
}

impl PreservationRule {
    #[must_use]
    pub fn matches(&self, turn: &ConversationTurn) -> bool {
        match self {
            PreservationRule::ContainsMarker(markers) => markers.contains(turn.content()),
            PreservationRule::BelowWordCount(limit) => word_count(turn.content()) < *limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressionPolicy {
    recent_window: usize,
    rules: Vec<PreservationRule>,
    placeholder: String,
    placeholder_tokens: u32,
}

impl CompressionPolicy {
    pub const DEFAULT_PLACEHOLDER: &'static str = "[earlier messages omitted]";

    /// `recent_window` is clamped to at least 1 so the newest turn is always kept.
    #[must_use]
    pub fn new(
        recent_window: usize,
        rules: Vec<PreservationRule>,
        placeholder: impl Into<String>,
        counter: &TokenCounter,
    ) -> Self {
        let placeholder = placeholder.into();
        let placeholder_tokens = counter.count_turn(Role::User, &placeholder);
        Self {
            recent_window: recent_window.max(1),
            rules,
            placeholder,
            placeholder_tokens,
        }
    }

    #[must_use]
    pub fn recent_window(&self) -> usize {
        self.recent_window
    }

    #[must_use]
    pub fn placeholder_tokens(&self) -> u32 {
        self.placeholder_tokens
    }

    /// Placeholders never count as preserved.
    #[must_use]
    pub fn preserves(&self, turn: &ConversationTurn) -> bool {
        !turn.is_placeholder() && self.rules.iter().any(|rule| rule.matches(turn))
    }

    /// Plan a compaction of `entries` to fit `budget`. `None` when they already fit.
    #[must_use]
    pub fn plan(&self, entries: &[HistoryEntry], budget: u32) -> Option<Compaction> {
        let total = sum_tokens(entries);
        if total <= budget {
            return None;
        }

        let split = entries.len().saturating_sub(self.recent_window);
        let (earlier, recent) = entries.split_at(split);
        let recent_tokens = sum_tokens(recent);

        let mut keep: Vec<bool> = earlier
            .iter()
            .map(|entry| self.preserves(entry.turn()))
            .collect();
        let front = self.collapse(earlier, &keep);
        if sum_tokens(&front).saturating_add(recent_tokens) <= budget {
            return Some(Compaction {
                front,
                keep_from: split,
                over_budget: false,
            });
        }

        for index in 0..keep.len() {
            if !keep[index] {
                continue;
            }
            keep[index] = false;
            let front = self.collapse(earlier, &keep);
            if sum_tokens(&front).saturating_add(recent_tokens) <= budget {
                tracing::debug!(demoted_through = index, "Demoted preserved turns");
                return Some(Compaction {
                    front,
                    keep_from: split,
                    over_budget: false,
                });
            }
        }

        // Nothing earlier survives; trim the recent window from the front.
        let mut keep_from = split.min(entries.len().saturating_sub(1));
        let mut tokens = sum_tokens(&entries[keep_from..]);
        while tokens > budget && keep_from + 1 < entries.len() {
            tokens = tokens.saturating_sub(entries[keep_from].token_count());
            keep_from += 1;
        }
        let over_budget = tokens > budget;
        if over_budget {
            tracing::warn!(
                tokens,
                budget,
                "Newest turn alone exceeds the context budget"
            );
        }
        Some(Compaction {
            front: Vec::new(),
            keep_from,
            over_budget,
        })
    }

    fn collapse(&self, earlier: &[HistoryEntry], keep: &[bool]) -> Vec<HistoryEntry> {
        let mut out: Vec<HistoryEntry> = Vec::with_capacity(earlier.len());
        let mut in_run = false;
        for (entry, &kept) in earlier.iter().zip(keep) {
            if kept {
                out.push(entry.clone());
                in_run = false;
            } else if !in_run {
                out.push(HistoryEntry::new(
                    entry.id(),
                    ConversationTurn::placeholder(
                        entry.turn().role(),
                        self.placeholder.clone(),
                        self.placeholder_tokens,
                    ),
                ));
                in_run = true;
            }
        }
        out
    }
}

/// Result of windowing: `front ++ entries[keep_from..]`.
///
/// Only the front is rewritten, so the surviving suffix keeps its order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compaction {
    pub front: Vec<HistoryEntry>,
    pub keep_from: usize,
    /// The newest turn is kept even though it alone exceeds the budget.
    pub over_budget: bool,
}

impl Compaction {
    /// Materialize the compacted view of `entries`.
    #[must_use]
    pub fn apply_to(&self, entries: &[HistoryEntry]) -> Vec<ConversationTurn> {
        self.front
            .iter()
            .chain(&entries[self.keep_from.min(entries.len())..])
            .map(|entry| entry.turn().clone())
            .collect()
    }
}

fn sum_tokens(entries: &[HistoryEntry]) -> u32 {
    entries
        .iter()
        .map(HistoryEntry::token_count)
        .fold(0, u32::saturating_add)
}
