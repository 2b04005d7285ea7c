//! Context Manager - owns one conversation's history and its budget rules.

use serde::{Deserialize, Serialize};

use persona_types::{ConversationTurn, Role};

use crate::compression::{CompressionPolicy, PreservationRule};
use crate::history::{ConversationHistory, TurnId};
use crate::adherence::THINKING_MARKERS;
use crate::markers::{MarkerSet, word_count};
use crate::reinforcement::ReinforcementState;
use crate::shape::ResponseShape;
use crate::token_counter::TokenCounter;

/// Tunables for one [`ContextManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// History budget; appends that push the total past it trigger compaction.
    pub max_context_tokens: u32,
    /// Newest turns always kept verbatim.
    pub recent_window: usize,
    /// Earlier turns with fewer words than this survive compaction.
    pub brevity_words: usize,
    /// Earlier turns containing one of these survive compaction.
    pub preserve_markers: Vec<String>,
    pub placeholder: String,
    /// Appended tokens between reinforcements; 0 disables.
    pub reinforcement_interval: u32,
}

impl ContextConfig {
    pub const DEFAULT_MAX_CONTEXT_TOKENS: u32 = 32_000;
    pub const DEFAULT_RECENT_WINDOW: usize = 10;
    pub const DEFAULT_BREVITY_WORDS: usize = 8;
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: Self::DEFAULT_MAX_CONTEXT_TOKENS,
            recent_window: Self::DEFAULT_RECENT_WINDOW,
            brevity_words: Self::DEFAULT_BREVITY_WORDS,
            preserve_markers: THINKING_MARKERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            placeholder: CompressionPolicy::DEFAULT_PLACEHOLDER.to_string(),
            reinforcement_interval: ReinforcementState::DEFAULT_INTERVAL,
        }
    }
}

/// Snapshot for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextUsage {
    /// Tokens currently stored in history.
    pub used_tokens: u32,
    pub budget_tokens: u32,
    pub turns: usize,
    /// Whether any compaction has run since the last clear.
    pub compacted: bool,
}

impl ContextUsage {
    /// Usage as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn percentage(&self) -> f32 {
        if self.budget_tokens == 0 {
            0.0
        } else {
            (self.used_tokens as f32 / self.budget_tokens as f32) * 100.0
        }
    }

    /// Only a single turn larger than the whole budget can leave history here.
    #[must_use]
    pub fn is_over_budget(&self) -> bool {
        self.used_tokens > self.budget_tokens
    }

    /// Format for status lines: "2.1k / 32.0k (7%)"
    #[must_use]
    pub fn format_compact(&self) -> String {
        fn format_k(n: u32) -> String {
            if n >= 1000 {
                format!("{:.1}k", n as f32 / 1000.0)
            } else {
                n.to_string()
            }
        }

        let base = format!(
            "{} / {} ({:.0}%)",
            format_k(self.used_tokens),
            format_k(self.budget_tokens),
            self.percentage()
        );
        let base = if self.compacted {
            format!("{base} [compacted]")
        } else {
            base
        };
        if self.is_over_budget() {
            format!("{base} [over budget]")
        } else {
            base
        }
    }
}

#[derive(Debug)]
pub struct ContextManager {
    history: ConversationHistory,
    counter: TokenCounter,
    policy: CompressionPolicy,
    shape: ResponseShape,
    reinforcement: ReinforcementState,
    /// Tokens ever appended; only rollback lowers it.
    appended_tokens: u64,
    budget: u32,
    compactions: u32,
}

impl ContextManager {
    #[must_use]
    pub fn new(config: ContextConfig) -> Self {
        let counter = TokenCounter::new();
        let mut rules = vec![PreservationRule::BelowWordCount(config.brevity_words)];
        let markers = MarkerSet::new(&config.preserve_markers);
        if !markers.is_empty() {
            rules.push(PreservationRule::ContainsMarker(markers));
        }
        let policy =
            CompressionPolicy::new(config.recent_window, rules, config.placeholder, &counter);

        Self {
            history: ConversationHistory::new(),
            counter,
            policy,
            shape: ResponseShape::default(),
            reinforcement: ReinforcementState::new(config.reinforcement_interval),
            appended_tokens: 0,
            budget: config.max_context_tokens,
            compactions: 0,
        }
    }

    #[must_use]
    pub fn with_shape(mut self, shape: ResponseShape) -> Self {
        self.shape = shape;
        self
    }

    /// Store a turn, canonicalizing verbose assistant replies first.
    ///
    /// Compacts the history when the new total exceeds the budget.
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> TurnId {
        let mut content = content.into();
        if role == Role::Assistant
            && let Some(canonical) = self.shape.compress(&content)
        {
            tracing::debug!(
                original_words = word_count(&content),
                "Canonicalized verbose reply"
            );
            content = canonical;
        }

        let tokens = self.counter.count_turn(role, &content);
        let id = self.history.push(ConversationTurn::new(role, content, tokens));
        self.appended_tokens = self.appended_tokens.saturating_add(u64::from(tokens));

        if self.history.total_tokens() > self.budget {
            self.compact(self.budget);
        }
        id
    }

    /// The history as it would be sent under `budget`. Never mutates.
    #[must_use]
    pub fn render(&self, budget: u32) -> Vec<ConversationTurn> {
        let entries = self.history.entries();
        match self.policy.plan(entries, budget) {
            Some(compaction) => compaction.apply_to(entries),
            None => self.history.turns().cloned().collect(),
        }
    }

    /// Compact the stored history to fit `budget`. Returns whether anything changed.
    pub fn compact(&mut self, budget: u32) -> bool {
        let Some(compaction) = self.policy.plan(self.history.entries(), budget) else {
            return false;
        };

        let before = self.history.total_tokens();
        self.history
            .replace_front(compaction.keep_from, compaction.front);
        self.compactions = self.compactions.saturating_add(1);
        tracing::info!(
            before,
            after = self.history.total_tokens(),
            budget,
            turns = self.history.len(),
            "Compacted conversation history"
        );
        true
    }

    #[must_use]
    pub fn needs_reinforcement(&self) -> bool {
        self.reinforcement.needs(self.appended_tokens)
    }

    pub fn mark_reinforced(&mut self) {
        self.reinforcement.mark(self.appended_tokens);
    }

    /// Undo the newest append, if it is still `id`.
    ///
    /// A compaction triggered by that append is not undone.
    pub fn rollback_last(&mut self, id: TurnId) -> Option<ConversationTurn> {
        let turn = self.history.pop_if_last(id)?;
        self.appended_tokens = self
            .appended_tokens
            .saturating_sub(u64::from(turn.token_count()));
        Some(turn)
    }

    #[must_use]
    pub fn usage(&self) -> ContextUsage {
        ContextUsage {
            used_tokens: self.history.total_tokens(),
            budget_tokens: self.budget,
            turns: self.history.len(),
            compacted: self.compactions > 0,
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.reinforcement.reset();
        self.appended_tokens = 0;
        self.compactions = 0;
    }

    #[must_use]
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    #[must_use]
    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    #[must_use]
    pub fn budget(&self) -> u32 {
        self.budget
    }

    #[must_use]
    pub fn appended_tokens(&self) -> u64 {
        self.appended_tokens
    }

    #[must_use]
    pub fn compactions(&self) -> u32 {
        self.compactions
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::{ContextConfig, ContextManager, ContextUsage};
    use crate::markers::{MarkerSet, word_count};
    use crate::shape::ResponseShape;
    use persona_types::{ConversationTurn, Role};

    const LONG_USER: &str = "I have been thinking a lot about whether we should move the whole \
                             team over to the new build system before the next release";

    fn config(max_context_tokens: u32, recent_window: usize) -> ContextConfig {
        ContextConfig {
            max_context_tokens,
            recent_window,
            brevity_words: 4,
            preserve_markers: vec!["hmmm".to_string()],
            placeholder: "[omitted]".to_string(),
            reinforcement_interval: 100,
        }
    }

    fn sum(turns: &[ConversationTurn]) -> u32 {
        turns.iter().map(ConversationTurn::token_count).sum()
    }

    #[test]
    fn append_counts_tokens() {
        let mut manager = ContextManager::new(config(10_000, 4));
        let id = manager.append(Role::User, "hello there");
        let expected = manager.counter().count_turn(Role::User, "hello there");

        assert_eq!(id.as_u64(), 0);
        assert_eq!(manager.history().total_tokens(), expected);
        assert_eq!(manager.appended_tokens(), u64::from(expected));
    }

    #[test]
    fn verbose_assistant_replies_are_canonicalized() {
        let mut manager = ContextManager::new(config(10_000, 4)).with_shape(ResponseShape::new(
            6,
            MarkerSet::new(["honestly"]),
            None,
        ));
        manager.append(
            Role::Assistant,
            "Honestly I think the new build system is great and we should switch now.",
        );
        let stored = manager.history().last().unwrap().turn().content().to_string();
        assert!(word_count(&stored) <= 6, "{stored}");
        assert!(stored.starts_with("honestly"));
    }

    #[test]
    fn user_turns_are_stored_verbatim() {
        let mut manager = ContextManager::new(config(10_000, 4));
        manager.append(Role::User, LONG_USER);
        assert_eq!(manager.history().last().unwrap().turn().content(), LONG_USER);
    }

    #[test]
    fn render_is_identity_under_budget() {
        let mut manager = ContextManager::new(config(10_000, 2));
        manager.append(Role::User, "hi");
        manager.append(Role::Assistant, "hmmm hey");
        let turns = manager.render(manager.budget());
        assert_eq!(turns.len(), 2);
        assert!(turns.iter().all(|turn| !turn.is_placeholder()));
    }

    #[test]
    fn render_fits_budget_without_mutating() {
        let mut manager = ContextManager::new(config(10_000, 2));
        for _ in 0..6 {
            manager.append(Role::User, LONG_USER);
        }
        let total = manager.history().total_tokens();
        let budget = total / 2;

        let rendered = manager.render(budget);
        assert!(sum(&rendered) <= budget);
        assert_eq!(manager.history().total_tokens(), total);
        assert_eq!(manager.history().len(), 6);
    }

    #[test]
    fn append_compacts_over_budget() {
        let mut manager = ContextManager::new(config(200, 2));
        for _ in 0..10 {
            manager.append(Role::User, LONG_USER);
        }
        let usage = manager.usage();
        assert!(usage.used_tokens <= 200, "{usage:?}");
        assert!(usage.compacted);
        assert!(manager.compactions() > 0);
        assert_eq!(
            manager.history().last().unwrap().turn().content(),
            LONG_USER
        );
    }

    #[test]
    fn compaction_is_idempotent() {
        let mut manager = ContextManager::new(config(10_000, 2));
        for _ in 0..6 {
            manager.append(Role::User, LONG_USER);
        }
        let budget = manager.history().total_tokens() / 2;
        assert!(manager.compact(budget));
        let after = manager.render(budget);
        assert!(!manager.compact(budget));
        assert_eq!(manager.render(budget), after);
    }

    #[test]
    fn reinforcement_follows_appended_tokens_across_compaction() {
        let mut manager = ContextManager::new(config(150, 1));
        assert!(!manager.needs_reinforcement());

        while !manager.needs_reinforcement() {
            manager.append(Role::User, LONG_USER);
        }
        manager.mark_reinforced();
        assert!(!manager.needs_reinforcement());

        // Compaction keeps the stored total low, but growth is still counted.
        while !manager.needs_reinforcement() {
            manager.append(Role::User, LONG_USER);
        }
        assert!(manager.history().total_tokens() <= 150);
        assert!(manager.appended_tokens() >= 200);
    }

    #[test]
    fn rollback_restores_counters() {
        let mut manager = ContextManager::new(config(10_000, 4));
        let first = manager.append(Role::User, "first");
        let before = manager.appended_tokens();
        let second = manager.append(Role::User, "second");

        assert!(manager.rollback_last(first).is_none());
        let popped = manager.rollback_last(second).unwrap();
        assert_eq!(popped.content(), "second");
        assert_eq!(manager.appended_tokens(), before);
        assert_eq!(manager.history().len(), 1);
    }

    #[test]
    fn clear_resets_everything() {
        let mut manager = ContextManager::new(config(100, 1));
        for _ in 0..5 {
            manager.append(Role::User, LONG_USER);
        }
        manager.clear();
        let usage = manager.usage();
        assert_eq!(usage.turns, 0);
        assert_eq!(usage.used_tokens, 0);
        assert!(!usage.compacted);
        assert!(!manager.needs_reinforcement());
    }

    #[test]
    fn config_fills_missing_fields_with_defaults() {
        let config: ContextConfig =
            serde_json::from_str(r#"{"recent_window": 3, "preserve_markers": []}"#).unwrap();
        assert_eq!(config.recent_window, 3);
        assert!(config.preserve_markers.is_empty());
        assert_eq!(
            config.max_context_tokens,
            ContextConfig::DEFAULT_MAX_CONTEXT_TOKENS
        );
        assert_eq!(config.reinforcement_interval, 3000);
    }

    #[test]
    fn usage_formats() {
        let usage = ContextUsage {
            used_tokens: 2100,
            budget_tokens: 32_000,
            turns: 4,
            compacted: false,
        };
        assert_eq!(usage.format_compact(), "2.1k / 32.0k (7%)");

        let usage = ContextUsage {
            compacted: true,
            ..usage
        };
        assert!(usage.format_compact().ends_with("[compacted]"));
        assert!(!usage.is_over_budget());

        let empty = ContextUsage {
            used_tokens: 5,
            budget_tokens: 0,
            turns: 0,
            compacted: false,
        };
        assert!(empty.percentage().abs() < f32::EPSILON);
    }

    #[test]
    fn turn_larger_than_budget_is_reported() {
        let mut manager = ContextManager::new(config(20, 2));
        manager.append(Role::User, "hi");
        manager.append(Role::User, LONG_USER);

        let rendered = manager.render(20);
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].content(), LONG_USER);
        assert!(sum(&rendered) > 20);

        let usage = manager.usage();
        assert!(usage.is_over_budget());
        assert!(usage.format_compact().ends_with("[compacted] [over budget]"));
    }
}
