//! Ordered conversation history with incremental token accounting.
//!
//! Turns are only ever appended at the back or replaced/truncated at the
//! front; the order of surviving turns never changes. `total_tokens()` is kept
//! equal to the sum of the stored turns' token counts on every mutation.

use serde::{Deserialize, Serialize};

use persona_types::ConversationTurn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TurnId(u64);

impl TurnId {
    const fn new(id: u64) -> Self {
        Self(id)
    }

    pub(crate) const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    id: TurnId,
    turn: ConversationTurn,
}

impl HistoryEntry {
    #[must_use]
    pub(crate) fn new(id: TurnId, turn: ConversationTurn) -> Self {
        Self { id, turn }
    }

    #[must_use]
    pub fn id(&self) -> TurnId {
        self.id
    }

    #[must_use]
    pub fn turn(&self) -> &ConversationTurn {
        &self.turn
    }

    #[must_use]
    pub fn token_count(&self) -> u32 {
        self.turn.token_count()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
    next_id: u64,
    cached_total: u32,
}

impl ConversationHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) -> TurnId {
        let id = TurnId::new(self.next_id);
        self.next_id = id.next().as_u64();
        self.cached_total = self.cached_total.saturating_add(turn.token_count());
        self.entries.push(HistoryEntry::new(id, turn));
        id
    }

    /// Remove the newest entry, but only if it is `id`.
    pub fn pop_if_last(&mut self, id: TurnId) -> Option<ConversationTurn> {
        if self.entries.last().is_some_and(|entry| entry.id == id) {
            let entry = self.entries.pop()?;
            self.cached_total = self.cached_total.saturating_sub(entry.token_count());
            Some(entry.turn)
        } else {
            None
        }
    }

    /// Replace the first `count` entries with `replacement`.
    ///
    /// Replacement ids must come from the replaced range so ids stay ordered.
    pub(crate) fn replace_front(&mut self, count: usize, replacement: Vec<HistoryEntry>) {
        let count = count.min(self.entries.len());
        debug_assert!(
            replacement
                .iter()
                .zip(replacement.iter().skip(1))
                .all(|(a, b)| a.id < b.id),
            "replacement ids must be ascending"
        );
        debug_assert!(
            self.entries
                .get(count)
                .zip(replacement.last())
                .is_none_or(|(kept, last)| last.id < kept.id),
            "replacement must precede the kept suffix"
        );

        let removed: u32 = self.entries[..count]
            .iter()
            .map(HistoryEntry::token_count)
            .fold(0, u32::saturating_add);
        let added: u32 = replacement
            .iter()
            .map(HistoryEntry::token_count)
            .fold(0, u32::saturating_add);

        self.entries.splice(..count, replacement);
        self.cached_total = self.cached_total.saturating_sub(removed).saturating_add(added);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cached_total = 0;
    }

    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.entries.iter().map(HistoryEntry::turn)
    }

    #[must_use]
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn total_tokens(&self) -> u32 {
        self.cached_total
    }

    #[must_use]
    pub fn has_placeholders(&self) -> bool {
        self.turns().any(ConversationTurn::is_placeholder)
    }
}
