//! Adherence scoring of assistant replies.
//!
//! Three independent checks, one point each:
//! - the reply contains an acknowledgment/thinking marker;
//! - it ends with the configured punctuation pattern;
//! - it is under the brevity threshold.
//!
//! Scores feed a bounded rolling window. They do not change control flow by
//! themselves; callers read [`AdherenceScorer::is_drifting`] to reinforce early.

use std::collections::VecDeque;

use crate::markers::{MarkerSet, word_count};

pub const THINKING_MARKERS: &[&str] = &[
    "hmmm",
    "i think",
    "actually",
    "honestly",
    "makes sense",
    "got it",
    "yeah",
    "ok",
    "sure",
    "cool",
    "yup",
    "right",
    "not sure",
    "no clue",
    "nope",
    "doh",
];

/// Per-reply breakdown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdherenceScore {
    pub has_marker: bool,
    pub ends_with_pattern: bool,
    pub is_brief: bool,
}

impl AdherenceScore {
    pub const CHECK_CREDIT: f32 = 1.0;
    pub const MAX: f32 = 3.0;

    #[must_use]
    pub fn value(&self) -> f32 {
        [self.has_marker, self.ends_with_pattern, self.is_brief]
            .into_iter()
            .filter(|passed| *passed)
            .map(|_| Self::CHECK_CREDIT)
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct AdherenceScorer {
    markers: MarkerSet,
    end_pattern: String,
    brief_words: usize,
    window: usize,
    scores: VecDeque<f32>,
}

impl AdherenceScorer {
    pub const DEFAULT_WINDOW: usize = 10;
    pub const DEFAULT_BRIEF_WORDS: usize = 15;
    pub const DEFAULT_END_PATTERN: &'static str = "?";

    #[must_use]
    pub fn new(
        markers: MarkerSet,
        end_pattern: impl Into<String>,
        brief_words: usize,
        window: usize,
    ) -> Self {
        let window = window.max(1);
        Self {
            markers,
            end_pattern: end_pattern.into(),
            brief_words,
            window,
            scores: VecDeque::with_capacity(window),
        }
    }

    /// Score without recording.
    #[must_use]
    pub fn score(&self, response: &str) -> AdherenceScore {
        let trimmed = response.trim_end();
        AdherenceScore {
            has_marker: self.markers.contains(response),
            ends_with_pattern: !self.end_pattern.is_empty()
                && trimmed.ends_with(self.end_pattern.as_str()),
            is_brief: word_count(response) <= self.brief_words,
        }
    }

    /// Score and push into the rolling window.
    pub fn record(&mut self, response: &str) -> AdherenceScore {
        let score = self.score(response);
        if self.scores.len() == self.window {
            self.scores.pop_front();
        }
        self.scores.push_back(score.value());
        score
    }

    #[must_use]
    pub fn average(&self) -> Option<f32> {
        if self.scores.is_empty() {
            return None;
        }
        Some(self.scores.iter().sum::<f32>() / self.scores.len() as f32)
    }

    /// Rolling average below `threshold`. Never true on an empty window.
    #[must_use]
    pub fn is_drifting(&self, threshold: f32) -> bool {
        self.average().is_some_and(|avg| avg < threshold)
    }

    pub fn recent(&self) -> impl Iterator<Item = f32> + '_ {
        self.scores.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn clear(&mut self) {
        self.scores.clear();
    }
}

impl Default for AdherenceScorer {
    fn default() -> Self {
        Self::new(
            MarkerSet::new(THINKING_MARKERS),
            Self::DEFAULT_END_PATTERN,
            Self::DEFAULT_BRIEF_WORDS,
            Self::DEFAULT_WINDOW,
        )
    }
}
