//! Response-shape rules for stored assistant turns.
//!
//! A reply longer than `max_words` is "verbose". Verbose replies are stored in
//! a short canonical form, `marker, core phrase [tag]`, so later prompts do not
//! feed long answers back to the model as examples.

use crate::adherence::THINKING_MARKERS;
use crate::markers::{MarkerSet, word_count};

#[derive(Debug, Clone)]
pub struct ResponseShape {
    max_words: usize,
    markers: MarkerSet,
    tag: Option<String>,
}

impl ResponseShape {
    pub const DEFAULT_MAX_WORDS: usize = 8;

    #[must_use]
    pub fn new(max_words: usize, markers: MarkerSet, tag: Option<String>) -> Self {
        let tag = tag
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty());
        Self {
            max_words: max_words.max(1),
            markers,
            tag,
        }
    }

    #[must_use]
    pub fn max_words(&self) -> usize {
        self.max_words
    }

    #[must_use]
    pub fn is_verbose(&self, text: &str) -> bool {
        word_count(text) > self.max_words
    }

    /// Canonical form when `text` is verbose; `None` when it already fits.
    #[must_use]
    pub fn compress(&self, text: &str) -> Option<String> {
        self.is_verbose(text).then(|| self.canonicalize(text))
    }

    /// `marker, core phrase [tag]`, never longer than `max_words` words.
    ///
    /// The marker is the first one found in `text`, else the first configured
    /// marker. The core phrase comes from the first sentence with the marker
    /// removed.
    #[must_use]
    pub fn canonicalize(&self, text: &str) -> String {
        let (marker, rest) = match self.markers.find(text) {
            Some(found) => (
                Some(text[found.start..found.end].to_lowercase()),
                format!("{} {}", &text[..found.start], &text[found.end..]),
            ),
            None => (
                self.markers.phrases().first().cloned(),
                text.to_string(),
            ),
        };

        let marker_words = marker.as_deref().map_or(0, word_count);
        let tag_words = self.tag.as_deref().map_or(0, word_count);
        let (core_budget, use_tag) = if marker_words + tag_words < self.max_words {
            (self.max_words - marker_words - tag_words, true)
        } else {
            (self.max_words.saturating_sub(marker_words).max(1), false)
        };

        let core: Vec<&str> = first_sentence(&rest)
            .split_whitespace()
            .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
            .filter(|word| !word.is_empty())
            .take(core_budget)
            .collect();

        let mut out = String::new();
        if let Some(marker) = marker {
            out.push_str(&marker);
        }
        if !core.is_empty() {
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(&core.join(" "));
        }
        if use_tag && let Some(tag) = &self.tag {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(tag);
        }

        let words: Vec<&str> = out.split_whitespace().take(self.max_words).collect();
        words.join(" ")
    }
}

impl Default for ResponseShape {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_WORDS,
            MarkerSet::new(THINKING_MARKERS),
            None,
        )
    }
}

fn first_sentence(text: &str) -> &str {
    let trimmed = text.trim_start_matches(|c: char| !c.is_alphanumeric());
    let end = trimmed
        .find(['.', '!', '?', '\n'])
        .unwrap_or(trimmed.len());
    &trimmed[..end]
}
