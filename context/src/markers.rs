//! Case-insensitive phrase matching on word boundaries.

use std::fmt;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

/// A set of marker phrases ("hmmm", "got it", "what do you think", ...).
///
/// Matches are ASCII case-insensitive and must sit on word boundaries, so the
/// marker `ok` does not match inside `book`.
#[derive(Clone)]
pub struct MarkerSet {
    phrases: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl fmt::Debug for MarkerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkerSet")
            .field("phrases", &self.phrases)
            .finish_non_exhaustive()
    }
}

/// A marker occurrence: byte span in the searched text and the phrase index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerMatch {
    pub start: usize,
    pub end: usize,
    pub phrase: usize,
}

impl MarkerSet {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases: Vec<String> = phrases
            .into_iter()
            .map(|phrase| phrase.as_ref().trim().to_ascii_lowercase())
            .filter(|phrase| !phrase.is_empty())
            .collect();

        let automaton = if phrases.is_empty() {
            None
        } else {
            match AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .match_kind(MatchKind::Standard)
                .build(&phrases)
            {
                Ok(ac) => Some(ac),
                Err(e) => {
                    tracing::warn!(
                        phrase_count = phrases.len(),
                        "Marker automaton build failed; using linear scan ({e})"
                    );
                    None
                }
            }
        };

        Self { phrases, automaton }
    }

    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    #[must_use]
    pub fn contains(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    /// Leftmost boundary-respecting match; longest phrase on ties.
    #[must_use]
    pub fn find(&self, text: &str) -> Option<MarkerMatch> {
        let candidates: Vec<MarkerMatch> = match &self.automaton {
            Some(ac) => ac
                .find_overlapping_iter(text)
                .map(|m| MarkerMatch {
                    start: m.start(),
                    end: m.end(),
                    phrase: m.pattern().as_usize(),
                })
                .collect(),
            None => self.linear_matches(text),
        };

        candidates
            .into_iter()
            .filter(|m| on_word_boundary(text, m.start, m.end))
            .min_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)))
    }

    #[must_use]
    pub fn phrase(&self, index: usize) -> Option<&str> {
        self.phrases.get(index).map(String::as_str)
    }

    fn linear_matches(&self, text: &str) -> Vec<MarkerMatch> {
        let lower = text.to_ascii_lowercase();
        let mut matches = Vec::new();
        for (index, phrase) in self.phrases.iter().enumerate() {
            let mut from = 0;
            while let Some(pos) = lower[from..].find(phrase.as_str()) {
                let start = from + pos;
                matches.push(MarkerMatch {
                    start,
                    end: start + phrase.len(),
                    phrase: index,
                });
                from = start + phrase.len().max(1);
                while from < lower.len() && !lower.is_char_boundary(from) {
                    from += 1;
                }
            }
        }
        matches
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}

fn on_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    let first = text[start..end].chars().next();
    let last = text[start..end].chars().next_back();

    // Boundaries only matter where the phrase itself starts or ends with a word character.
    let left_ok = !first.is_some_and(is_word_char) || !before.is_some_and(is_word_char);
    let right_ok = !last.is_some_and(is_word_char) || !after.is_some_and(is_word_char);
    left_ok && right_ok
}

/// Whitespace-separated word count.
#[must_use]
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
