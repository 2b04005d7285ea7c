//! Message-kind detection for incoming user text.
//!
//! The kind picks a completion budget and an instruction line; it never
//! touches prompt text itself.

use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::markers::{MarkerSet, word_count};

const GREETING_STARTERS: &[&str] = &[
    "hey",
    "hi",
    "hello",
    "good morning",
    "good afternoon",
    "good evening",
    "sup",
    "wassup",
    "what's up",
    "whats up",
    "how are you",
];

const OPINION_PHRASES: &[&str] = &[
    "what do you think",
    "thoughts on",
    "opinion on",
    "your take",
    "do you believe",
    "should we",
    "how do you see",
    "perspective on",
    "your view",
    "best way",
    "would you rather",
    "do you prefer",
    "how do you feel",
];

/// Greetings longer than this are treated as ordinary messages.
const GREETING_MAX_WORDS: usize = 15;
/// A starter must begin within this many leading words.
const GREETING_LEAD_WORDS: usize = 3;

static GREETINGS: LazyLock<MarkerSet> = LazyLock::new(|| MarkerSet::new(GREETING_STARTERS));
static OPINIONS: LazyLock<MarkerSet> = LazyLock::new(|| MarkerSet::new(OPINION_PHRASES));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Greeting,
    Opinion,
    General,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::Greeting => "greeting",
            MessageKind::Opinion => "opinion",
            MessageKind::General => "general",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Greeting wins over opinion: "hey, what do you think?" is a greeting.
#[must_use]
pub fn classify_message(text: &str) -> MessageKind {
    if is_greeting(text) {
        MessageKind::Greeting
    } else if OPINIONS.contains(text) {
        MessageKind::Opinion
    } else {
        MessageKind::General
    }
}

fn is_greeting(text: &str) -> bool {
    if word_count(text) > GREETING_MAX_WORDS {
        return false;
    }
    GREETINGS
        .find(text)
        .is_some_and(|found| word_count(&text[..found.start]) < GREETING_LEAD_WORDS)
}

#[cfg(test)]
mod tests {
    use super::{MessageKind, classify_message};

    #[test]
    fn greetings() {
        for text in [
            "hey",
            "Hi there!",
            "good morning :)",
            "yo, what's up",
            "How are you doing today?",
        ] {
            assert_eq!(classify_message(text), MessageKind::Greeting, "{text:?}");
        }
    }

    #[test]
    fn late_or_embedded_starters_are_not_greetings() {
        assert_eq!(
            classify_message("I went to the store and said hi"),
            MessageKind::General
        );
        assert_eq!(classify_message("this is high quality"), MessageKind::General);
    }

    #[test]
    fn long_messages_are_not_greetings() {
        let text = "hey so I was wondering about the release plan and whether the team \
                    has figured out the timeline for the migration yet";
        assert_eq!(classify_message(text), MessageKind::General);
    }

    #[test]
    fn opinions() {
        assert_eq!(
            classify_message("What do you think about remote work?"),
            MessageKind::Opinion
        );
        assert_eq!(
            classify_message("so should we rewrite it in rust"),
            MessageKind::Opinion
        );
        assert_eq!(
            classify_message("Any thoughts on the new design?"),
            MessageKind::Opinion
        );
    }

    #[test]
    fn greeting_takes_priority() {
        assert_eq!(
            classify_message("hey, what do you think?"),
            MessageKind::Greeting
        );
    }

    #[test]
    fn everything_else_is_general() {
        assert_eq!(classify_message("the build is green"), MessageKind::General);
        assert_eq!(classify_message(""), MessageKind::General);
    }
}
