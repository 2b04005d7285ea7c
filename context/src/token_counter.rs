//! Token counting using tiktoken.
//!
//! This module provides **approximate** token counting using the `o200k_base`
//! encoding from tiktoken. This encoding matches current OpenAI chat models and
//! serves as a reasonable approximation for others. The fixed 4-token overhead
//! per message is an approximation of role markers and delimiters.

use std::fmt;
use std::sync::OnceLock;
use tiktoken_rs::{CoreBPE, o200k_base};

use persona_types::{ChatMessage, Role};

/// The tiktoken encoder is expensive to initialize (loads vocabulary data),
/// so we create it once and reuse it across all `TokenCounter` instances.
static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn get_encoder() -> Option<&'static CoreBPE> {
    ENCODER.get_or_init(|| o200k_base().ok()).as_ref()
}

const MESSAGE_OVERHEAD: u32 = 4;

/// Thread-safe approximate token counter using tiktoken's `o200k_base` encoding.
///
/// Falls back to byte length when the encoder cannot be loaded.
///
/// # Example
///
/// ```
/// use persona_context::TokenCounter;
///
/// let counter = TokenCounter::new();
/// assert!(counter.count_str("Hello, world!") > 0);
/// ```
#[derive(Clone, Copy)]
pub struct TokenCounter {
    encoder: Option<&'static CoreBPE>,
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoder", &self.encoder.as_ref().map(|_| "<CoreBPE>"))
            .finish()
    }
}

impl TokenCounter {
    #[must_use]
    pub fn new() -> Self {
        let encoder = get_encoder();
        if encoder.is_none() {
            tracing::error!(
                "Failed to initialize tiktoken o200k_base encoder. Falling back to byte-length estimates."
            );
        }

        Self { encoder }
    }

    #[must_use]
    pub fn count_str(&self, text: &str) -> u32 {
        let len = match self.encoder {
            Some(encoder) => encoder.encode_ordinary(text).len(),
            None => text.len(),
        };

        u32::try_from(len).unwrap_or(u32::MAX)
    }

    /// Tokens for one stored turn, including role overhead.
    #[must_use]
    pub fn count_turn(&self, role: Role, content: &str) -> u32 {
        self.count_role_content(role.as_str(), content)
    }

    /// Tokens for one outbound message, including role overhead.
    #[must_use]
    pub fn count_message(&self, message: &ChatMessage) -> u32 {
        self.count_role_content(message.role_str(), message.content())
    }

    #[must_use]
    pub fn count_messages(&self, messages: &[ChatMessage]) -> u32 {
        messages
            .iter()
            .map(|message| self.count_message(message))
            .fold(0, u32::saturating_add)
    }

    fn count_role_content(&self, role: &str, content: &str) -> u32 {
        self.count_str(content)
            .saturating_add(self.count_str(role))
            .saturating_add(MESSAGE_OVERHEAD)
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}
