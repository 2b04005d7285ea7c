//! Model capability profiles.
//!
//! Model families differ in which request fields they accept. Rather than
//! checking string prefixes at every call site, a model id is resolved once
//! into a [`ModelCapabilityProfile`] that travels with the client.

use serde::{Deserialize, Serialize};

use crate::ModelName;

/// Name of the completion-length field a model family accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenLimitField {
    /// `max_tokens` - traditional chat models.
    MaxTokens,
    /// `max_completion_tokens` - reasoning models.
    MaxCompletionTokens,
}

impl TokenLimitField {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TokenLimitField::MaxTokens => "max_tokens",
            TokenLimitField::MaxCompletionTokens => "max_completion_tokens",
        }
    }
}

/// Which optional request fields are legal for a model.
///
/// A profile with `accepts_sampling_params == false` never receives a
/// temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelCapabilityProfile {
    accepts_sampling_params: bool,
    token_limit_field: TokenLimitField,
    accepts_json_mode: bool,
    /// Smallest completion limit worth sending.
    min_completion_tokens: u32,
}

impl ModelCapabilityProfile {
    /// Sampling parameters allowed, `max_tokens`.
    pub const TRADITIONAL: Self = Self {
        accepts_sampling_params: true,
        token_limit_field: TokenLimitField::MaxTokens,
        accepts_json_mode: true,
        min_completion_tokens: 1,
    };

    /// No sampling parameters, `max_completion_tokens`.
    pub const REASONING: Self = Self {
        accepts_sampling_params: false,
        token_limit_field: TokenLimitField::MaxCompletionTokens,
        accepts_json_mode: true,
        min_completion_tokens: Self::REASONING_MIN_COMPLETION_TOKENS,
    };

    /// Hidden reasoning is billed against the completion limit, so a reply
    /// sized for a chat model would come back empty.
    pub const REASONING_MIN_COMPLETION_TOKENS: u32 = 1000;

    #[must_use]
    pub const fn accepts_sampling_params(self) -> bool {
        self.accepts_sampling_params
    }

    #[must_use]
    pub const fn token_limit_field(self) -> TokenLimitField {
        self.token_limit_field
    }

    #[must_use]
    pub const fn accepts_json_mode(self) -> bool {
        self.accepts_json_mode
    }

    /// Token-limit failures are only recoverable by growing the budget for
    /// models that spend completion tokens on hidden reasoning.
    #[must_use]
    pub const fn grows_completion_budget(self) -> bool {
        matches!(self.token_limit_field, TokenLimitField::MaxCompletionTokens)
    }

    /// Completion limit to send when the caller asks for `requested` tokens.
    #[must_use]
    pub const fn completion_limit(self, requested: u32) -> u32 {
        if requested < self.min_completion_tokens {
            self.min_completion_tokens
        } else {
            requested
        }
    }

    /// Temperature to send, if any.
    #[must_use]
    pub fn temperature(self, requested: f32) -> Option<f32> {
        self.accepts_sampling_params.then_some(requested)
    }
}

/// Ordered prefix table mapping model ids to profiles. First match wins.
#[derive(Debug, Clone)]
pub struct CapabilityResolver {
    patterns: Vec<(String, ModelCapabilityProfile)>,
    fallback: ModelCapabilityProfile,
}

const REASONING_PREFIXES: &[&str] = &["gpt-5", "o1", "o3", "o4"];

impl CapabilityResolver {
    #[must_use]
    pub fn new(fallback: ModelCapabilityProfile) -> Self {
        Self {
            patterns: Vec::new(),
            fallback,
        }
    }

    /// Register a prefix. Earlier registrations take precedence.
    #[must_use]
    pub fn with_prefix(mut self, prefix: &str, profile: ModelCapabilityProfile) -> Self {
        self.patterns
            .push((prefix.trim().to_ascii_lowercase(), profile));
        self
    }

    /// Classify a model id. Total: unknown ids get the fallback profile.
    #[must_use]
    pub fn resolve(&self, model_id: &str) -> ModelCapabilityProfile {
        let id = model_id.trim().to_ascii_lowercase();
        self.patterns
            .iter()
            .find(|(prefix, _)| id.starts_with(prefix.as_str()))
            .map_or(self.fallback, |(_, profile)| *profile)
    }

    #[must_use]
    pub fn resolve_model(&self, model: &ModelName) -> ModelCapabilityProfile {
        self.resolve(model.as_str())
    }
}

impl Default for CapabilityResolver {
    fn default() -> Self {
        REASONING_PREFIXES.iter().fold(
            Self::new(ModelCapabilityProfile::TRADITIONAL),
            |resolver, prefix| resolver.with_prefix(prefix, ModelCapabilityProfile::REASONING),
        )
    }
}
