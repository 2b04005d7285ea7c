//! Raw failure signals and their classification.
//!
//! Transport code reports what happened as a [`RawError`]; [`classify`] maps
//! that signal to an [`ErrorClass`] which alone drives the retry decision.

use std::fmt;

use thiserror::Error;

/// Where a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawErrorKind {
    /// Non-success HTTP status.
    Status(u16),
    /// Connect, timeout, or other transport failure before a status arrived.
    Transport,
    /// Missing or invalid local configuration (credential, endpoint).
    Config,
    /// A success status whose body could not be decoded.
    Decode,
    /// The model stopped on its completion limit before producing content.
    Truncated,
}

/// A single failed attempt, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RawError {
    kind: RawErrorKind,
    message: String,
}

impl RawError {
    #[must_use]
    pub fn new(kind: RawErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::new(
            RawErrorKind::Status(status),
            format!("API error {status}: {body}"),
        )
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(RawErrorKind::Transport, message)
    }

    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(RawErrorKind::Config, message)
    }

    #[must_use]
    pub const fn kind(&self) -> RawErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        classify(self)
    }
}

/// Retry-relevant category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    RateLimited,
    TokenBudgetExceeded,
    TransientServer,
    Fatal,
}

impl ErrorClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::TokenBudgetExceeded => "token_budget_exceeded",
            ErrorClass::TransientServer => "transient_server",
            ErrorClass::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const TOKEN_LIMIT_MARKERS: &[&str] = &["max_tokens or model output limit"];
const RATE_LIMIT_MARKERS: &[&str] = &["rate_limit", "ratelimit", "rate limit", "quota", "429"];
const AUTH_MARKERS: &[&str] = &["invalid_api_key", "incorrect api key", "invalid api key"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Classify a raw failure. Pure: the same signal always yields the same class.
#[must_use]
pub fn classify(error: &RawError) -> ErrorClass {
    let message = error.message.to_ascii_lowercase();

    if matches!(error.kind, RawErrorKind::Truncated) || contains_any(&message, TOKEN_LIMIT_MARKERS)
    {
        return ErrorClass::TokenBudgetExceeded;
    }

    match error.kind {
        RawErrorKind::Config | RawErrorKind::Decode => return ErrorClass::Fatal,
        RawErrorKind::Status(429) => return ErrorClass::RateLimited,
        _ => {}
    }

    if contains_any(&message, AUTH_MARKERS) {
        return ErrorClass::Fatal;
    }
    if contains_any(&message, RATE_LIMIT_MARKERS) {
        return ErrorClass::RateLimited;
    }

    match error.kind {
        RawErrorKind::Status(400 | 401 | 403 | 404 | 422) => ErrorClass::Fatal,
        _ => ErrorClass::TransientServer,
    }
}

/// Final failure of one logical call, surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminalError {
    /// A recoverable class ran out of retries.
    #[error("gave up after {attempts} attempts ({class}): {message}")]
    Exhausted {
        class: ErrorClass,
        attempts: u32,
        message: String,
    },
    /// Not retryable.
    #[error("request failed: {message}")]
    Fatal { message: String },
    /// The caller's deadline passed between attempts.
    #[error("canceled after {attempts} attempts")]
    Canceled { attempts: u32 },
}

impl TerminalError {
    /// Class of the last failure, if the call got far enough to have one.
    #[must_use]
    pub const fn class(&self) -> Option<ErrorClass> {
        match self {
            TerminalError::Exhausted { class, .. } => Some(*class),
            TerminalError::Fatal { .. } => Some(ErrorClass::Fatal),
            TerminalError::Canceled { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, TerminalError::Fatal { .. })
    }
}
