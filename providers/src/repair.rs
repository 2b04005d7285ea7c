//! Tiered repair of model replies that should have been JSON.
//!
//! 1. Strict parse of the whole reply.
//! 2. Lenient parse: take the first `{` .. last `}`, normalize single quotes
//!    when no double quotes are present, drop trailing commas, re-parse.
//! 3. Caller-supplied fallback payload.
//!
//! When a schema is attached, a candidate that parses but fails validation
//! counts as unparseable. The fallback is validated once, at construction,
//! so [`ResponseRepairer::parse`] cannot fail.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("static trailing-comma regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("reply is not valid JSON: {0}")]
    Malformed(String),
    #[error("reply does not match the expected schema: {0}")]
    SchemaViolation(String),
    #[error("invalid JSON schema: {0}")]
    InvalidSchema(String),
    #[error("fallback payload does not satisfy the expected schema: {0}")]
    InvalidFallback(String),
}

/// Which tier produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairTier {
    Strict,
    Lenient,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub value: Value,
    pub tier: RepairTier,
}

pub struct ResponseRepairer {
    fallback: Value,
    validator: Option<jsonschema::Validator>,
}

impl fmt::Debug for ResponseRepairer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseRepairer")
            .field("fallback", &self.fallback)
            .field("schema", &self.validator.is_some())
            .finish()
    }
}

impl ResponseRepairer {
    /// `fallback` must satisfy `schema` when one is given.
    pub fn new(fallback: Value, schema: Option<&Value>) -> Result<Self, ParseError> {
        let validator = schema
            .map(|schema| {
                jsonschema::validator_for(schema).map_err(|e| ParseError::InvalidSchema(e.to_string()))
            })
            .transpose()?;

        if let Some(validator) = &validator
            && let Err(err) = validator.validate(&fallback)
        {
            return Err(ParseError::InvalidFallback(err.to_string()));
        }

        Ok(Self {
            fallback,
            validator,
        })
    }

    #[must_use]
    pub fn fallback(&self) -> &Value {
        &self.fallback
    }

    /// Tier 1 only.
    pub fn parse_strict(&self, raw: &str) -> Result<Value, ParseError> {
        let value: Value =
            serde_json::from_str(raw.trim()).map_err(|e| ParseError::Malformed(e.to_string()))?;
        self.check(value)
    }

    /// Tier 2 only.
    pub fn parse_lenient(&self, raw: &str) -> Result<Value, ParseError> {
        let candidate = lenient_candidate(raw)
            .ok_or_else(|| ParseError::Malformed("no JSON object found".to_string()))?;
        let value: Value =
            serde_json::from_str(&candidate).map_err(|e| ParseError::Malformed(e.to_string()))?;
        self.check(value)
    }

    /// Tiers 1 and 2. Used by callers that re-ask before settling on the fallback.
    pub fn parse_structured(&self, raw: &str) -> Result<Repaired, ParseError> {
        match self.parse_strict(raw) {
            Ok(value) => Ok(Repaired {
                value,
                tier: RepairTier::Strict,
            }),
            Err(strict_err) => match self.parse_lenient(raw) {
                Ok(value) => Ok(Repaired {
                    value,
                    tier: RepairTier::Lenient,
                }),
                Err(lenient_err) => {
                    tracing::debug!(%strict_err, %lenient_err, "Reply not repairable");
                    Err(lenient_err)
                }
            },
        }
    }

    /// All three tiers. Never fails.
    #[must_use]
    pub fn parse(&self, raw: &str) -> Repaired {
        self.parse_structured(raw)
            .unwrap_or_else(|_| self.fallback_value())
    }

    #[must_use]
    pub fn fallback_value(&self) -> Repaired {
        Repaired {
            value: self.fallback.clone(),
            tier: RepairTier::Fallback,
        }
    }

    fn check(&self, value: Value) -> Result<Value, ParseError> {
        match &self.validator {
            Some(validator) => match validator.validate(&value) {
                Ok(()) => Ok(value),
                Err(err) => Err(ParseError::SchemaViolation(err.to_string())),
            },
            None => Ok(value),
        }
    }
}

fn lenient_candidate(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let mut fragment = raw[start..=end].to_string();
    if !fragment.contains('"') && fragment.contains('\'') {
        fragment = fragment.replace('\'', "\"");
    }
    Some(TRAILING_COMMA.replace_all(&fragment, "$1").into_owned())
}
