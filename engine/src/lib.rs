//! Persona engine - config, generation client and chat sessions.
//!
//! This crate wires the provider transport and the context manager together
//! without any terminal dependencies.
//!
//! - [`PersonaConfig`] - `~/.persona/config.toml`, all sections optional
//! - [`GenerationClient`] - rate limiter and retry scheduler around one endpoint
//! - [`ChatSession`] - one in-character conversation with degraded-turn recovery

mod client;
mod config;
mod session;

pub use client::{ClientBuildError, ClientOptions, Completion, GenerationClient, JsonReply};
pub use config::{
    AdherenceSection, ApiKeys, AppConfig, ConfigError, ContextSection, GenerationSection,
    GenerationSettings, PersonaConfig, RateLimitSection, RetrySection, ShapeSection, config_path,
    expand_env_vars,
};
pub use session::{ChatSession, Reply, SessionSettings, SessionUsage};

// Re-export from crates for public API
pub use persona_context::{
    AdherenceScore, AdherenceScorer, ContextConfig, ContextManager, ContextUsage,
    ConversationHistory, MessageKind, classify_message,
};
pub use persona_providers::{
    self, ApiConfig,
    error::{ErrorClass, TerminalError},
    repair::{ParseError, RepairTier, ResponseRepairer},
};
pub use persona_types::{ApiKey, ApiUsage, ChatMessage, ConversationTurn, ModelName, Role};
