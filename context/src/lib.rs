//! Conversation context for persona chat sessions.
//!
//! This crate provides:
//! - Approximate token counting via tiktoken
//! - Ordered history with incremental token accounting
//! - Budget windowing that keeps regime-defining turns and collapses the rest
//! - Canonicalization of verbose assistant replies before they are stored
//! - Periodic instruction reinforcement and adherence scoring
//! - Message-kind classification
//!
//! # Architecture
//!
//! ```text
//! ContextManager
//! ├── history: ConversationHistory (append at back, rewrite at front)
//! ├── counter: TokenCounter (tiktoken)
//! ├── policy: CompressionPolicy (recent window + preservation rules)
//! ├── shape: ResponseShape (verbose reply canonicalization)
//! └── reinforcement: ReinforcementState (appended-token trigger)
//!
//! AdherenceScorer (rolling window, owned by the session)
//! classify_message (pure)
//! ```

mod adherence;
mod classify;
mod compression;
mod history;
mod manager;
mod markers;
mod reinforcement;
mod shape;
mod token_counter;

pub use adherence::{AdherenceScore, AdherenceScorer, THINKING_MARKERS};
pub use classify::{MessageKind, classify_message};
pub use compression::{Compaction, CompressionPolicy, PreservationRule};
pub use history::{ConversationHistory, HistoryEntry, TurnId};
pub use manager::{ContextConfig, ContextManager, ContextUsage};
pub use markers::{MarkerMatch, MarkerSet, word_count};
pub use reinforcement::ReinforcementState;
pub use shape::ResponseShape;
pub use token_counter::TokenCounter;
