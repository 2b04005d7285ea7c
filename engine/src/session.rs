//! `ChatSession` - one in-character conversation.
//!
//! Each `send` classifies the user message, renders history under the context
//! budget, optionally reinforces the instructions, and stores the reply. A
//! failed call rolls the user turn back and yields a degraded placeholder
//! reply; the session stays usable.

use persona_context::{
    AdherenceScore, AdherenceScorer, ContextManager, ContextUsage, ConversationHistory,
    MessageKind, classify_message,
};
use persona_providers::openai::RequestParams;
use persona_types::{ApiUsage, ChatMessage, ConversationTurn, Role};

use crate::client::GenerationClient;
use crate::config::{GenerationSettings, PersonaConfig};

const CONVERSATION_RULES: &str = "You are in a casual one-on-one chat. Reply as the person \
described above.
- Stay in character: their traits, their vocabulary, their habits.
- Keep replies short, one to three sentences unless asked for more.
- Do not narrate or explain yourself; just answer.";

const DEFAULT_REINFORCEMENT: &str = "REMINDER: you are still the person described above. \
Stay in character and keep it brief.";

/// Session-level knobs resolved from config.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub generation: GenerationSettings,
    pub reinforcement_text: String,
    /// Rolling adherence average below which reinforcement fires early.
    pub drift_threshold: f32,
}

impl SessionSettings {
    pub const DEFAULT_DRIFT_THRESHOLD: f32 = 1.5;

    #[must_use]
    pub fn from_config(config: &PersonaConfig) -> Self {
        Self {
            generation: config.generation(),
            reinforcement_text: config
                .reinforcement_text()
                .unwrap_or(DEFAULT_REINFORCEMENT)
                .to_string(),
            drift_threshold: config
                .drift_threshold()
                .unwrap_or(Self::DEFAULT_DRIFT_THRESHOLD),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&PersonaConfig::default())
    }
}

/// What `send` hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// The model's text as received, or a `[no response: ...]` placeholder.
    pub text: String,
    pub kind: MessageKind,
    /// `None` for degraded replies.
    pub score: Option<AdherenceScore>,
    pub degraded: bool,
    pub reinforced: bool,
}

/// Token accounting for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionUsage {
    pub context: ContextUsage,
    pub api: ApiUsage,
    pub degraded_replies: u32,
}

#[derive(Debug)]
pub struct ChatSession {
    system_prompt: String,
    client: GenerationClient,
    context: ContextManager,
    adherence: AdherenceScorer,
    settings: SessionSettings,
    api_usage: ApiUsage,
    degraded_replies: u32,
}

fn instruction_for(kind: MessageKind) -> Option<&'static str> {
    match kind {
        MessageKind::Greeting => Some(
            "The user greeted you. Greet them back in your own style, one or two short sentences.",
        ),
        MessageKind::Opinion => Some(
            "The user asked for your take. Answer in at most 8 words: a thinking marker and a brief view.",
        ),
        MessageKind::General => None,
    }
}

impl ChatSession {
    #[must_use]
    pub fn new(persona_prompt: &str, client: GenerationClient, config: &PersonaConfig) -> Self {
        let context =
            ContextManager::new(config.context_config()).with_shape(config.response_shape());
        Self::with_parts(
            persona_prompt,
            client,
            context,
            config.adherence_scorer(),
            SessionSettings::from_config(config),
        )
    }

    #[must_use]
    pub fn with_parts(
        persona_prompt: &str,
        client: GenerationClient,
        context: ContextManager,
        adherence: AdherenceScorer,
        settings: SessionSettings,
    ) -> Self {
        let system_prompt = format!("{}\n\n{CONVERSATION_RULES}", persona_prompt.trim());
        tracing::info!(
            model = %client.model(),
            budget = context.budget(),
            "Chat session started"
        );
        Self {
            system_prompt,
            client,
            context,
            adherence,
            settings,
            api_usage: ApiUsage::default(),
            degraded_replies: 0,
        }
    }

    pub async fn send(&mut self, user_text: &str) -> Reply {
        let kind = classify_message(user_text);
        let user_id = self.context.append(Role::User, user_text);

        let reinforced = self.context.needs_reinforcement()
            || self.adherence.is_drifting(self.settings.drift_threshold);
        let messages = self.outbound_messages(kind, reinforced);
        let params = RequestParams {
            max_tokens: self.settings.generation.max_tokens_for(kind),
            temperature: self.settings.generation.temperature,
            json_mode: false,
        };
        tracing::debug!(
            kind = kind.as_str(),
            reinforced,
            messages = messages.len(),
            "Sending chat turn"
        );

        let failure = match self.client.complete(&messages, params).await {
            Ok(completion) => {
                self.api_usage.merge(completion.usage);
                let text = completion.text.trim();
                if text.is_empty() {
                    "empty reply".to_string()
                } else {
                    let score = self.adherence.record(text);
                    self.context.append(Role::Assistant, text);
                    if reinforced {
                        self.context.mark_reinforced();
                    }
                    return Reply {
                        text: text.to_string(),
                        kind,
                        score: Some(score),
                        degraded: false,
                        reinforced,
                    };
                }
            }
            Err(err) => err.to_string(),
        };

        self.context.rollback_last(user_id);
        self.degraded_replies = self.degraded_replies.saturating_add(1);
        tracing::warn!(kind = kind.as_str(), "Turn degraded: {failure}");
        Reply {
            text: format!("[no response: {failure}]"),
            kind,
            score: None,
            degraded: true,
            reinforced: false,
        }
    }

    /// System message plus the history rendered under what is left of the budget.
    fn outbound_messages(&self, kind: MessageKind, reinforce: bool) -> Vec<ChatMessage> {
        let mut system = self.system_prompt.clone();
        if let Some(instruction) = instruction_for(kind) {
            system.push_str("\n\n");
            system.push_str(instruction);
        }
        if reinforce {
            system.push_str("\n\n");
            system.push_str(&self.settings.reinforcement_text);
        }
        let system = ChatMessage::system(system);

        let budget = self
            .context
            .budget()
            .saturating_sub(self.context.counter().count_message(&system));
        let turns = self.context.render(budget);

        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(system);
        messages.extend(turns.iter().map(ConversationTurn::to_chat_message));
        messages
    }

    #[must_use]
    pub fn history(&self) -> &ConversationHistory {
        self.context.history()
    }

    pub fn clear(&mut self) {
        self.context.clear();
        self.adherence.clear();
        tracing::info!("Conversation cleared");
    }

    #[must_use]
    pub fn adherence(&self) -> &AdherenceScorer {
        &self.adherence
    }

    #[must_use]
    pub fn usage(&self) -> SessionUsage {
        SessionUsage {
            context: self.context.usage(),
            api: self.api_usage,
            degraded_replies: self.degraded_replies,
        }
    }

    #[must_use]
    pub fn client(&self) -> &GenerationClient {
        &self.client
    }

    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}
