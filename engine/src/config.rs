use serde::Deserialize;
use std::{env, fmt, fs, io, num::NonZeroU32, path::PathBuf, time::Duration};
use toml::de;

use persona_context::{
    AdherenceScorer, ContextConfig, MarkerSet, MessageKind, ResponseShape, THINKING_MARKERS,
};
use persona_providers::rate_limit::RateLimitConfig;
use persona_providers::retry::RetryPolicy;
use persona_types::TokenGrowth;

const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Default, Deserialize)]
pub struct PersonaConfig {
    pub app: Option<AppConfig>,
    pub api_keys: Option<ApiKeys>,
    pub rate_limit: Option<RateLimitSection>,
    pub retry: Option<RetrySection>,
    pub context: Option<ContextSection>,
    pub shape: Option<ShapeSection>,
    pub adherence: Option<AdherenceSection>,
    pub generation: Option<GenerationSection>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    pub model: Option<String>,
    /// Log request parameters and token usage per call.
    #[serde(default)]
    pub debug: bool,
}

#[derive(Default, Deserialize)]
pub struct ApiKeys {
    pub openai: Option<String>,
}

// Manual Debug impl to prevent leaking API keys in logs.
impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let openai = if self.openai.is_some() {
            "[REDACTED]"
        } else {
            "None"
        };
        f.debug_struct("ApiKeys").field("openai", &openai).finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RateLimitSection {
    /// No limiter is installed when unset.
    pub requests_per_minute: Option<u32>,
    pub cooldown_every: Option<u32>,
    pub cooldown_secs: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub base_delay_secs: Option<f64>,
    pub max_delay_secs: Option<f64>,
    pub jitter_fraction: Option<f64>,
    pub transient_retries: Option<u32>,
    pub transient_delay_secs: Option<f64>,
    pub max_token_doublings: Option<u8>,
    pub token_ceiling: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContextSection {
    pub max_context_tokens: Option<u32>,
    pub recent_window: Option<usize>,
    pub brevity_words: Option<usize>,
    pub preserve_markers: Option<Vec<String>>,
    pub placeholder: Option<String>,
    pub reinforcement_interval: Option<u32>,
    /// Reminder appended to the system prompt when reinforcement fires.
    pub reinforcement_text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShapeSection {
    pub max_words: Option<usize>,
    pub markers: Option<Vec<String>>,
    pub tag: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdherenceSection {
    pub window: Option<usize>,
    pub brief_words: Option<usize>,
    pub end_pattern: Option<String>,
    pub drift_threshold: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerationSection {
    pub temperature: Option<f32>,
    pub max_tokens_general: Option<u32>,
    pub max_tokens_opinion: Option<u32>,
    pub max_tokens_greeting: Option<u32>,
}

/// Sampling settings resolved from `[generation]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens_general: u32,
    pub max_tokens_opinion: u32,
    pub max_tokens_greeting: u32,
}

impl GenerationSettings {
    pub const DEFAULT_TEMPERATURE: f32 = 0.8;
    pub const DEFAULT_MAX_TOKENS_GENERAL: u32 = 300;
    pub const DEFAULT_MAX_TOKENS_OPINION: u32 = 50;
    pub const DEFAULT_MAX_TOKENS_GREETING: u32 = 60;

    #[must_use]
    pub fn max_tokens_for(&self, kind: MessageKind) -> u32 {
        match kind {
            MessageKind::Greeting => self.max_tokens_greeting,
            MessageKind::Opinion => self.max_tokens_opinion,
            MessageKind::General => self.max_tokens_general,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: Self::DEFAULT_TEMPERATURE,
            max_tokens_general: Self::DEFAULT_MAX_TOKENS_GENERAL,
            max_tokens_opinion: Self::DEFAULT_MAX_TOKENS_OPINION,
            max_tokens_greeting: Self::DEFAULT_MAX_TOKENS_GREETING,
        }
    }
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let var = &after[..close];
        if !var.is_empty() {
            match env::var(var) {
                Ok(value) => out.push_str(&value),
                Err(_) => tracing::warn!(var, "Config references an unset environment variable"),
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn secs(value: Option<f64>) -> Option<Duration> {
    let value = value?;
    match Duration::try_from_secs_f64(value) {
        Ok(duration) => Some(duration),
        Err(err) => {
            tracing::warn!(value, "Ignoring invalid duration in config: {err}");
            None
        }
    }
}

impl PersonaConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        Self::load_from(path)
    }

    /// Load from an explicit path. A missing file is `Ok(None)`.
    pub fn load_from(path: PathBuf) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.app
            .as_ref()
            .and_then(|app| app.model.as_deref())
            .map(str::trim)
            .filter(|model| !model.is_empty())
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.app.as_ref().is_some_and(|app| app.debug)
    }

    /// `OPENAI_API_KEY` first, then `[api_keys].openai` with `${VAR}` expansion.
    #[must_use]
    pub fn openai_api_key(&self) -> Option<String> {
        let from_env = env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty());
        from_env.or_else(|| {
            self.api_keys
                .as_ref()
                .and_then(|keys| keys.openai.as_deref())
                .map(expand_env_vars)
                .filter(|key| !key.trim().is_empty())
        })
    }

    /// `None` when no requests-per-minute budget is configured or overridden.
    #[must_use]
    pub fn rate_limit(&self, rpm_override: Option<u32>) -> Option<RateLimitConfig> {
        let section = self.rate_limit.as_ref();
        let rpm = rpm_override.or_else(|| section.and_then(|s| s.requests_per_minute))?;
        let Some(rpm) = NonZeroU32::new(rpm) else {
            tracing::warn!("requests_per_minute = 0 disables rate limiting");
            return None;
        };

        let mut config = RateLimitConfig::new(rpm);
        if let Some(section) = section {
            if let Some(every) = section.cooldown_every {
                config.cooldown_every = every;
            }
            if let Some(cooldown) = secs(section.cooldown_secs) {
                config.cooldown = cooldown;
            }
        }
        Some(config)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::default();
        let Some(section) = self.retry.as_ref() else {
            return policy;
        };

        if let Some(max_attempts) = section.max_attempts {
            policy.max_attempts = max_attempts.max(1);
        }
        if let Some(delay) = secs(section.base_delay_secs) {
            policy.base_delay = delay;
        }
        if let Some(delay) = secs(section.max_delay_secs) {
            policy.max_delay = delay;
        }
        if let Some(jitter) = section.jitter_fraction
            && jitter.is_finite()
        {
            policy.jitter_fraction = jitter.max(0.0);
        }
        if let Some(retries) = section.transient_retries {
            policy.transient_retries = retries;
        }
        if let Some(delay) = secs(section.transient_delay_secs) {
            policy.transient_delay = delay;
        }
        let growth = policy.token_growth;
        policy.token_growth = TokenGrowth::new(
            section
                .max_token_doublings
                .unwrap_or(growth.max_doublings()),
            section.token_ceiling.unwrap_or(growth.ceiling()),
        );
        policy
    }

    #[must_use]
    pub fn context_config(&self) -> ContextConfig {
        let mut config = ContextConfig::default();
        let Some(section) = self.context.as_ref() else {
            return config;
        };

        if let Some(tokens) = section.max_context_tokens {
            config.max_context_tokens = tokens;
        }
        if let Some(window) = section.recent_window {
            config.recent_window = window;
        }
        if let Some(words) = section.brevity_words {
            config.brevity_words = words;
        }
        if let Some(markers) = &section.preserve_markers {
            config.preserve_markers.clone_from(markers);
        }
        if let Some(placeholder) = section
            .placeholder
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            config.placeholder = placeholder.to_string();
        }
        if let Some(interval) = section.reinforcement_interval {
            config.reinforcement_interval = interval;
        }
        config
    }

    #[must_use]
    pub fn reinforcement_text(&self) -> Option<&str> {
        self.context
            .as_ref()
            .and_then(|context| context.reinforcement_text.as_deref())
            .filter(|text| !text.trim().is_empty())
    }

    #[must_use]
    pub fn response_shape(&self) -> ResponseShape {
        let Some(section) = self.shape.as_ref() else {
            return ResponseShape::default();
        };
        let markers = match &section.markers {
            Some(markers) => MarkerSet::new(markers),
            None => MarkerSet::new(THINKING_MARKERS),
        };
        ResponseShape::new(
            section.max_words.unwrap_or(ResponseShape::DEFAULT_MAX_WORDS),
            markers,
            section.tag.clone(),
        )
    }

    #[must_use]
    pub fn adherence_scorer(&self) -> AdherenceScorer {
        let Some(section) = self.adherence.as_ref() else {
            return AdherenceScorer::default();
        };
        AdherenceScorer::new(
            MarkerSet::new(THINKING_MARKERS),
            section
                .end_pattern
                .clone()
                .unwrap_or_else(|| AdherenceScorer::DEFAULT_END_PATTERN.to_string()),
            section
                .brief_words
                .unwrap_or(AdherenceScorer::DEFAULT_BRIEF_WORDS),
            section.window.unwrap_or(AdherenceScorer::DEFAULT_WINDOW),
        )
    }

    #[must_use]
    pub fn drift_threshold(&self) -> Option<f32> {
        self.adherence
            .as_ref()
            .and_then(|adherence| adherence.drift_threshold)
    }

    #[must_use]
    pub fn generation(&self) -> GenerationSettings {
        let defaults = GenerationSettings::default();
        let Some(section) = self.generation.as_ref() else {
            return defaults;
        };
        GenerationSettings {
            temperature: section.temperature.unwrap_or(defaults.temperature),
            max_tokens_general: section
                .max_tokens_general
                .unwrap_or(defaults.max_tokens_general),
            max_tokens_opinion: section
                .max_tokens_opinion
                .unwrap_or(defaults.max_tokens_opinion),
            max_tokens_greeting: section
                .max_tokens_greeting
                .unwrap_or(defaults.max_tokens_greeting),
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".persona").join("config.toml"))
}
