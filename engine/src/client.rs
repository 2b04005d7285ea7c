//! `GenerationClient` - rate limiting and retries composed around one endpoint.

use std::time::Duration;

use serde_json::Value;

use persona_providers::openai::{ChatCompletionRequest, RequestParams, send_chat_completion};
use persona_providers::rate_limit::{RateLimitConfig, RateLimiter};
use persona_providers::repair::{RepairTier, ResponseRepairer};
use persona_providers::retry::{CallPlan, RetryPolicy, RetryScheduler};
use persona_providers::{ApiConfig, error::TerminalError, http_client_for};
use persona_types::{
    ApiKey, ApiUsage, CapabilityResolver, ChatMessage, CompletionTokenBudget,
    ModelCapabilityProfile, ModelName, ModelParseError,
};

use crate::config::PersonaConfig;

/// System-prompt suffixes for each JSON ask. The first ask relies on JSON mode.
const JSON_ASKS: [Option<&str>; 3] = [
    None,
    Some("Respond ONLY with JSON."),
    Some("Respond with STRICT JSON only. No prose, no code fences."),
];

#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error("no API key: set OPENAI_API_KEY or [api_keys].openai")]
    MissingApiKey,
    #[error("invalid model name: {0}")]
    InvalidModel(#[from] ModelParseError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Caller overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub model: Option<String>,
    pub requests_per_minute: Option<u32>,
    pub debug: Option<bool>,
    pub endpoint: Option<String>,
}

/// One successful completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: ApiUsage,
    pub finish_reason: Option<String>,
}

/// Result of [`GenerationClient::complete_json`].
#[derive(Debug, Clone, PartialEq)]
pub struct JsonReply {
    pub value: Value,
    pub tier: RepairTier,
    /// Asks sent before the value was produced (the fallback reports all of them).
    pub asks: u32,
}

#[derive(Debug)]
pub struct GenerationClient {
    http: reqwest::Client,
    api: ApiConfig,
    profile: ModelCapabilityProfile,
    limiter: Option<RateLimiter>,
    scheduler: RetryScheduler,
    call_timeout: Option<Duration>,
    debug: bool,
}

impl GenerationClient {
    /// Default parameters for [`Self::complete_json`].
    pub const JSON_PARAMS: RequestParams = RequestParams {
        max_tokens: 600,
        temperature: 0.0,
        json_mode: true,
    };

    /// The capability profile is resolved here, once.
    pub fn new(
        api: ApiConfig,
        policy: RetryPolicy,
        rate_limit: Option<RateLimitConfig>,
    ) -> Result<Self, ClientBuildError> {
        let http = http_client_for(api.endpoint())?;
        let profile = CapabilityResolver::default().resolve_model(api.model());
        tracing::debug!(
            model = %api.model(),
            token_field = profile.token_limit_field().as_str(),
            sampling = profile.accepts_sampling_params(),
            "Resolved model capabilities"
        );

        Ok(Self {
            http,
            api,
            profile,
            limiter: rate_limit.map(RateLimiter::new),
            scheduler: RetryScheduler::new(policy),
            call_timeout: None,
            debug: false,
        })
    }

    /// Build from config plus caller overrides. Options win over the file.
    pub fn from_config(
        config: &PersonaConfig,
        options: ClientOptions,
    ) -> Result<Self, ClientBuildError> {
        let key = config
            .openai_api_key()
            .ok_or(ClientBuildError::MissingApiKey)?;
        let api_key = ApiKey::new(key).map_err(|_| ClientBuildError::MissingApiKey)?;

        let model = match options.model.as_deref().or(config.model()) {
            Some(raw) => ModelName::parse(raw)?,
            None => ModelName::default(),
        };

        let mut api = ApiConfig::new(api_key, model);
        if let Some(endpoint) = options.endpoint {
            api = api.with_endpoint(endpoint);
        }

        let client = Self::new(
            api,
            config.retry_policy(),
            config.rate_limit(options.requests_per_minute),
        )?;
        Ok(client.with_debug(options.debug.unwrap_or_else(|| config.debug())))
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Abort the retry loop between attempts once `timeout` has elapsed.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn model(&self) -> &ModelName {
        self.api.model()
    }

    #[must_use]
    pub fn profile(&self) -> ModelCapabilityProfile {
        self.profile
    }

    #[must_use]
    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// One logical call: limiter, retries and budget growth included.
    ///
    /// The limiter is acquired before every attempt, retries included.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        params: RequestParams,
    ) -> Result<Completion, TerminalError> {
        let mut plan = CallPlan::new();
        if self.profile.grows_completion_budget() {
            plan = plan.with_budget(CompletionTokenBudget::clamped(
                self.profile.completion_limit(params.max_tokens),
                self.scheduler.policy().token_growth,
            ));
        }
        if let Some(timeout) = self.call_timeout {
            plan = plan.with_timeout(timeout);
        }

        let this = self;
        let params = &params;
        let completion = self
            .scheduler
            .execute(plan, move |attempt| async move {
                let request = ChatCompletionRequest::new(
                    this.api.model().as_str(),
                    messages,
                    this.profile,
                    params,
                    attempt.completion_tokens,
                );

                if let Some(limiter) = &this.limiter {
                    limiter.acquire().await;
                }
                if this.debug {
                    tracing::info!(
                        attempt = attempt.number,
                        model = %this.api.model(),
                        messages = messages.len(),
                        max_tokens = ?request.max_tokens(),
                        max_completion_tokens = ?request.max_completion_tokens(),
                        temperature = ?request.temperature(),
                        json_mode = request.json_mode(),
                        "Sending completion request"
                    );
                }

                send_chat_completion(&this.http, &this.api, &request, &attempt).await
            })
            .await?;

        let usage = completion.usage();
        if self.debug {
            tracing::info!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                finish_reason = ?completion.finish_reason(),
                "Completion usage"
            );
        }

        Ok(Completion {
            text: completion.content().to_string(),
            usage,
            finish_reason: completion.finish_reason().map(str::to_string),
        })
    }

    /// Ask for JSON, re-asking with stricter instructions, then fall back.
    ///
    /// Never fails: after the last ask the repairer's default is returned.
    /// `params.json_mode` only applies to the first ask.
    pub async fn complete_json(
        &self,
        system: &str,
        user: &str,
        params: RequestParams,
        repairer: &ResponseRepairer,
    ) -> JsonReply {
        let mut asks = 0;
        for (index, suffix) in JSON_ASKS.iter().enumerate() {
            asks += 1;
            let system = match suffix {
                Some(suffix) => format!("{system}\n\n{suffix}"),
                None => system.to_string(),
            };
            let messages = [ChatMessage::system(system), ChatMessage::user(user)];
            let params = RequestParams {
                json_mode: index == 0 && params.json_mode && self.profile.accepts_json_mode(),
                ..params
            };

            match self.complete(&messages, params).await {
                Ok(completion) => match repairer.parse_structured(&completion.text) {
                    Ok(repaired) => {
                        return JsonReply {
                            value: repaired.value,
                            tier: repaired.tier,
                            asks,
                        };
                    }
                    Err(err) => {
                        tracing::warn!(ask = asks, "Unparseable JSON reply: {err}");
                    }
                },
                Err(err) => {
                    tracing::warn!(ask = asks, class = ?err.class(), "JSON ask failed: {err}");
                }
            }
        }

        tracing::warn!(asks, "Falling back to default JSON payload");
        let repaired = repairer.fallback_value();
        JsonReply {
            value: repaired.value,
            tier: repaired.tier,
            asks,
        }
    }
}
