//! Chat-Completions request/response types and a single-attempt send.
//!
//! Request fields are chosen from the resolved [`ModelCapabilityProfile`]:
//! reasoning-profile models get `max_completion_tokens` and never a
//! temperature; traditional models get `max_tokens` and `temperature`.

use persona_types::{ApiUsage, ChatMessage, ModelCapabilityProfile, TokenLimitField};
use serde::{Deserialize, Serialize};

use crate::error::{RawError, RawErrorKind};
use crate::retry::Attempt;
use crate::{ApiConfig, read_capped_error_body};

/// Caller-level knobs for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub json_mode: bool,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self {
            max_tokens: 300,
            temperature: 0.7,
            json_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

impl ResponseFormat {
    pub const JSON_OBJECT: Self = Self {
        kind: "json_object",
    };
}

/// Outbound request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

impl<'a> ChatCompletionRequest<'a> {
    /// Build a body legal for `profile`. `completion_tokens` overrides
    /// `params.max_tokens` when a grown budget is in play.
    #[must_use]
    pub fn new(
        model: &'a str,
        messages: &'a [ChatMessage],
        profile: ModelCapabilityProfile,
        params: &RequestParams,
        completion_tokens: Option<u32>,
    ) -> Self {
        let limit =
            completion_tokens.unwrap_or_else(|| profile.completion_limit(params.max_tokens));
        let (max_tokens, max_completion_tokens) = match profile.token_limit_field() {
            TokenLimitField::MaxTokens => (Some(limit), None),
            TokenLimitField::MaxCompletionTokens => (None, Some(limit)),
        };
        let response_format = (params.json_mode && profile.accepts_json_mode())
            .then_some(ResponseFormat::JSON_OBJECT);

        Self {
            model,
            messages,
            max_tokens,
            max_completion_tokens,
            temperature: profile.temperature(params.temperature),
            response_format,
        }
    }

    #[must_use]
    pub const fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    #[must_use]
    pub const fn max_completion_tokens(&self) -> Option<u32> {
        self.max_completion_tokens
    }

    #[must_use]
    pub const fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    #[must_use]
    pub const fn json_mode(&self) -> bool {
        self.response_format.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletion {
    /// Text of the first choice; empty when the model returned none.
    #[must_use]
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn usage(&self) -> ApiUsage {
        self.usage.unwrap_or_default()
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.finish_reason.as_deref())
    }

    fn stopped_on_length_without_content(&self) -> bool {
        self.finish_reason() == Some("length") && self.content().trim().is_empty()
    }
}

/// Send one attempt. No retries here; failures come back as [`RawError`].
pub async fn send_chat_completion(
    client: &reqwest::Client,
    config: &ApiConfig,
    request: &ChatCompletionRequest<'_>,
    attempt: &Attempt,
) -> Result<ChatCompletion, RawError> {
    let builder = client
        .post(config.endpoint())
        .bearer_auth(config.api_key().as_str())
        .header("content-type", "application/json")
        .json(request);

    let response = attempt
        .apply_headers(builder)
        .send()
        .await
        .map_err(|e| RawError::transport(format!("request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = read_capped_error_body(response).await;
        return Err(RawError::status(status.as_u16(), body));
    }

    let completion: ChatCompletion = response
        .json()
        .await
        .map_err(|e| RawError::new(RawErrorKind::Decode, format!("invalid response body: {e}")))?;

    if completion.stopped_on_length_without_content() {
        return Err(RawError::new(
            RawErrorKind::Truncated,
            "max_tokens or model output limit was reached before any content",
        ));
    }

    Ok(completion)
}
