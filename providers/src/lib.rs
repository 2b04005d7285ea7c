//! Transport to a Chat-Completions style endpoint.
//!
//! # Architecture
//!
//! - [`openai`] - request/response types and a single-attempt send
//! - [`retry`] - [`RetryScheduler`](retry::RetryScheduler), classification-driven retries
//! - [`rate_limit`] - [`RateLimiter`](rate_limit::RateLimiter), requests-per-minute pacing
//! - [`error`] - raw failure signals, [`ErrorClass`](error::ErrorClass), terminal errors
//! - [`repair`] - tiered JSON repair of model replies
//!
//! Nothing here retries on its own: callers compose the limiter and the
//! scheduler around [`openai::send_chat_completion`].
//!
//! # Configuration
//!
//! Use [`ApiConfig`] to bundle the credential, model, and endpoint.

pub mod error;
pub mod openai;
pub mod rate_limit;
pub mod repair;
pub mod retry;

use std::time::Duration;

use reqwest::{Client, Response, redirect};

use persona_types::{ApiKey, ModelName};

pub use persona_types;

/// Canonical Chat Completions endpoint.
pub const CHAT_COMPLETIONS_API_URL: &str = "https://api.openai.com/v1/chat/completions";

const CONNECT_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 120;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Build the HTTP client for `endpoint`.
///
/// HTTPS is enforced unless the endpoint itself is plain HTTP (local mocks,
/// self-hosted gateways).
pub fn http_client_for(endpoint: &str) -> Result<Client, reqwest::Error> {
    let https_only = !endpoint.starts_with("http://");
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .redirect(redirect::Policy::none())
        .https_only(https_only)
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .build()
}

pub async fn read_capped_error_body(mut response: Response) -> String {
    let mut body = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Credential + model + endpoint.
///
/// ```rust
/// use persona_providers::ApiConfig;
/// use persona_types::{ApiKey, ModelName};
///
/// let config = ApiConfig::new(ApiKey::new("test").unwrap(), ModelName::default())
///     .with_endpoint("http://127.0.0.1:8080/v1/chat/completions");
/// assert!(config.endpoint().starts_with("http://"));
/// ```
#[derive(Debug, Clone)]
pub struct ApiConfig {
    api_key: ApiKey,
    model: ModelName,
    endpoint: String,
}

impl ApiConfig {
    #[must_use]
    pub fn new(api_key: ApiKey, model: ModelName) -> Self {
        Self {
            api_key,
            model,
            endpoint: CHAT_COMPLETIONS_API_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    #[must_use]
    pub fn model(&self) -> &ModelName {
        &self.model
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
