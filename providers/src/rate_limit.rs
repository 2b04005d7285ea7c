//! Request pacing for a requests-per-minute budget.
//!
//! All acquisitions are serialized through one async mutex which is held
//! across the wait, so two callers can never compute the spacing from the same
//! stale `last_request` read.

use std::num::NonZeroU32;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};

/// Pacing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests_per_minute: NonZeroU32,
    /// Insert `cooldown` after every Nth request; 0 disables it.
    pub cooldown_every: u32,
    pub cooldown: Duration,
}

impl RateLimitConfig {
    pub const DEFAULT_COOLDOWN_EVERY: u32 = 10;
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

    #[must_use]
    pub fn new(requests_per_minute: NonZeroU32) -> Self {
        Self {
            requests_per_minute,
            cooldown_every: Self::DEFAULT_COOLDOWN_EVERY,
            cooldown: Self::DEFAULT_COOLDOWN,
        }
    }

    /// Minimum spacing between two request starts: `60s / rpm`.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(60) / self.requests_per_minute.get()
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    last_request: Option<Instant>,
    request_count: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until the next request is permitted, then claim the slot.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        if let Some(last) = state.last_request {
            let ready = last + self.config.min_interval();
            let now = Instant::now();
            if ready > now {
                tracing::debug!(
                    wait_ms = (ready - now).as_millis(),
                    request_count = state.request_count,
                    "Pacing request"
                );
                sleep_until(ready).await;
            }
        }

        state.request_count += 1;
        let every = u64::from(self.config.cooldown_every);
        if every > 0 && state.request_count % every == 0 {
            tracing::debug!(
                request_count = state.request_count,
                cooldown_ms = self.config.cooldown.as_millis(),
                "Burst cooldown"
            );
            sleep(self.config.cooldown).await;
        }

        state.last_request = Some(Instant::now());
    }

    /// Requests admitted so far.
    pub async fn request_count(&self) -> u64 {
        self.state.lock().await.request_count
    }
}
