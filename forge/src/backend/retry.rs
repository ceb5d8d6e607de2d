//! Bounded exponential backoff around a backend call.

use std::cell::Cell;
use std::time::Duration;

use backon::{BlockingRetryable, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{BackendError, CompletionRequest, GenerationBackend, RawResponse};

/// `[retry]` section of `.forge/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no sleeping.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1.0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be > 0".to_string());
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err("retry.max_backoff_ms must be >= retry.initial_backoff_ms".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("retry.multiplier must be >= 1.0".to_string());
        }
        Ok(())
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_factor(self.multiplier)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

/// Outcome of a retried call plus how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: T,
    pub attempts: u32,
}

/// Call `backend`, retrying rate-limit and transport failures per `policy`.
pub fn complete_with_retry<B: GenerationBackend + ?Sized>(
    backend: &B,
    request: &CompletionRequest<'_>,
    policy: &RetryPolicy,
) -> Attempted<Result<RawResponse, BackendError>> {
    let attempts = Cell::new(0u32);
    let result = (|| {
        attempts.set(attempts.get() + 1);
        backend.complete(request)
    })
    .retry(policy.backoff())
    .sleep(std::thread::sleep)
    .when(BackendError::is_retryable)
    .notify(|err: &BackendError, delay: Duration| {
        warn!(
            backend = backend.name(),
            attempt = attempts.get(),
            kind = err.kind(),
            delay_ms = delay.as_millis() as u64,
            "backend call failed, retrying"
        );
    })
    .call();
    Attempted {
        result,
        attempts: attempts.get(),
    }
}
