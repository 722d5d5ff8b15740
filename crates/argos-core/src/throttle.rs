//! Politeness delay applied before every non-cached browser launch.
//!
//! Unlike a per-domain rate limiter, the delay is unconditional: every call
//! to [`PolitenessConfig::wait`] sleeps for the configured delay (plus jitter),
//! regardless of when the same host was last contacted.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Base delay plus optional random jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolitenessConfig {
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter)).
    /// `Duration::ZERO` disables it.
    pub jitter: Duration,
}

impl PolitenessConfig {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay for a single wait (delay + random jitter).
    pub fn effective_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let jitter_ms = rand_jitter_ms(self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(jitter_ms)
    }

    /// Sleep for the effective delay, or return early with
    /// [`AppError::Cancelled`] when `cancel` fires.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        let pause = self.effective_delay();
        if pause.is_zero() {
            return Ok(());
        }

        tracing::debug!(sleep_ms = pause.as_millis() as u64, "Politeness delay");
        tokio::select! {
            _ = tokio::time::sleep(pause) => Ok(()),
            _ = cancel.cancelled() => Err(AppError::Cancelled("during politeness delay".into())),
        }
    }
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

// ---------------------------------------------------------------------------
// Jitter from a time-seeded xorshift; not suitable for anything but timing.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
