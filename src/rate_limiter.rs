//! Shared-gate rate limiter for outbound provider calls
//!
//! Every provider call in a run — listing, metadata fetches, batch
//! mutations, label and rule creation — passes through one shared instance,
//! including calls issued from concurrent fan-out workers. The gate spaces
//! permits at least `1000 / requests_per_second` ms apart; the last-permit
//! timestamp is updated in a single locked read-modify-write, so the spacing
//! holds no matter how many workers share the limiter.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::trace;

/// Interval rate limiter; `clone()` shares the underlying gate.
#[derive(Debug)]
pub struct RateLimiter {
    inner: Arc<Mutex<LimiterState>>,
    interval: Duration,
}

#[derive(Debug)]
struct LimiterState {
    /// Slot granted to the most recent permit
    last_permit: Option<Instant>,
    total_permits: u64,
    total_wait: Duration,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let rps = requests_per_second.max(1);
        Self {
            inner: Arc::new(Mutex::new(LimiterState {
                last_permit: None,
                total_permits: 0,
                total_wait: Duration::ZERO,
            })),
            interval: Duration::from_secs_f64(1.0 / f64::from(rps)),
        }
    }

    /// Block cooperatively until the next permit slot, then claim it.
    ///
    /// The lock is held across the sleep so concurrent waiters queue and
    /// each claims a distinct slot spaced one interval apart.
    pub async fn wait(&self) {
        let mut state = self.inner.lock().await;

        let now = Instant::now();
        let slot = match state.last_permit {
            Some(last) => {
                let earliest = last + self.interval;
                if earliest > now {
                    earliest
                } else {
                    now
                }
            }
            None => now,
        };

        let delay = slot.saturating_duration_since(now);
        if !delay.is_zero() {
            trace!("Rate limiter waiting {:?} for next slot", delay);
            tokio::time::sleep(delay).await;
        }

        state.last_permit = Some(slot);
        state.total_permits += 1;
        state.total_wait += delay;
    }

    /// Snapshot of usage counters
    pub async fn stats(&self) -> LimiterStats {
        let state = self.inner.lock().await;
        LimiterStats {
            total_permits: state.total_permits,
            total_wait: state.total_wait,
        }
    }

    /// Configured minimum spacing between permits
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            interval: self.interval,
        }
    }
}

/// Usage counters for end-of-run reporting
#[derive(Debug, Clone)]
pub struct LimiterStats {
    pub total_permits: u64,
    pub total_wait: Duration,
}
