//! Shared provider call budget.

use std::num::NonZeroU32;

use governor::{Quota, RateLimiter};
use tokio::sync::Mutex;

use paperconcepts_shared::{PaperConceptsError, Result};

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Token bucket of provider calls per minute, shared by every concurrent
/// caller in a run. Waiters are served in arrival order.
pub struct CallRateLimiter {
    limiter: DefaultRateLimiter,
    queue: Mutex<()>,
}

impl CallRateLimiter {
    pub fn per_minute(calls: u32) -> Result<Self> {
        let calls = NonZeroU32::new(calls)
            .ok_or_else(|| PaperConceptsError::config("calls per minute must be > 0"))?;
        Ok(Self {
            limiter: RateLimiter::direct(Quota::per_minute(calls)),
            queue: Mutex::new(()),
        })
    }

    /// Wait for a call slot.
    pub async fn acquire(&self) {
        // tokio's mutex is fair, so the head of the queue gets the next slot
        let _turn = self.queue.lock().await;
        self.limiter.until_ready().await;
    }
}

impl std::fmt::Debug for CallRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRateLimiter").finish_non_exhaustive()
    }
}
