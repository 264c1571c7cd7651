//! Shared politeness budget for every request sent to Bandcamp.
//!
//! Two pieces of process-wide state live here:
//!
//! - a token-bucket rate limiter (`governor`) that admits at most
//!   `requests_per_second` requests regardless of who is asking
//! - a counter of high-priority blocks in flight; while it is non-zero,
//!   low-priority requests wait at the gate
//!
//! Both tiers draw from the same bucket, so interactive work gets precedence
//! but never extra throughput. Waiting is cooperative polling at
//! `poll_interval`; requests are delayed, never dropped.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Which tier a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Interactive, user-initiated work
    High,
    /// Background crawling
    Low,
}

pub struct Throttle {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    high_priority_in_flight: AtomicUsize,
    poll_interval: Duration,
}

impl Throttle {
    /// A throttle admitting `requests_per_second` (at least 1).
    pub fn new(requests_per_second: u32, poll_interval: Duration) -> Self {
        let rate = NonZeroU32::new(requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            high_priority_in_flight: AtomicUsize::new(0),
            poll_interval,
        }
    }

    /// Wait until a request of the given priority may be sent.
    ///
    /// Low-priority callers first wait for the high-priority tier to drain,
    /// and re-check it after every failed token attempt so a high-priority
    /// block that starts mid-wait still goes first.
    pub async fn admit(&self, priority: Priority) {
        loop {
            if priority == Priority::Low && self.high_priority_in_flight() > 0 {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }
            if self.limiter.check().is_ok() {
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run `work` as a high-priority block.
    ///
    /// The in-flight count drops when the block finishes, fails or is
    /// cancelled.
    pub async fn high_priority<F: Future>(&self, work: F) -> F::Output {
        let _guard = HighPriorityGuard::enter(&self.high_priority_in_flight);
        work.await
    }

    pub fn high_priority_in_flight(&self) -> usize {
        self.high_priority_in_flight.load(Ordering::Acquire)
    }
}

struct HighPriorityGuard<'a>(&'a AtomicUsize);

impl<'a> HighPriorityGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for HighPriorityGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
