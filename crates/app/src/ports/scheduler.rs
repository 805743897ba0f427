//! Scheduler port — the single clock every timer in the controller uses.
//!
//! Expressing delays, periodic triggers and teardown deadlines against this
//! trait lets tests substitute a deterministic clock.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

/// Source of time and timed suspension points.
pub trait Scheduler: Send + Sync + 'static {
    /// Current instant on this scheduler's clock.
    fn now(&self) -> Instant;

    /// Resolve once the clock reaches `deadline`.
    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'static, ()>;

    /// Resolve after `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.sleep_until(self.now() + duration)
    }
}
