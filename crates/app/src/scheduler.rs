//! Scheduler backed by the tokio clock.

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::ports::Scheduler;

/// [`Scheduler`] over `tokio::time`.
///
/// Under `#[tokio::test(start_paused = true)]` the tokio clock is virtual and
/// auto-advances when every task is idle, which makes this the deterministic
/// test scheduler as well.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'static, ()> {
        tokio::time::sleep_until(deadline).boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn should_resume_exactly_at_deadline_when_clock_is_paused() {
        let scheduler = TokioScheduler;
        let start = scheduler.now();
        scheduler.sleep(Duration::from_secs(90)).await;
        assert_eq!(scheduler.now() - start, Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_wait_when_deadline_already_passed() {
        let scheduler = TokioScheduler;
        let start = scheduler.now();
        tokio::time::advance(Duration::from_secs(5)).await;
        scheduler.sleep_until(start).await;
        assert_eq!(scheduler.now() - start, Duration::from_secs(5));
    }
}
