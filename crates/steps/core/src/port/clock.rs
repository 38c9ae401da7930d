//! Injectable time source for the run and monitor steps.

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// Source of the current time and one-shot timers.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn new_timer(&self, duration: Duration) -> Box<dyn Timer>;
}

/// One-shot timer that can be re-armed.
#[async_trait]
pub trait Timer: Send {
    /// Completes when the timer fires and returns the firing time. Never
    /// completes while the timer is stopped. Cancel safe.
    async fn fired(&mut self) -> Instant;

    /// Re-arm the timer to fire after `duration`.
    fn reset(&mut self, duration: Duration);

    /// Disarm the timer. Returns whether it was armed.
    fn stop(&mut self) -> bool;
}

/// [`Clock`] backed by `tokio::time`; honours paused test time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl TokioClock {
    pub fn new() -> Self {
        Self
    }

    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self)
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn new_timer(&self, duration: Duration) -> Box<dyn Timer> {
        Box::new(TokioTimer {
            sleep: Box::pin(tokio::time::sleep(duration)),
            armed: true,
        })
    }
}

struct TokioTimer {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

#[async_trait]
impl Timer for TokioTimer {
    async fn fired(&mut self) -> Instant {
        if !self.armed {
            return std::future::pending().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
        Instant::now()
    }

    fn reset(&mut self, duration: Duration) {
        self.sleep.as_mut().reset(Instant::now() + duration);
        self.armed = true;
    }

    fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_duration() {
        let clock = TokioClock::new();
        let start = clock.now();
        let mut timer = clock.new_timer(Duration::from_secs(10));

        let fired_at = timer.fired().await;
        assert!(fired_at - start >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_timer_never_fires() {
        let clock = TokioClock::new();
        let mut timer = clock.new_timer(Duration::from_millis(1));
        assert!(timer.stop());
        assert!(!timer.stop());

        let outcome = tokio::time::timeout(Duration::from_secs(60), timer.fired()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_can_be_reset_after_firing() {
        let clock = TokioClock::new();
        let mut timer = clock.new_timer(Duration::from_secs(1));
        timer.fired().await;

        let before = clock.now();
        timer.reset(Duration::from_secs(3));
        let fired_at = timer.fired().await;
        assert!(fired_at - before >= Duration::from_secs(3));
    }
}
