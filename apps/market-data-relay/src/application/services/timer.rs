//! Single-slot timer.
//!
//! At most one pending deadline; scheduling again replaces it. Meant to be
//! polled from a `tokio::select!` loop that owns the timer.

use std::time::Duration;

use tokio::time::Instant;

/// Cancellable, replace-on-reschedule deadline.
#[derive(Debug, Default)]
pub struct SingleSlotTimer {
    deadline: Option<Instant>,
}

impl SingleSlotTimer {
    /// Create an idle timer.
    #[must_use]
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// Fire `delay` from now, replacing any pending deadline.
    pub fn schedule(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    /// Drop the pending deadline, if any.
    pub const fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether a deadline is pending.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve when the pending deadline passes, then clear it.
    ///
    /// Never resolves while idle, so an idle timer's branch in a `select!`
    /// simply never wins. Cancel safe: dropping the future keeps the deadline.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let mut timer = SingleSlotTimer::new();
        let start = Instant::now();
        timer.schedule(Duration::from_millis(250));

        timer.fired().await;

        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_deadline() {
        let mut timer = SingleSlotTimer::new();
        let start = Instant::now();
        timer.schedule(Duration::from_millis(100));
        timer.schedule(Duration::from_millis(400));

        timer.fired().await;

        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_never_fires() {
        let mut timer = SingleSlotTimer::new();
        timer.schedule(Duration::from_millis(10));
        timer.cancel();

        let fired = tokio::time::timeout(Duration::from_secs(60), timer.fired()).await;
        assert!(fired.is_err());
    }
}
