//! Cancellable timers owned by the room session.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, Instant, Sleep};

/// A timer that can be armed and disarmed from the session loop.
///
/// [`RoomTimer::fired`] never completes while disarmed, so it can sit in a
/// `tokio::select!` branch unconditionally. The pending sleep lives in the
/// timer, so dropping the `fired` future when another branch wins loses
/// nothing.
pub struct RoomTimer {
    period: Duration,
    repeating: bool,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl RoomTimer {
    /// Fires every `period` while armed.
    pub fn interval(period: Duration) -> Self {
        Self {
            period,
            repeating: true,
            deadline: None,
        }
    }

    /// Fires once, `period` after being armed.
    pub fn deadline(period: Duration) -> Self {
        Self {
            period,
            repeating: false,
            deadline: None,
        }
    }

    /// Starts the timer unless it is already running.
    pub fn arm(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Box::pin(sleep(self.period)));
        }
    }

    /// Stops the timer.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Completes when the timer fires.
    pub async fn fired(&mut self) {
        let Some(deadline) = self.deadline.as_mut() else {
            std::future::pending::<()>().await;
            return;
        };
        deadline.as_mut().await;

        if self.repeating {
            // Schedule from the previous deadline so ticks do not drift.
            let mut next = deadline.deadline() + self.period;
            let now = Instant::now();
            if next <= now {
                next = now + self.period;
            }
            deadline.as_mut().reset(next);
        } else {
            self.deadline = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn interval_fires_repeatedly_until_disarmed() {
        let mut timer = RoomTimer::interval(Duration::from_secs(5));
        timer.arm();
        let start = Instant::now();

        timer.fired().await;
        timer.fired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        timer.disarm();
        let outcome = tokio::time::timeout(Duration::from_secs(60), timer.fired()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_once() {
        let mut timer = RoomTimer::deadline(Duration::from_secs(3));
        timer.arm();
        timer.fired().await;
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_a_running_timer_keeps_its_deadline() {
        let mut timer = RoomTimer::deadline(Duration::from_secs(3));
        let start = Instant::now();
        timer.arm();
        tokio::time::advance(Duration::from_secs(2)).await;
        timer.arm();
        timer.fired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
