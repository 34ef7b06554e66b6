use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{info, trace};

/// Periodic liveness line in the log. It checks nothing beyond the process being alive.
pub struct HealthChecker {
    interval: Duration,
}

impl HealthChecker {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Beats forever, the first time one full interval after start.
    pub async fn run(self) {
        trace!(interval_secs = self.interval.as_secs(), "Starting health checks");
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            info!("Health check: System is operational");
        }
    }
}
