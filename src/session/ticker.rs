use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// One subscription to a tick source
#[async_trait]
pub trait Ticker: Send {
    /// Resolve at the next tick
    async fn tick(&mut self);
}

/// Scheduler that hands out tick subscriptions
///
/// A session subscribes when it enters `Scanning` and drops the subscription
/// on every exit, so no timer outlives the scan.
pub trait TickSource: Send + Sync {
    fn subscribe(&self) -> Box<dyn Ticker>;
}

/// Fixed-period ticks; the first tick fires one period after subscribing
pub struct IntervalTickSource {
    period: Duration,
}

impl IntervalTickSource {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl TickSource for IntervalTickSource {
    fn subscribe(&self) -> Box<dyn Ticker> {
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        // A slow capture pushes later ticks back instead of bursting
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Box::new(IntervalTicker { interval })
    }
}

struct IntervalTicker {
    interval: Interval,
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
