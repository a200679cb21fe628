//! Second timer source

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::event::{Event, Tick};
use crate::source::{Emitter, Source, StopSignal};

/// Emits a [`Tick`] once per period, aligned to whole wall-clock seconds
///
/// Tick times are the wall clock at start plus monotonic elapsed time.
pub struct TimerSource {
    name: String,
    period: Duration,
}

impl TimerSource {
    /// One tick per second
    pub fn new() -> Self {
        Self::with_period(Duration::from_secs(1))
    }

    /// Custom period
    pub fn with_period(period: Duration) -> Self {
        Self {
            name: "timer".to_string(),
            period,
        }
    }
}

impl Default for TimerSource {
    fn default() -> Self {
        Self::new()
    }
}

fn until_next_second(now: SystemTime) -> Duration {
    let subsec = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    Duration::from_nanos(1_000_000_000 - subsec as u64)
}

impl Source for TimerSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(self, emitter: Emitter, mut stop: StopSignal) {
        let wall_start = SystemTime::now();
        let start = Instant::now();
        let mut ticker = interval_at(start + until_next_second(wall_start), self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                at = ticker.tick() => {
                    let tick = Tick::at(wall_start + (at - start));
                    if !emitter.emit(Event::Tick(tick)).await {
                        break;
                    }
                }
            }
        }
        debug!("{} stopped", self.name);
    }
}
