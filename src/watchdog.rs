/// Output-silence watchdog.
///
/// A fixed-period ticker drives the liveness check; [`SilenceCounter`] counts
/// consecutive ticks with no child output. Once the counter sits at the
/// limit, the next silent tick is the one that escalates to a kill.
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// What a tick means for the child's liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickVerdict {
    /// Still under the limit; carries the updated silent tick count.
    Tolerated { silent_ticks: u32 },
    /// The limit was already reached before this tick.
    Exceeded,
}

/// Consecutive silent tick counter, bounded by `max_silent_ticks`.
#[derive(Debug)]
pub struct SilenceCounter {
    silent_ticks: u32,
    max_silent_ticks: u32,
}

impl SilenceCounter {
    pub fn new(max_silent_ticks: u32) -> Self {
        Self {
            silent_ticks: 0,
            max_silent_ticks,
        }
    }

    /// Record a tick with no activity since the previous one.
    pub fn on_tick(&mut self) -> TickVerdict {
        if self.silent_ticks < self.max_silent_ticks {
            self.silent_ticks += 1;
            TickVerdict::Tolerated {
                silent_ticks: self.silent_ticks,
            }
        } else {
            TickVerdict::Exceeded
        }
    }

    /// Child produced output: start counting from zero again.
    pub fn reset(&mut self) {
        self.silent_ticks = 0;
    }

    pub fn silent_ticks(&self) -> u32 {
        self.silent_ticks
    }
}

/// Ticker that first fires one full `period` after now.
///
/// Late ticks are delivered in a burst rather than skipped, so every elapsed
/// period counts as one liveness check.
pub fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
    interval
}
