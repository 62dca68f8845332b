//! Cycle scheduling.
//!
//! Plans the instants at which the evaluator runs, relative to the
//! settlement time. Cycle numbers are dense, starting at 1, and the
//! number space never shifts: a planned instant that is already more
//! than one full interval in the past is dropped and counted, not
//! coalesced into the next cycle.

use pairscope_core::Sampling;
use std::time::{Duration, Instant};

/// No cycle fires within this margin before settlement.
pub const SETTLEMENT_GRACE: Duration = Duration::from_secs(2);

/// One planned evaluator invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedCycle {
    /// Dense 1-based number.
    pub number: u32,
    /// The instant this cycle was planned for (not when it ran).
    pub planned_at: Instant,
}

/// Scheduler poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A cycle is due now. `skipped` counts planned cycles that were
    /// dropped because their instants were already a full interval old.
    Due { cycle: PlannedCycle, skipped: u32 },
    /// Nothing due; sleep until the given instant.
    Wait(Instant),
    /// The window is exhausted. `skipped` counts planned cycles that
    /// overload pushed past the end of the window.
    Finished { skipped: u32 },
}

/// Cycle planner for one market's lifetime.
#[derive(Debug)]
pub struct CycleSchedule {
    interval: Duration,
    next_at: Instant,
    next_number: u32,
    deadline: Instant,
    /// FIXED_COUNT caps the total number of cycles.
    max_cycles: Option<u32>,
}

impl CycleSchedule {
    /// Plan cycles from `now` (a mid-window join starts immediately)
    /// until `time_remaining` minus the settlement grace.
    pub fn new(sampling: Sampling, now: Instant, time_remaining: Duration) -> Self {
        let runway = time_remaining.saturating_sub(SETTLEMENT_GRACE);
        let deadline = now + runway;

        let (interval, max_cycles) = match sampling {
            Sampling::FixedInterval { interval_seconds } => {
                (Duration::from_secs(interval_seconds.max(1)), None)
            }
            Sampling::FixedCount { cycles_per_market } => {
                let cycles = cycles_per_market.max(1);
                // First cycle at now, last at the grace deadline.
                let interval = if cycles > 1 {
                    runway / (cycles - 1)
                } else {
                    runway
                };
                (interval.max(Duration::from_secs(1)), Some(cycles))
            }
        };

        Self {
            interval,
            next_at: now,
            next_number: 1,
            deadline,
            max_cycles,
        }
    }

    /// Planned cadence in seconds.
    pub fn interval_seconds(&self) -> u64 {
        self.interval.as_secs().max(1)
    }

    /// Poll the planner against the current instant.
    pub fn poll(&mut self, now: Instant) -> Tick {
        if self.past_end(self.next_number, self.next_at) {
            return Tick::Finished { skipped: 0 };
        }
        if now < self.next_at {
            return Tick::Wait(self.next_at);
        }

        // Drop planned instants that are already a full interval old.
        let late = now.duration_since(self.next_at);
        let skipped = (late.as_micros() / self.interval.as_micros().max(1)) as u32;
        let number = self.next_number + skipped;
        let planned_at = self.next_at + self.interval * skipped;

        // Skipping may run the plan off the end of the window; the
        // dropped cycles still count against the market.
        if self.past_end(number, planned_at) {
            let dropped = self.plannable_from(self.next_number);
            self.next_number = number;
            self.next_at = planned_at;
            return Tick::Finished { skipped: dropped };
        }

        let cycle = PlannedCycle { number, planned_at };
        self.next_number = number + 1;
        self.next_at = planned_at + self.interval;
        Tick::Due { cycle, skipped }
    }

    fn past_end(&self, number: u32, at: Instant) -> bool {
        if at > self.deadline {
            return true;
        }
        match self.max_cycles {
            Some(max) => number > max,
            None => false,
        }
    }

    /// Planned cycles left in the window, starting at `number`.
    fn plannable_from(&self, number: u32) -> u32 {
        let by_deadline = {
            let left = self.deadline.saturating_duration_since(self.next_at);
            (left.as_micros() / self.interval.as_micros().max(1)) as u32 + 1
        };
        match self.max_cycles {
            Some(max) => by_deadline.min(max.saturating_sub(number - 1)),
            None => by_deadline,
        }
    }
}
