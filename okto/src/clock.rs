//! Instruction pacing and the 60 Hz timer cadence.
use std::time::Duration;

use crate::constants::*;

/// Two-clock scheduler state.
///
/// The instruction clock targets one fetch-decode-execute cycle per
/// `1/IPS` seconds. The timer clock decrements the hardware timers at
/// most once per 1/60th of a second, independent of how many
/// instructions ran in that interval. Decoupling the two keeps timer
/// countdown faithful even though the instruction rate is a tunable
/// approximation.
pub(crate) struct Scheduler {
    /// Wall time budget for one instruction, `1/IPS`. Zero disables
    /// pacing.
    cycle: Duration,
    /// Elapsed time accumulated toward the next timer decrement.
    timer_acc: Duration,
}

impl Scheduler {
    pub(crate) fn new(cycle: Duration) -> Self {
        Self {
            cycle,
            timer_acc: Duration::ZERO,
        }
    }

    /// Discard accumulated time in preparation for a fresh startup.
    pub(crate) fn reset(&mut self) {
        self.timer_acc = Duration::ZERO;
    }

    /// Fold one instruction's elapsed wall time into the accumulator
    /// and return the number of 1/60 s timer decrements now due.
    pub(crate) fn advance(&mut self, elapsed: Duration) -> u32 {
        self.timer_acc += elapsed;

        let mut ticks = 0;
        while self.timer_acc >= TIMER_INTERVAL {
            self.timer_acc -= TIMER_INTERVAL;
            ticks += 1;
        }
        ticks
    }

    /// Remaining sleep budget for the current cycle:
    /// `1/IPS - (elapsed + accumulator carry)`.
    pub(crate) fn budget(&self, elapsed: Duration) -> Duration {
        self.cycle.saturating_sub(elapsed + self.timer_acc)
    }
}
