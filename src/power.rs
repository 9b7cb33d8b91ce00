//! Sleep admission.
//!
//! The mesh stack announces when it could enter light sleep; [`SleepGate`]
//! decides whether it may. Sleep is denied while membership is pending,
//! while any wake-capable input is already asserted (a level wake source
//! that is active would wake the chip straight back up), and during the
//! grace window after a join.
//!
//! On wake, an EXT1 level wake on the pulse input is forwarded to the
//! pulse pipeline, since the edge interrupt may not have run while the
//! chip was asleep.

use log::{debug, info};

use crate::network::JoinPhase;
use crate::app::ports::WakePins;
use crate::sensors::pulse::PulseCounter;

/// Minimum spacing between "sleep skipped" log lines.
pub const SKIP_LOG_INTERVAL_US: u64 = 5_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    Timer,
    /// Level wake; `status` holds one bit per triggering GPIO.
    Ext1 { status: u64 },
    Gpio,
    Undefined,
    Other(u32),
}

/// What the sleep primitive reports on return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeInfo {
    pub cause: WakeCause,
    pub slept_us: u64,
    /// Monotonic time at wake.
    pub woke_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepDenied {
    NotJoined,
    PinAsserted(&'static str),
    GraceWindow { remaining_us: u64 },
}

pub struct SleepGate {
    blocked_until: Option<u64>,
    last_skip_log: Option<u64>,
    pulse_gpio: i32,
}

impl SleepGate {
    pub fn new(pulse_gpio: i32) -> Self {
        Self {
            blocked_until: None,
            last_skip_log: None,
            pulse_gpio,
        }
    }

    /// Deny sleep until `now + duration_us`. Never shortens an existing block.
    pub fn block_for(&mut self, now: u64, duration_us: u64) {
        let until = now.saturating_add(duration_us);
        if self.blocked_until.is_none_or(|b| until > b) {
            self.blocked_until = Some(until);
        }
    }

    pub fn blocked_until(&self) -> Option<u64> {
        self.blocked_until
    }

    pub fn check(
        &self,
        phase: JoinPhase,
        pins: &mut dyn WakePins,
        now: u64,
    ) -> Result<(), SleepDenied> {
        if phase != JoinPhase::Joined {
            return Err(SleepDenied::NotJoined);
        }
        if let Some(pin) = pins.asserted() {
            return Err(SleepDenied::PinAsserted(pin));
        }
        match self.blocked_until {
            Some(until) if now < until => Err(SleepDenied::GraceWindow {
                remaining_us: until - now,
            }),
            _ => Ok(()),
        }
    }

    /// [`check`](Self::check), logging the reason for a denial at most
    /// once per [`SKIP_LOG_INTERVAL_US`].
    pub fn can_sleep(&mut self, phase: JoinPhase, pins: &mut dyn WakePins, now: u64) -> bool {
        let Err(reason) = self.check(phase, pins, now) else {
            return true;
        };
        let due = self
            .last_skip_log
            .is_none_or(|last| now.saturating_sub(last) >= SKIP_LOG_INTERVAL_US);
        if due {
            self.last_skip_log = Some(now);
            match reason {
                SleepDenied::NotJoined => info!("SLEEP | skip reason=not_joined phase={:?}", phase),
                SleepDenied::PinAsserted(pin) => info!("SLEEP | skip reason=pin_low pin={}", pin),
                SleepDenied::GraceWindow { remaining_us } => info!(
                    "SLEEP | skip reason=post_join remaining_ms={}",
                    remaining_us / 1000
                ),
            }
        }
        false
    }

    /// Feed a level wake on the pulse input into the pipeline.
    ///
    /// Returns true if it was counted as a pulse.
    pub fn on_wake(&self, info: &WakeInfo, pulses: &PulseCounter) -> bool {
        debug!("SLEEP | wake cause={:?} slept_ms={}", info.cause, info.slept_us / 1000);
        let WakeCause::Ext1 { status } = info.cause else {
            return false;
        };
        let Ok(bit) = u32::try_from(self.pulse_gpio) else {
            return false;
        };
        let hit = bit < 64 && status & (1u64 << bit) != 0;
        hit && pulses.record_level_wake(info.woke_at)
    }
}
