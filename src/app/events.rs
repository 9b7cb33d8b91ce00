//! Outbound application events.
//!
//! The [`MeterService`](super::service::MeterService) emits these through
//! the [`EventSink`](super::ports::EventSink) port. The production sink
//! renders them as log lines; tests record them.

use crate::ota::OtaError;
use crate::power::WakeCause;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The service started with the persisted total.
    Started { total: u64 },

    /// A pulse batch was folded into the meter.
    PulsesCounted { added: u64, total: u64, lost: u32 },

    /// The published demand value moved.
    DemandChanged { demand: i32 },

    Joined,

    /// A steering retry or cooldown was armed.
    SteeringScheduled { delay_s: u32, retry_count: u8 },

    /// The attempt budget is spent and no cooldown is configured.
    SteeringHalted,

    Left,

    /// The node slept and woke again.
    Slept {
        slept_ms: u64,
        cause: WakeCause,
        pulse_counted: bool,
    },

    BatteryUpdated { millivolts: u16, percent_attr: u8 },

    OtaProgress { offset: u32, expected: u32 },

    /// The image is committed; a restart follows.
    OtaFinished { version: u32 },

    OtaFailed(OtaError),

    CounterReset,

    /// The total was written to storage.
    Persisted { total: u64 },

    PersistFailed,

    FactoryReset,
}
