//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by rendering each [`AppEvent`] as one
//! `TAG | key=value` line on the console (UART / USB-CDC in production).

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started { total } => {
                info!("START | total={}", total);
            }
            AppEvent::PulsesCounted { added, total, lost } => {
                if *lost > 0 {
                    warn!("PULSE | added={} total={} lost={}", added, total, lost);
                } else {
                    info!("PULSE | added={} total={}", added, total);
                }
            }
            AppEvent::DemandChanged { demand } => {
                info!("DEMAND | value={}", demand);
            }
            AppEvent::Joined => {
                info!("JOIN | joined");
            }
            AppEvent::SteeringScheduled {
                delay_s,
                retry_count,
            } => {
                info!("JOIN | retry in {}s (retry={})", delay_s, retry_count);
            }
            AppEvent::SteeringHalted => {
                warn!("JOIN | attempts exhausted, steering halted");
            }
            AppEvent::Left => {
                warn!("JOIN | left network");
            }
            AppEvent::Slept {
                slept_ms,
                cause,
                pulse_counted,
            } => {
                info!(
                    "SLEEP | woke cause={:?} slept_ms={} pulse={}",
                    cause, slept_ms, pulse_counted
                );
            }
            AppEvent::BatteryUpdated {
                millivolts,
                percent_attr,
            } => {
                info!(
                    "BATT | mv={} pct={}%",
                    millivolts,
                    u16::from(*percent_attr) / 2
                );
            }
            AppEvent::OtaProgress { offset, expected } => {
                info!("OTA | {}/{} bytes", offset, expected);
            }
            AppEvent::OtaFinished { version } => {
                info!("OTA | finished version=0x{:08X}, restarting", version);
            }
            AppEvent::OtaFailed(e) => {
                warn!("OTA | failed: {}", e);
            }
            AppEvent::CounterReset => {
                info!("PULSE | counter reset");
            }
            AppEvent::Persisted { total } => {
                info!("NVS | saved total={}", total);
            }
            AppEvent::PersistFailed => {
                warn!("NVS | save failed, will retry");
            }
            AppEvent::FactoryReset => {
                warn!("RESET | factory reset");
            }
        }
    }
}
