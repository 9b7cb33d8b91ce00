//! Meter configuration parameters
//!
//! All tunable parameters for the pulse meter node. Defaults are the
//! factory values; a stored blob in NVS (`meter/cfg`) overrides them.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::metering::variant::MeterVariant;
use crate::pins;

/// Core meter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterConfig {
    pub pulse: PulseConfig,
    /// Which utility this node meters (selects unit and device type).
    pub variant: MeterVariant,
    pub demand: DemandConfig,
    pub steering: SteeringConfig,
    pub network: NetworkConfig,
    pub battery: BatteryConfig,
    pub persist: PersistConfig,
    pub reset_button: ResetButtonConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseConfig {
    /// Pulses per reported unit (kWh or m³). Becomes the metering divisor.
    pub pulses_per_unit: u32,
    /// Minimum spacing between two counted edges (ms).
    pub debounce_ms: u16,
    /// Minimum low time of a pulse (ms). 0 disables the width check.
    pub min_width_ms: u16,
    /// RTC-capable input the pulse contact is wired to.
    pub gpio: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemandConfig {
    /// Time constant of the rise filter (s).
    pub rise_tau_s: f64,
    /// Time constant of the idle decay (s).
    pub decay_tau_s: f64,
    /// Demand is forced to zero after this long without a pulse. 0 disables.
    pub idle_timeout_s: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SteeringConfig {
    /// Attempts per burst before cooldown or halt. 0 means unlimited.
    pub max_attempts: u32,
    /// Cooldown once the budget is spent. 0 halts retrying instead.
    pub cooldown_s: u32,
    /// Upper bound for a single backoff delay (s).
    pub max_backoff_s: u32,
    /// TX power while steering (dBm).
    pub join_tx_power_dbm: i8,
    /// TX power once joined (dBm).
    pub tx_power_dbm: i8,
    /// Sleep is refused for this long after a successful join (s).
    pub post_join_sleep_block_s: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    pub min_interval_s: u16,
    pub max_interval_s: u16,
    pub reportable_change: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// IEEE 802.15.4 channel bitmap (bits 11–26).
    pub channel_mask: u32,
    /// Local application endpoint.
    pub endpoint: u8,
    /// Short address that receives reports. 0xFFFF disables binding.
    pub report_dst_short: u16,
    pub report_dst_endpoint: u8,
    pub summation_report: ReportConfig,
    pub demand_report: ReportConfig,
    pub battery_report: ReportConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryConfig {
    pub empty_mv: u16,
    pub full_mv: u16,
    pub divider_top_ohm: u32,
    pub divider_bottom_ohm: u32,
    /// Percent change (whole percent) before a new percentage is published.
    pub report_hysteresis_pct: u8,
    pub sample_period_s: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistConfig {
    /// Longest interval between saves of a dirty counter (s).
    pub save_interval_s: u32,
    /// Save early once pulses have been quiet this long (s).
    pub idle_save_s: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResetButtonConfig {
    /// Factory-reset input; `None` when the board has no button.
    pub gpio: Option<i32>,
    pub hold_ms: u32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            pulse: PulseConfig {
                pulses_per_unit: 1000,
                debounce_ms: 50,
                min_width_ms: 0,
                gpio: pins::PULSE_GPIO,
            },
            variant: MeterVariant::Electric,
            demand: DemandConfig {
                rise_tau_s: 10.0,
                decay_tau_s: 300.0,
                idle_timeout_s: 60,
            },
            steering: SteeringConfig {
                max_attempts: 0,
                cooldown_s: 0,
                max_backoff_s: 60,
                join_tx_power_dbm: 20,
                tx_power_dbm: 10,
                post_join_sleep_block_s: 30,
            },
            network: NetworkConfig {
                channel_mask: 0x07FF_F800,
                endpoint: 1,
                report_dst_short: 0x0000,
                report_dst_endpoint: 1,
                summation_report: ReportConfig {
                    min_interval_s: 10,
                    max_interval_s: 3600,
                    reportable_change: 1,
                },
                demand_report: ReportConfig {
                    min_interval_s: 10,
                    max_interval_s: 3600,
                    reportable_change: 1,
                },
                battery_report: ReportConfig {
                    min_interval_s: 3600,
                    max_interval_s: 43_200,
                    reportable_change: 2,
                },
            },
            battery: BatteryConfig {
                empty_mv: 2000,
                full_mv: 3000,
                divider_top_ohm: 1_000_000,
                divider_bottom_ohm: 1_000_000,
                report_hysteresis_pct: 2,
                sample_period_s: 3600,
            },
            persist: PersistConfig {
                save_interval_s: 60,
                idle_save_s: 5,
            },
            reset_button: ResetButtonConfig {
                gpio: Some(pins::RESET_BUTTON_GPIO),
                hold_ms: 8000,
            },
        }
    }
}

impl MeterConfig {
    /// Range-check every field. Invalid configs are rejected, not clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pulse.pulses_per_unit == 0 {
            return Err(ConfigError::ValidationFailed("pulses_per_unit must be > 0"));
        }
        if !pins::is_wake_capable(self.pulse.gpio) {
            return Err(ConfigError::ValidationFailed(
                "pulse gpio must be RTC-capable",
            ));
        }
        if let Some(reset) = self.reset_button.gpio {
            if reset == self.pulse.gpio {
                return Err(ConfigError::ValidationFailed(
                    "reset button gpio must differ from pulse gpio",
                ));
            }
            if !pins::is_wake_capable(reset) {
                return Err(ConfigError::ValidationFailed(
                    "reset button gpio must be RTC-capable",
                ));
            }
        }
        let taus = [self.demand.rise_tau_s, self.demand.decay_tau_s];
        if taus.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(ConfigError::ValidationFailed(
                "demand time constants must be finite and >= 0",
            ));
        }
        if self.steering.max_backoff_s == 0 {
            return Err(ConfigError::ValidationFailed("max_backoff_s must be > 0"));
        }
        if self.battery.full_mv <= self.battery.empty_mv {
            return Err(ConfigError::ValidationFailed(
                "battery full_mv must be > empty_mv",
            ));
        }
        let reports = [
            self.network.summation_report,
            self.network.demand_report,
            self.network.battery_report,
        ];
        if reports.iter().any(|r| r.min_interval_s > r.max_interval_s) {
            return Err(ConfigError::ValidationFailed(
                "report min interval must not exceed max interval",
            ));
        }
        Ok(())
    }

    /// Replace zeroed fields from an older blob with factory values.
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.pulse.pulses_per_unit == 0 {
            self.pulse.pulses_per_unit = defaults.pulse.pulses_per_unit;
        }
        if self.pulse.debounce_ms == 0 {
            self.pulse.debounce_ms = defaults.pulse.debounce_ms;
        }
    }

    /// Free-form build identifier published on the Basic cluster.
    ///
    /// The attribute holds at most 15 characters, so longer values are cut.
    pub fn sw_build_id(&self) -> heapless::String<15> {
        let mut out = heapless::String::new();
        let mut full: heapless::String<32> = heapless::String::new();
        // 32 bytes always fits "PU=<u32> DB=<u16>".
        let _ = core::fmt::write(
            &mut full,
            format_args!("PU={} DB={}", self.pulse.pulses_per_unit, self.pulse.debounce_ms),
        );
        for c in full.chars() {
            if out.push(c).is_err() {
                break;
            }
        }
        out
    }
}
