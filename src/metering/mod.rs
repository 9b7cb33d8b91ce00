//! Metering engine: cumulative summation and smoothed demand.
//!
//! Consumes [`PulseBatch`](crate::sensors::pulse::PulseBatch)es drained by
//! the orchestrator. Summation is the raw pulse total; the consumer
//! divides by [`Scaling::divisor`] to get units.
//!
//! ## Demand filter
//!
//! Each pulse with a known predecessor yields an instantaneous rate of
//! `3600 / Δt` pulses per hour, blended in with
//!
//! ```text
//! rate += (1 − e^(−Δt/τ_rise)) · (instant − rate)
//! ```
//!
//! Between pulses [`MeteringEngine::tick`] ages the estimate with
//! `rate *= e^(−Δt/τ_decay)`. After `idle_timeout` without a pulse the
//! demand is forced to zero.

pub mod codec;
pub mod variant;

use crate::config::MeterConfig;

/// Largest publishable demand (int24 upper bound).
pub const DEMAND_MAX: i32 = codec::I24_MAX;
/// Largest divisor the 24-bit Divisor attribute can carry.
pub const DIVISOR_MAX: u32 = codec::U24_MAX;
/// Trailing decimal digits shown by a consumer, at most.
const MAX_DIGITS_RIGHT: u8 = 7;
/// Digits left of the decimal point advertised in the formatting byte.
const DIGITS_LEFT: u8 = 10;
/// Bit 7 of the formatting byte is always set.
const SUPPRESS_LEADING_ZEROS: u8 = 0x80;

const US_PER_S: f64 = 1_000_000.0;

/// Filter parameters derived from [`MeterConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeteringConfig {
    pub pulses_per_unit: u32,
    pub rise_tau_s: f64,
    pub decay_tau_s: f64,
    /// `None` disables the idle cut-off.
    pub idle_timeout_us: Option<u64>,
}

impl From<&MeterConfig> for MeteringConfig {
    fn from(cfg: &MeterConfig) -> Self {
        Self {
            pulses_per_unit: cfg.pulse.pulses_per_unit,
            rise_tau_s: cfg.demand.rise_tau_s,
            decay_tau_s: cfg.demand.decay_tau_s,
            idle_timeout_us: (cfg.demand.idle_timeout_s > 0)
                .then(|| u64::from(cfg.demand.idle_timeout_s) * 1_000_000),
        }
    }
}

/// Multiplier, divisor and formatting codes published on the Metering cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scaling {
    /// Always 1.
    pub multiplier: u32,
    pub divisor: u32,
    pub summation_formatting: u8,
    pub demand_formatting: u8,
}

impl Scaling {
    pub fn for_pulses_per_unit(pulses_per_unit: u32) -> Self {
        let divisor = pulses_per_unit.clamp(1, DIVISOR_MAX);
        let code = formatting_code(divisor);
        Self {
            multiplier: 1,
            divisor,
            summation_formatting: code,
            demand_formatting: code,
        }
    }
}

/// Count of trailing decimal zeros in `divisor`, capped at seven.
pub fn digits_right(mut divisor: u32) -> u8 {
    let mut digits = 0;
    while divisor > 1 && divisor % 10 == 0 && digits < MAX_DIGITS_RIGHT {
        divisor /= 10;
        digits += 1;
    }
    digits
}

/// Pack `(digits_right, digits_left = 10, bit 7)` into one formatting byte.
pub fn formatting_code(divisor: u32) -> u8 {
    (digits_right(divisor) & 0x07) | ((DIGITS_LEFT & 0x0F) << 3) | SUPPRESS_LEADING_ZEROS
}

/// `e^(−dt/τ)`, or 1.0 when either argument is non-positive.
fn decay_factor(dt_s: f64, tau_s: f64) -> f64 {
    if tau_s <= 0.0 || dt_s <= 0.0 {
        return 1.0;
    }
    (-dt_s / tau_s).exp()
}

fn project_demand(rate: f64) -> i32 {
    let rounded = rate.round();
    if rounded >= f64::from(DEMAND_MAX) {
        DEMAND_MAX
    } else if rounded <= 0.0 {
        0
    } else {
        rounded as i32
    }
}

/// Everything the engine knows about consumption. Reset replaces it whole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterState {
    pub total_pulses: u64,
    /// Smoothed rate in pulses per hour.
    pub rate_estimate: f64,
    /// `rate_estimate` rounded and clamped to `0..=DEMAND_MAX`.
    pub instantaneous_demand: i32,
    pub last_pulse_ts: Option<u64>,
    last_update_ts: Option<u64>,
}

impl MeterState {
    const fn with_total(total_pulses: u64) -> Self {
        Self {
            total_pulses,
            rate_estimate: 0.0,
            instantaneous_demand: 0,
            last_pulse_ts: None,
            last_update_ts: None,
        }
    }
}

pub struct MeteringEngine {
    state: MeterState,
    config: MeteringConfig,
    scaling: Scaling,
}

impl MeteringEngine {
    pub fn new(config: MeteringConfig, initial_total: u64) -> Self {
        Self {
            state: MeterState::with_total(initial_total),
            scaling: Scaling::for_pulses_per_unit(config.pulses_per_unit),
            config,
        }
    }

    /// Swap filter parameters and rescale. Totals and demand are kept.
    pub fn set_config(&mut self, config: MeteringConfig) {
        self.scaling = Scaling::for_pulses_per_unit(config.pulses_per_unit);
        self.config = config;
    }

    /// Fold a drained batch into the total and the demand estimate.
    ///
    /// Returns true if the published demand changed.
    pub fn on_pulses(&mut self, count: u32, last_ts: Option<u64>, prev_ts: Option<u64>) -> bool {
        if count == 0 {
            return false;
        }
        self.state.total_pulses = self.state.total_pulses.saturating_add(u64::from(count));

        let Some(last) = last_ts else {
            return false;
        };
        let before = self.state.instantaneous_demand;
        self.tick(last);

        if let Some(prev) = prev_ts.filter(|p| last > *p) {
            let dt_s = (last - prev) as f64 / US_PER_S;
            let instant = 3600.0 / dt_s;
            let alpha = 1.0 - decay_factor(dt_s, self.config.rise_tau_s);
            let mut rate = self.state.rate_estimate + alpha * (instant - self.state.rate_estimate);
            if rate < 0.0 {
                rate = 0.0;
            }
            self.state.rate_estimate = rate;
            self.state.instantaneous_demand = project_demand(rate);
        }
        self.state.last_pulse_ts = Some(last);
        self.state.instantaneous_demand != before
    }

    /// Age the demand estimate up to `now`. Returns true if demand changed.
    ///
    /// The first call only anchors the clock.
    pub fn tick(&mut self, now: u64) -> bool {
        let Some(last_update) = self.state.last_update_ts else {
            self.state.last_update_ts = Some(now);
            return false;
        };

        if let (Some(timeout), Some(last_pulse)) = (self.config.idle_timeout_us, self.state.last_pulse_ts) {
            if now.saturating_sub(last_pulse) >= timeout {
                let changed = self.state.instantaneous_demand != 0;
                self.state.rate_estimate = 0.0;
                self.state.instantaneous_demand = 0;
                self.state.last_update_ts = Some(now);
                return changed;
            }
        }

        if now <= last_update {
            return false;
        }
        let dt_s = (now - last_update) as f64 / US_PER_S;
        self.state.rate_estimate *= decay_factor(dt_s, self.config.decay_tau_s);
        self.state.last_update_ts = Some(now);

        let demand = project_demand(self.state.rate_estimate);
        let changed = demand != self.state.instantaneous_demand;
        self.state.instantaneous_demand = demand;
        changed
    }

    /// Zero total, demand, rate and timestamps in one step.
    pub fn reset(&mut self) {
        self.state = MeterState::with_total(0);
    }

    pub fn set_total(&mut self, total: u64) {
        self.state.total_pulses = total;
    }

    pub fn state(&self) -> MeterState {
        self.state
    }

    pub fn total_pulses(&self) -> u64 {
        self.state.total_pulses
    }

    pub fn instantaneous_demand(&self) -> i32 {
        self.state.instantaneous_demand
    }

    pub fn last_pulse_ts(&self) -> Option<u64> {
        self.state.last_pulse_ts
    }

    pub fn scaling(&self) -> Scaling {
        self.scaling
    }

    /// Summation in consumer units (total × multiplier / divisor).
    pub fn summation_units(&self) -> f64 {
        self.state.total_pulses as f64 * f64::from(self.scaling.multiplier)
            / f64::from(self.scaling.divisor)
    }
}
