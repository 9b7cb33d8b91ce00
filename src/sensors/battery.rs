//! Battery status encoding for the Power Configuration cluster.
//!
//! The ADC adapter supplies calibrated divider-tap readings in mV; this
//! module turns them into a battery voltage, rejects glitches, and encodes
//! the two ZCL attributes:
//!
//! | Attribute                   | Unit       | Unknown |
//! |-----------------------------|------------|---------|
//! | BatteryVoltage (0x0020)     | 100 mV     | 0xFF    |
//! | BatteryPercentageRemaining  | 0.5 %      | 0xFF    |

use crate::config::BatteryConfig;

/// Sentinel for an unknown voltage or percentage.
pub const ATTR_UNKNOWN: u8 = 0xFF;

/// Samples discarded before averaging (high-impedance divider settling).
pub const DISCARD_SAMPLES: usize = 2;
/// Fewer sane samples than this and the reading is rejected.
pub const MIN_VALID_SAMPLES: usize = 8;

const MAX_BATTERY_MV: u64 = 65_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    pub millivolts: u16,
    pub voltage_attr: u8,
    pub percent_attr: u8,
}

impl BatteryStatus {
    pub const UNKNOWN: Self = Self {
        millivolts: 0,
        voltage_attr: ATTR_UNKNOWN,
        percent_attr: ATTR_UNKNOWN,
    };

    pub fn from_millivolts(mv: u16, cfg: &BatteryConfig) -> Self {
        Self {
            millivolts: mv,
            voltage_attr: voltage_attr(mv),
            percent_attr: percent_attr(mv, cfg),
        }
    }
}

/// Scale an ADC tap voltage back up through the resistive divider.
pub fn divider_to_battery_mv(adc_mv: u32, cfg: &BatteryConfig) -> u16 {
    let r_bot = u64::from(cfg.divider_bottom_ohm);
    if r_bot == 0 {
        return 0;
    }
    let r_sum = u64::from(cfg.divider_top_ohm) + r_bot;
    let mv = (u64::from(adc_mv) * r_sum + r_bot / 2) / r_bot;
    mv.min(MAX_BATTERY_MV) as u16
}

/// BatteryVoltage in 100 mV units, capped at 0xFE so it never reads "unknown".
pub fn voltage_attr(mv: u16) -> u8 {
    (mv / 100).min(0xFE) as u8
}

/// BatteryPercentageRemaining in half-percent units (200 = full).
pub fn percent_attr(mv: u16, cfg: &BatteryConfig) -> u8 {
    let (empty, full) = (i32::from(cfg.empty_mv), i32::from(cfg.full_mv));
    if full <= empty {
        return ATTR_UNKNOWN;
    }
    let mv = i32::from(mv);
    if mv <= empty {
        return 0;
    }
    if mv >= full {
        return 200;
    }
    let pct = ((mv - empty) * 100 / (full - empty)).clamp(0, 100);
    (pct * 2) as u8
}

/// Plausibility window around the configured empty/full range.
///
/// The margin is the span itself, held between 500 and 5000 mV.
pub fn is_sane(mv: u16, cfg: &BatteryConfig) -> bool {
    let (empty, full) = (i32::from(cfg.empty_mv), i32::from(cfg.full_mv));
    let (lo, hi) = (empty.min(full), empty.max(full));
    if lo <= 0 || hi <= lo {
        return mv > 0;
    }
    let margin = (hi - lo).clamp(500, 5000);
    let sane_lo = (lo - margin).max(0);
    let sane_hi = (hi + margin).min(MAX_BATTERY_MV as i32);
    (sane_lo..=sane_hi).contains(&i32::from(mv))
}

/// Mean of `samples` with the single lowest and highest value dropped.
///
/// Returns `None` below [`MIN_VALID_SAMPLES`].
pub fn trimmed_mean(samples: &[u32]) -> Option<u32> {
    if samples.len() < MIN_VALID_SAMPLES {
        return None;
    }
    let (mut min, mut max, mut sum) = (u32::MAX, 0u32, 0u64);
    for &s in samples {
        min = min.min(s);
        max = max.max(s);
        sum += u64::from(s);
    }
    sum -= u64::from(min) + u64::from(max);
    let n = samples.len() as u64 - 2;
    Some(((sum + n / 2) / n) as u32)
}

/// Keeps the last good reading and decides which attributes need publishing.
#[derive(Debug, Clone)]
pub struct BatteryMonitor {
    last_good_mv: Option<u16>,
    published_voltage: u8,
    published_percent: u8,
}

/// Attribute writes produced by [`BatteryMonitor::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatteryUpdate {
    pub voltage: Option<u8>,
    pub percent: Option<u8>,
}

impl BatteryMonitor {
    pub fn new() -> Self {
        Self {
            last_good_mv: None,
            published_voltage: ATTR_UNKNOWN,
            published_percent: ATTR_UNKNOWN,
        }
    }

    /// Turn a sampled voltage into a status, falling back to the last good
    /// reading (or "unknown") when the sample is missing or implausible.
    pub fn evaluate(&mut self, sample_mv: Option<u16>, cfg: &BatteryConfig) -> BatteryStatus {
        match sample_mv {
            Some(mv) if is_sane(mv, cfg) => {
                self.last_good_mv = Some(mv);
                BatteryStatus::from_millivolts(mv, cfg)
            }
            other => {
                if let Some(mv) = other {
                    log::warn!("battery: rejecting implausible reading {} mV", mv);
                }
                self.last_good_mv
                    .map_or(BatteryStatus::UNKNOWN, |mv| BatteryStatus::from_millivolts(mv, cfg))
            }
        }
    }

    /// Voltage is published on any change; percent only once it moves by
    /// more than `hysteresis_pct` whole percent.
    pub fn publish(&mut self, status: &BatteryStatus, hysteresis_pct: u8) -> BatteryUpdate {
        let mut update = BatteryUpdate::default();

        let v = status.voltage_attr;
        if v != ATTR_UNKNOWN && v != self.published_voltage {
            self.published_voltage = v;
            update.voltage = Some(v);
        }

        let p = status.percent_attr;
        if p != ATTR_UNKNOWN {
            let band = u16::from(hysteresis_pct) * 2;
            let last = self.published_percent;
            let moved = last == ATTR_UNKNOWN
                || u16::from(p) > u16::from(last) + band
                || u16::from(p) + band < u16::from(last);
            if moved {
                self.published_percent = p;
                update.percent = Some(p);
            }
        }
        update
    }
}

impl Default for BatteryMonitor {
    fn default() -> Self {
        Self::new()
    }
}
