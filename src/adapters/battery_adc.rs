//! Battery voltage through ADC1 oneshot + curve-fitting calibration.
//!
//! A burst of samples is taken per reading. The first
//! [`DISCARD_SAMPLES`] are thrown away while the high-impedance divider
//! settles, the rest go through a trimmed mean and are scaled back up
//! through the divider.

use log::debug;

use crate::app::ports::BatteryPort;
use crate::config::BatteryConfig;
use crate::error::HardwareFault;
use crate::sensors::battery::{divider_to_battery_mv, trimmed_mean, DISCARD_SAMPLES};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Samples per reading, including the discarded ones.
pub const BURST_SAMPLES: usize = 16 + DISCARD_SAMPLES;

/// Reduce one burst of calibrated tap voltages to a battery voltage.
pub fn burst_to_battery_mv(tap_mv: &[u32], cfg: &BatteryConfig) -> Option<u16> {
    let settled = tap_mv.get(DISCARD_SAMPLES..)?;
    let mean = trimmed_mean(settled)?;
    Some(divider_to_battery_mv(mean, cfg))
}

#[cfg(target_os = "espidf")]
pub struct AdcBattery {
    unit: adc_oneshot_unit_handle_t,
    cali: adc_cali_handle_t,
    channel: adc_channel_t,
    cfg: BatteryConfig,
}

#[cfg(target_os = "espidf")]
impl AdcBattery {
    pub fn new(cfg: BatteryConfig) -> Result<Self, HardwareFault> {
        let channel = crate::pins::BATTERY_ADC_CHANNEL as adc_channel_t;
        let atten = crate::pins::BATTERY_ADC_ATTEN as adc_atten_t;

        let unit_cfg = adc_oneshot_unit_init_cfg_t {
            unit_id: adc_unit_t_ADC_UNIT_1,
            ulp_mode: adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
            ..Default::default()
        };
        let mut unit: adc_oneshot_unit_handle_t = core::ptr::null_mut();
        // SAFETY: unit_cfg outlives the call; unit is written on success.
        let ret = unsafe { adc_oneshot_new_unit(&unit_cfg, &mut unit) };
        if ret != ESP_OK as esp_err_t {
            log::error!("BATT | ADC1 init failed (rc={})", ret);
            return Err(HardwareFault::AdcInit);
        }

        let chan_cfg = adc_oneshot_chan_cfg_t {
            atten,
            bitwidth: adc_bitwidth_t_ADC_BITWIDTH_DEFAULT,
        };
        // SAFETY: unit was just created.
        let ret = unsafe { adc_oneshot_config_channel(unit, channel, &chan_cfg) };
        if ret != ESP_OK as esp_err_t {
            log::error!("BATT | channel {} config failed (rc={})", channel, ret);
            // SAFETY: unit is ours and unused elsewhere.
            unsafe { adc_oneshot_del_unit(unit) };
            return Err(HardwareFault::AdcInit);
        }

        let cali_cfg = adc_cali_curve_fitting_config_t {
            unit_id: adc_unit_t_ADC_UNIT_1,
            chan: channel,
            atten,
            bitwidth: adc_bitwidth_t_ADC_BITWIDTH_DEFAULT,
        };
        let mut cali: adc_cali_handle_t = core::ptr::null_mut();
        // SAFETY: cali_cfg outlives the call; cali is written on success.
        let ret = unsafe { adc_cali_create_scheme_curve_fitting(&cali_cfg, &mut cali) };
        if ret != ESP_OK as esp_err_t {
            log::error!("BATT | calibration scheme unavailable (rc={})", ret);
            // SAFETY: unit is ours and unused elsewhere.
            unsafe { adc_oneshot_del_unit(unit) };
            return Err(HardwareFault::AdcInit);
        }

        log::info!("BATT | ADC1 ch{} ready", channel);
        Ok(Self {
            unit,
            cali,
            channel,
            cfg,
        })
    }

    pub fn set_config(&mut self, cfg: BatteryConfig) {
        self.cfg = cfg;
    }

    fn sample_mv(&mut self) -> Result<u32, HardwareFault> {
        let mut raw: i32 = 0;
        // SAFETY: unit and channel were configured in new().
        let ret = unsafe { adc_oneshot_read(self.unit, self.channel, &mut raw) };
        if ret != ESP_OK as esp_err_t {
            return Err(HardwareFault::AdcRead);
        }
        let mut mv: i32 = 0;
        // SAFETY: cali was created in new().
        let ret = unsafe { adc_cali_raw_to_voltage(self.cali, raw, &mut mv) };
        if ret != ESP_OK as esp_err_t {
            return Err(HardwareFault::AdcRead);
        }
        Ok(mv.max(0) as u32)
    }
}

#[cfg(target_os = "espidf")]
impl BatteryPort for AdcBattery {
    fn read_millivolts(&mut self) -> Result<u16, HardwareFault> {
        let mut burst: heapless::Vec<u32, BURST_SAMPLES> = heapless::Vec::new();
        for _ in 0..BURST_SAMPLES {
            // A failed sample shrinks the burst; too few and the mean is rejected.
            if let Ok(mv) = self.sample_mv() {
                let _ = burst.push(mv);
            }
        }
        let mv = burst_to_battery_mv(&burst, &self.cfg).ok_or(HardwareFault::AdcRead)?;
        debug!("BATT | burst={} battery_mv={}", burst.len(), mv);
        Ok(mv)
    }
}

#[cfg(target_os = "espidf")]
impl Drop for AdcBattery {
    fn drop(&mut self) {
        // SAFETY: both handles were created in new() and are dropped once.
        unsafe {
            adc_cali_delete_scheme_curve_fitting(self.cali);
            adc_oneshot_del_unit(self.unit);
        }
    }
}

/// Host battery: replays a fixed tap voltage through the same reduction.
#[cfg(not(target_os = "espidf"))]
pub struct SimBattery {
    tap_mv: Option<u32>,
    cfg: BatteryConfig,
}

#[cfg(not(target_os = "espidf"))]
impl SimBattery {
    pub fn new(cfg: BatteryConfig) -> Self {
        Self { tap_mv: None, cfg }
    }

    /// `None` makes every read fail.
    pub fn set_tap_mv(&mut self, mv: Option<u32>) {
        self.tap_mv = mv;
    }
}

#[cfg(not(target_os = "espidf"))]
impl BatteryPort for SimBattery {
    fn read_millivolts(&mut self) -> Result<u16, HardwareFault> {
        let tap = self.tap_mv.ok_or(HardwareFault::AdcRead)?;
        let burst = [tap; BURST_SAMPLES];
        let mv = burst_to_battery_mv(&burst, &self.cfg).ok_or(HardwareFault::AdcRead)?;
        debug!("BATT | sim battery_mv={}", mv);
        Ok(mv)
    }
}
