//! GPIO interrupt wiring for the pulse input.
//!
//! The input is configured active-low with the internal pull-up and an
//! any-edge interrupt. The ISR samples the level to tell the edges apart
//! and forwards them to the [`PulseCounter`] with the high-resolution
//! timer as timestamp.

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicI32, Ordering};

use crate::error::HardwareFault;
use crate::sensors::pulse::PulseCounter;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Route one sampled edge into the counter. Level low = contact closed.
pub fn dispatch_edge(counter: &PulseCounter, level_low: bool, now: u64) -> bool {
    if level_low {
        counter.on_edge_down(now);
        false
    } else {
        counter.on_edge_up(now)
    }
}

/// GPIO the ISR samples; set once in [`attach`].
#[cfg(target_os = "espidf")]
static INPUT_GPIO: AtomicI32 = AtomicI32::new(-1);

#[cfg(target_os = "espidf")]
unsafe extern "C" fn pulse_isr(arg: *mut core::ffi::c_void) {
    // SAFETY: arg is the &'static PulseCounter registered in attach().
    let counter = unsafe { &*(arg as *const PulseCounter) };
    let gpio = INPUT_GPIO.load(Ordering::Relaxed);
    // SAFETY: reading a configured input from ISR context is allowed.
    let level_low = unsafe { gpio_get_level(gpio) } == 0;
    // SAFETY: esp_timer_get_time is ISR-safe.
    let now = unsafe { esp_timer_get_time() }.max(0) as u64;
    dispatch_edge(counter, level_low, now);
}

/// Configure `gpio` and register the edge ISR against `counter`.
#[cfg(target_os = "espidf")]
pub fn attach(gpio: i32, counter: &'static PulseCounter) -> Result<(), HardwareFault> {
    let io = gpio_config_t {
        pin_bit_mask: 1u64 << gpio,
        mode: gpio_mode_t_GPIO_MODE_INPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_ANYEDGE,
        ..Default::default()
    };
    // SAFETY: io outlives the call.
    let ret = unsafe { gpio_config(&io) };
    if ret != ESP_OK as esp_err_t {
        log::error!("PULSE | GPIO{} config failed (rc={})", gpio, ret);
        return Err(HardwareFault::GpioInit);
    }

    // SAFETY: installing the service twice returns ESP_ERR_INVALID_STATE, which is fine.
    let ret = unsafe { gpio_install_isr_service(0) };
    if ret != ESP_OK as esp_err_t && ret != ESP_ERR_INVALID_STATE as esp_err_t {
        log::error!("PULSE | ISR service install failed (rc={})", ret);
        return Err(HardwareFault::GpioInit);
    }

    INPUT_GPIO.store(gpio, Ordering::Relaxed);
    let arg = counter as *const PulseCounter as *mut core::ffi::c_void;
    // SAFETY: counter is 'static, so the pointer stays valid for the ISR's lifetime.
    let ret = unsafe { gpio_isr_handler_add(gpio, Some(pulse_isr), arg) };
    if ret != ESP_OK as esp_err_t {
        log::error!("PULSE | ISR handler add failed (rc={})", ret);
        return Err(HardwareFault::GpioInit);
    }
    log::info!("PULSE | GPIO{} armed (any edge, pull-up)", gpio);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn attach(gpio: i32, _counter: &'static PulseCounter) -> Result<(), HardwareFault> {
    log::info!("PULSE | sim: GPIO{} not wired, feed edges with dispatch_edge()", gpio);
    Ok(())
}
