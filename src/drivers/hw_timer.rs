//! Periodic battery sampling timer using ESP-IDF's esp_timer API.
//!
//! The callback runs in the esp_timer task (not ISR) and only queues
//! [`Event::BatteryTick`]; the ADC read happens in the main loop.

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::events::{push_event, Event};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use log::info;

/// Handle of the running battery timer, null when stopped.
static BATTERY_TIMER: AtomicPtr<core::ffi::c_void> = AtomicPtr::new(core::ptr::null_mut());

/// Timer callback body. Exposed so the host build can drive it.
pub fn battery_tick() {
    if !push_event(Event::BatteryTick) {
        log::debug!("hw_timer: event queue full, battery tick dropped");
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn battery_tick_cb(_arg: *mut core::ffi::c_void) {
    battery_tick();
}

/// Start the periodic battery tick. A period of 0 leaves it off.
#[cfg(target_os = "espidf")]
pub fn start_battery_timer(period_s: u32) {
    if period_s == 0 {
        info!("hw_timer: battery sampling disabled");
        return;
    }
    stop_battery_timer();

    let args = esp_timer_create_args_t {
        callback: Some(battery_tick_cb),
        arg: core::ptr::null_mut(),
        dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
        name: c"battery".as_ptr(),
        skip_unhandled_events: true,
    };
    let mut handle: esp_timer_handle_t = core::ptr::null_mut();
    // SAFETY: args outlives the call; handle is written by esp_timer_create.
    let ret = unsafe { esp_timer_create(&args, &mut handle) };
    if ret != ESP_OK as esp_err_t {
        log::error!("hw_timer: battery timer create failed (rc={})", ret);
        return;
    }
    // SAFETY: handle was just created.
    let ret = unsafe { esp_timer_start_periodic(handle, u64::from(period_s) * 1_000_000) };
    if ret != ESP_OK as esp_err_t {
        log::error!("hw_timer: battery timer start failed (rc={})", ret);
        // SAFETY: created above and not started.
        unsafe { esp_timer_delete(handle) };
        return;
    }
    BATTERY_TIMER.store(handle.cast(), Ordering::Release);
    info!("hw_timer: battery tick every {}s", period_s);
}

#[cfg(not(target_os = "espidf"))]
pub fn start_battery_timer(period_s: u32) {
    info!("hw_timer(sim): battery tick every {}s not started", period_s);
}

/// Stop and delete the battery timer if running.
pub fn stop_battery_timer() {
    let handle = BATTERY_TIMER.swap(core::ptr::null_mut(), Ordering::AcqRel);
    if handle.is_null() {
        return;
    }
    #[cfg(target_os = "espidf")]
    // SAFETY: handle came from esp_timer_create and is owned here after the swap.
    unsafe {
        esp_timer_stop(handle.cast());
        esp_timer_delete(handle.cast());
    }
}
