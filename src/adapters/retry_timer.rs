//! One-shot steering retry timer.
//!
//! On target this is an `esp_timer` whose callback only raises an
//! atomic flag; the main loop consumes the flag through
//! [`RetryTimer::take_expired`]. The host version fires when the
//! supplied clock passes the armed deadline.

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use crate::app::ports::RetryTimer;
use crate::error::HardwareFault;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Raised by the timer callback, cleared by `take_expired`/`stop`.
#[cfg(target_os = "espidf")]
static RETRY_EXPIRED: AtomicBool = AtomicBool::new(false);

#[cfg(target_os = "espidf")]
unsafe extern "C" fn retry_cb(_arg: *mut core::ffi::c_void) {
    RETRY_EXPIRED.store(true, Ordering::Release);
}

#[cfg(target_os = "espidf")]
pub struct EspRetryTimer {
    handle: esp_timer_handle_t,
}

#[cfg(target_os = "espidf")]
impl EspRetryTimer {
    pub fn new() -> Result<Self, HardwareFault> {
        let args = esp_timer_create_args_t {
            callback: Some(retry_cb),
            arg: core::ptr::null_mut(),
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: c"join_retry".as_ptr(),
            skip_unhandled_events: false,
        };
        let mut handle: esp_timer_handle_t = core::ptr::null_mut();
        // SAFETY: args outlives the call; handle is written by esp_timer_create.
        let ret = unsafe { esp_timer_create(&args, &mut handle) };
        if ret != ESP_OK as esp_err_t {
            log::error!("retry_timer: create failed (rc={})", ret);
            return Err(HardwareFault::Timer);
        }
        Ok(Self { handle })
    }
}

#[cfg(target_os = "espidf")]
impl RetryTimer for EspRetryTimer {
    fn start_once(&mut self, delay_us: u64) -> Result<(), HardwareFault> {
        self.stop();
        // SAFETY: handle is valid for the lifetime of self.
        let ret = unsafe { esp_timer_start_once(self.handle, delay_us) };
        if ret != ESP_OK as esp_err_t {
            log::error!("retry_timer: start failed (rc={})", ret);
            return Err(HardwareFault::Timer);
        }
        debug!("retry_timer: armed {}ms", delay_us / 1000);
        Ok(())
    }

    fn stop(&mut self) {
        // SAFETY: handle is valid; stopping an idle timer returns
        // ESP_ERR_INVALID_STATE, which is fine here.
        unsafe { esp_timer_stop(self.handle) };
        RETRY_EXPIRED.store(false, Ordering::Release);
    }

    fn take_expired(&mut self) -> bool {
        RETRY_EXPIRED.swap(false, Ordering::AcqRel)
    }
}

#[cfg(target_os = "espidf")]
impl Drop for EspRetryTimer {
    fn drop(&mut self) {
        // SAFETY: handle came from esp_timer_create and is not used after drop.
        unsafe {
            esp_timer_stop(self.handle);
            esp_timer_delete(self.handle);
        }
    }
}

/// Host timer driven by an external clock.
#[cfg(not(target_os = "espidf"))]
pub struct SimRetryTimer<F: Fn() -> u64> {
    now: F,
    deadline: Option<u64>,
}

#[cfg(not(target_os = "espidf"))]
impl<F: Fn() -> u64> SimRetryTimer<F> {
    pub fn new(now: F) -> Self {
        Self {
            now,
            deadline: None,
        }
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }
}

#[cfg(not(target_os = "espidf"))]
impl<F: Fn() -> u64> RetryTimer for SimRetryTimer<F> {
    fn start_once(&mut self, delay_us: u64) -> Result<(), HardwareFault> {
        self.stop();
        self.deadline = Some((self.now)().saturating_add(delay_us));
        debug!("retry_timer(sim): armed {}ms", delay_us / 1000);
        Ok(())
    }

    fn stop(&mut self) {
        self.deadline = None;
    }

    fn take_expired(&mut self) -> bool {
        match self.deadline {
            Some(at) if (self.now)() >= at => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
