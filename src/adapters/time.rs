//! Monotonic clock.
//!
//! - **`target_os = "espidf"`**: `esp_timer_get_time()`, microseconds since
//!   boot. Keeps counting across light sleep.
//! - **host**: `std::time::Instant`, plus a manual mode for tests that need
//!   to step time explicitly.

#[cfg(not(target_os = "espidf"))]
use core::cell::Cell;

pub struct MonotonicClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
    #[cfg(not(target_os = "espidf"))]
    manual: Option<Cell<u64>>,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
            #[cfg(not(target_os = "espidf"))]
            manual: None,
        }
    }

    /// Microseconds since boot.
    #[cfg(target_os = "espidf")]
    pub fn uptime_us(&self) -> u64 {
        // esp_timer_get_time is never negative
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }).max(0) as u64
    }

    /// Microseconds since construction, or the manual value if set.
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_us(&self) -> u64 {
        match &self.manual {
            Some(t) => t.get(),
            None => u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX),
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl MonotonicClock {
    /// A clock that only moves when told to.
    pub fn manual(start_us: u64) -> Self {
        Self {
            start: std::time::Instant::now(),
            manual: Some(Cell::new(start_us)),
        }
    }

    /// Step a manual clock forward. No effect on a real-time clock.
    pub fn advance_us(&self, delta_us: u64) {
        if let Some(t) = &self.manual {
            t.set(t.get().saturating_add(delta_us));
        }
    }
}
