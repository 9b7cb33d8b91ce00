//! GPIO / peripheral pin assignments for the pulse meter board.
//!
//! Single source of truth for factory pin defaults. Both inputs must be
//! RTC-capable so they can arm the EXT1 wake source during light sleep.

// ---------------------------------------------------------------------------
// RTC-capable input range per target
// ---------------------------------------------------------------------------

/// ESP32-C6 routes GPIO0–7 through the LP IO domain.
#[cfg(esp32c6)]
const RTC_GPIO_RANGE: core::ops::RangeInclusive<i32> = 0..=7;

/// ESP32-H2 routes GPIO7–14 through the LP IO domain.
#[cfg(not(esp32c6))]
const RTC_GPIO_RANGE: core::ops::RangeInclusive<i32> = 7..=14;

// ---------------------------------------------------------------------------
// Pulse input (S0 / reed contact, active-low with pull-up)
// ---------------------------------------------------------------------------

#[cfg(esp32c6)]
pub const PULSE_GPIO: i32 = 4;
#[cfg(not(esp32c6))]
pub const PULSE_GPIO: i32 = 10;

// ---------------------------------------------------------------------------
// Factory-reset button (active-low with pull-up)
// ---------------------------------------------------------------------------

#[cfg(esp32c6)]
pub const RESET_BUTTON_GPIO: i32 = 5;
#[cfg(not(esp32c6))]
pub const RESET_BUTTON_GPIO: i32 = 9;

// ---------------------------------------------------------------------------
// Battery sense (resistive divider into ADC1)
// ---------------------------------------------------------------------------

/// ADC1 channel wired to the battery divider.
pub const BATTERY_ADC_CHANNEL: u32 = 1;
/// ADC attenuation (12 dB → 0 – 3.3 V range).
pub const BATTERY_ADC_ATTEN: u32 = 3;

/// True if `gpio` can hold an EXT1 wake source on this target.
pub fn is_wake_capable(gpio: i32) -> bool {
    RTC_GPIO_RANGE.contains(&gpio)
}
