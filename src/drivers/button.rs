//! Factory-reset button.
//!
//! Active-low momentary switch with pull-up. The pin is also armed as a
//! wake source, so while it is held the node stays awake and the main
//! loop keeps calling [`ResetButton::tick`]. Once the press has lasted
//! `hold_ms`, `tick` reports it exactly once per press; the caller queues
//! [`Event::FactoryResetHold`](crate::events::Event::FactoryResetHold).
//!
//! At boot, [`ResetButton::held_at_boot`] samples the pin for up to
//! `hold_ms` so a button held through power-up also triggers the reset.

use embedded_hal::digital::InputPin;
use log::{info, warn};

/// Spacing between boot-time samples.
const BOOT_SAMPLE_MS: u32 = 50;

/// Minimum press length before a release counts as a press at all.
const DEBOUNCE_US: u64 = 50_000;

pub struct ResetButton<P> {
    pin: P,
    hold_us: u64,
    pressed_since: Option<u64>,
    fired: bool,
}

impl<P: InputPin> ResetButton<P> {
    pub fn new(pin: P, hold_ms: u32) -> Self {
        Self {
            pin,
            hold_us: u64::from(hold_ms) * 1000,
            pressed_since: None,
            fired: false,
        }
    }

    /// A read error counts as released.
    fn is_pressed(&mut self) -> bool {
        self.pin.is_low().unwrap_or(false)
    }

    /// Sample the pin. Returns true when the hold threshold is crossed.
    pub fn tick(&mut self, now: u64) -> bool {
        if !self.is_pressed() {
            if let Some(since) = self.pressed_since.take() {
                let held = now.saturating_sub(since);
                if held >= DEBOUNCE_US && !self.fired {
                    info!("button: released after {}ms", held / 1000);
                }
            }
            self.fired = false;
            return false;
        }

        let since = *self.pressed_since.get_or_insert(now);
        if self.fired || now.saturating_sub(since) < self.hold_us {
            return false;
        }
        self.fired = true;
        warn!("button: held {}ms, factory reset requested", self.hold_us / 1000);
        true
    }

    /// Block for up to `hold_ms` while the button is held at boot.
    /// Returns true if it stayed pressed the whole time.
    pub fn held_at_boot(&mut self, mut delay_ms: impl FnMut(u32)) -> bool {
        if !self.is_pressed() {
            return false;
        }
        info!("button: pressed at boot, hold {}ms to factory reset", self.hold_us / 1000);
        let mut waited_us = 0u64;
        while waited_us < self.hold_us {
            delay_ms(BOOT_SAMPLE_MS);
            waited_us += u64::from(BOOT_SAMPLE_MS) * 1000;
            if !self.is_pressed() {
                info!("button: released at boot after {}ms", waited_us / 1000);
                return false;
            }
        }
        true
    }
}
