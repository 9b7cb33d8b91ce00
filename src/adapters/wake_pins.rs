//! Level reads on the EXT1 wake inputs.
//!
//! Both inputs are active-low with pull-ups. A pin that cannot be read is
//! reported as asserted: sleeping on an unknown level risks an immediate
//! wake loop.

use embedded_hal::digital::InputPin;
use log::warn;

use crate::app::ports::WakePins;
#[cfg(target_os = "espidf")]
use crate::error::HardwareFault;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Most inputs a board arms as wake sources.
pub const MAX_WAKE_PINS: usize = 4;

pub struct GpioWakePins<P> {
    pins: heapless::Vec<(&'static str, P), MAX_WAKE_PINS>,
}

impl<P: InputPin> GpioWakePins<P> {
    pub fn new() -> Self {
        Self {
            pins: heapless::Vec::new(),
        }
    }

    /// Returns the pin back if the table is full.
    pub fn add(&mut self, name: &'static str, pin: P) -> Result<(), P> {
        self.pins.push((name, pin)).map_err(|(_, pin)| pin)
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

impl<P: InputPin> Default for GpioWakePins<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: InputPin> WakePins for GpioWakePins<P> {
    fn asserted(&mut self) -> Option<&'static str> {
        for (name, pin) in self.pins.iter_mut() {
            match pin.is_low() {
                Ok(false) => {}
                Ok(true) => return Some(*name),
                Err(_) => {
                    warn!("SLEEP | level read failed pin={}", name);
                    return Some(*name);
                }
            }
        }
        None
    }
}

/// Raw GPIO level read through `gpio_get_level`.
///
/// Does not own the pin's configuration: the pulse input is set up by
/// the ISR wiring, the reset button by [`LevelPin::input_pullup`].
#[cfg(target_os = "espidf")]
#[derive(Debug, Clone, Copy)]
pub struct LevelPin {
    gpio: i32,
}

#[cfg(target_os = "espidf")]
impl LevelPin {
    pub fn new(gpio: i32) -> Self {
        Self { gpio }
    }

    /// Configure `gpio` as a plain input with pull-up, no interrupt.
    pub fn input_pullup(gpio: i32) -> Result<Self, HardwareFault> {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << gpio,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
            ..Default::default()
        };
        // SAFETY: cfg outlives the call.
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as esp_err_t {
            log::error!("GPIO{} input config failed (rc={})", gpio, ret);
            return Err(HardwareFault::GpioInit);
        }
        Ok(Self { gpio })
    }
}

#[cfg(target_os = "espidf")]
impl embedded_hal::digital::ErrorType for LevelPin {
    type Error = core::convert::Infallible;
}

#[cfg(target_os = "espidf")]
impl InputPin for LevelPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        // SAFETY: register read on a configured input.
        Ok(unsafe { gpio_get_level(self.gpio) } != 0)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}
