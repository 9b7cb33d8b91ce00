//! Chip control behind [`SystemPort`].

use log::warn;

use crate::app::ports::SystemPort;

#[cfg(target_os = "espidf")]
pub struct EspSystem;

#[cfg(target_os = "espidf")]
impl SystemPort for EspSystem {
    fn restart(&mut self) {
        warn!("SYS | restarting");
        // Give the UART a moment to flush the last log lines.
        esp_idf_svc::hal::delay::FreeRtos::delay_ms(100);
        esp_ota::restart();
    }
}

/// Counts restart requests instead of rebooting.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct SimSystem {
    pub restarts: u32,
}

#[cfg(not(target_os = "espidf"))]
impl SystemPort for SimSystem {
    fn restart(&mut self) {
        warn!("SYS | sim restart requested");
        self.restarts += 1;
    }
}
