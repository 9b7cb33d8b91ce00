//! Inbound commands to the application service.
//!
//! [`MeterService`](super::service::MeterService) raises `ResetCounter`
//! and `FactoryReset` itself, from the maintenance-cluster write and the
//! reset-button hold. `UpdateConfig`, `SaveNow` and `RestartSteering` have
//! no producer in the firmware binary: they are library API for an
//! embedding application (a serial console, a provisioning tool) and are
//! exercised by the host integration tests.

use crate::config::MeterConfig;

#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Zero the cumulative counter and persist the zero.
    ResetCounter,

    /// Wipe persisted state, leave the network and restart.
    FactoryReset,

    /// Hot-apply a new configuration and persist it.
    UpdateConfig(MeterConfig),

    /// Write the total now if it has unsaved changes.
    SaveNow,

    /// Leave the halted state and steer with a fresh budget.
    RestartSteering,
}
