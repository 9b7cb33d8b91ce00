//! Unified error types for the pulse meter firmware.
//!
//! A single `Error` enum that every subsystem converts into, so the
//! orchestrator loop can log and carry on uniformly. All variants are
//! `Copy`; nothing here allocates.
//!
//! | Category        | Recovery                                              |
//! |-----------------|-------------------------------------------------------|
//! | Hardware        | log, fall back to last-known-good or "unknown"        |
//! | Protocol        | retry/backoff in the join controller                  |
//! | Storage         | log, defaults on read, skipped write retried later    |
//! | Transfer        | abort the OTA session, keep the running image         |
//! | Config          | reject the update, keep the previous configuration    |

use core::fmt;

pub use crate::app::ports::{ConfigError, FirmwareStorageError, StorageError};
pub use crate::ota::OtaError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A peripheral could not be initialised or sampled.
    Hardware(HardwareFault),
    /// The mesh stack reported a failed join or steering attempt.
    Protocol(ProtocolFailure),
    /// Persistent storage read or write failed.
    Storage(StorageError),
    /// A firmware transfer was rejected or aborted.
    Transfer(OtaError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware(e) => write!(f, "hardware: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Transfer(e) => write!(f, "transfer: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Hardware faults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareFault {
    /// GPIO configuration or ISR registration failed.
    GpioInit,
    /// ADC unit or channel setup failed.
    AdcInit,
    /// ADC sampling produced too few sane readings.
    AdcRead,
    /// A hardware timer could not be created or armed.
    Timer,
}

impl fmt::Display for HardwareFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioInit => write!(f, "GPIO init failed"),
            Self::AdcInit => write!(f, "ADC init failed"),
            Self::AdcRead => write!(f, "ADC read failed"),
            Self::Timer => write!(f, "timer setup failed"),
        }
    }
}

impl core::error::Error for HardwareFault {}

impl From<HardwareFault> for Error {
    fn from(e: HardwareFault) -> Self {
        Self::Hardware(e)
    }
}

// ---------------------------------------------------------------------------
// Protocol failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFailure {
    /// Network steering finished without finding a network.
    SteeringFailed(i32),
    /// Rejoin after reboot failed.
    RebootRejoinFailed(i32),
    /// Stack initialisation reported an error.
    StartupFailed(i32),
    /// The attempt budget is spent and the controller stopped retrying.
    AttemptsExhausted,
    /// A bind request could not be issued or completed.
    BindFailed,
}

impl fmt::Display for ProtocolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SteeringFailed(rc) => write!(f, "steering failed (rc={rc})"),
            Self::RebootRejoinFailed(rc) => write!(f, "rejoin after reboot failed (rc={rc})"),
            Self::StartupFailed(rc) => write!(f, "stack startup failed (rc={rc})"),
            Self::AttemptsExhausted => write!(f, "join attempt budget exhausted"),
            Self::BindFailed => write!(f, "bind request failed"),
        }
    }
}

impl core::error::Error for ProtocolFailure {}

impl From<ProtocolFailure> for Error {
    fn from(e: ProtocolFailure) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Conversions from port and subsystem errors
// ---------------------------------------------------------------------------

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<OtaError> for Error {
    fn from(e: OtaError) -> Self {
        Self::Transfer(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ValidationFailed(msg) => Self::Config(msg),
            ConfigError::Corrupted => Self::Config("stored config corrupted"),
            ConfigError::Io => Self::Storage(StorageError::Io),
        }
    }
}

impl From<FirmwareStorageError> for Error {
    fn from(e: FirmwareStorageError) -> Self {
        Self::Transfer(OtaError::Storage(e))
    }
}
