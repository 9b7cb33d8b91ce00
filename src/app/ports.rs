//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ MeterService (domain)
//! ```
//!
//! The Zigbee stack, NVS, OTA partition, timers, GPIO and ADC are all
//! reached through these traits. The [`MeterService`](super::service::MeterService)
//! receives them bundled in [`Ports`] at each call site, so the domain core
//! never holds on to hardware.

use core::fmt;

use crate::config::{MeterConfig, ReportConfig};
use crate::error::HardwareFault;
use crate::network::bind::BindRequest;
use crate::network::zcl::AttrValue;
use crate::power::WakeInfo;

// ───────────────────────────────────────────────────────────────
// Mesh stack (driven adapter: domain ↔ Zigbee)
// ───────────────────────────────────────────────────────────────

/// Raw status code returned by the mesh stack when it refuses a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshError(pub i32);

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh stack error {}", self.0)
    }
}

impl core::error::Error for MeshError {}

/// Commands into the Zigbee stack.
///
/// Everything here is fire-and-forget: completion comes back later as a
/// [`MeshSignal`](crate::network::MeshSignal) on the event queue.
pub trait MeshPort {
    /// Kick off network steering.
    fn start_steering(&mut self) -> Result<(), MeshError>;

    fn set_tx_power(&mut self, dbm: i8);

    /// Write a local attribute value on the application endpoint.
    fn set_attribute(&mut self, cluster: u16, attr: u16, value: &AttrValue);

    /// Install a reporting entry for a local attribute.
    fn configure_reporting(&mut self, cluster: u16, attr: u16, report: &ReportConfig);

    /// Ask for a binding of `request.cluster` to the report destination.
    /// `token` comes back in the matching `BindComplete` signal.
    fn bind_request(&mut self, request: &BindRequest, token: u16) -> Result<(), MeshError>;

    /// Forget network credentials.
    fn factory_reset(&mut self);

    /// Enter light sleep now and report how the node woke.
    fn sleep_now(&mut self) -> WakeInfo;
}

// ───────────────────────────────────────────────────────────────
// Storage ports (driven adapter: domain ↔ NVS)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the meter configuration blob.
///
/// Implementations validate before persisting and reject invalid values
/// with [`ConfigError::ValidationFailed`] instead of clamping them.
pub trait ConfigPort {
    /// Returns [`MeterConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<MeterConfig, ConfigError>;

    fn save(&mut self, config: &MeterConfig) -> Result<(), ConfigError>;
}

/// Persistent scalar storage for the pulse total.
pub trait StoragePort {
    /// `Ok(None)` when the key has never been written.
    fn load_u64(&self, key: &str) -> Result<Option<u64>, StorageError>;

    fn save_u64(&mut self, key: &str, value: u64) -> Result<(), StorageError>;

    /// Wipe every key in the meter namespace.
    fn erase_all(&mut self) -> Result<(), StorageError>;
}

/// Both storage roles; the NVS adapter serves them from one handle.
pub trait Persistence: StoragePort + ConfigPort {}

impl<T: StoragePort + ConfigPort> Persistence for T {}

// ───────────────────────────────────────────────────────────────
// Timer / GPIO / ADC ports
// ───────────────────────────────────────────────────────────────

/// One-shot timer for steering retries.
///
/// The expiry callback only raises a flag; [`take_expired`](Self::take_expired)
/// is how the loop observes it. `start_once` stops any armed timer first,
/// and `stop` is idempotent.
pub trait RetryTimer {
    fn start_once(&mut self, delay_us: u64) -> Result<(), HardwareFault>;

    fn stop(&mut self);

    /// Consume the expiry flag.
    fn take_expired(&mut self) -> bool;
}

/// Level reads on inputs that are armed as wake sources.
pub trait WakePins {
    /// Name of the first input currently asserted, if any.
    fn asserted(&mut self) -> Option<&'static str>;
}

/// Battery voltage after divider scaling and sample averaging.
pub trait BatteryPort {
    fn read_millivolts(&mut self) -> Result<u16, HardwareFault>;
}

// ───────────────────────────────────────────────────────────────
// Firmware storage (driven adapter: domain → OTA partition)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareStorageError {
    /// No inactive OTA partition to write into.
    NoPartition,
    BeginFailed,
    WriteFailed,
    /// The written image did not validate.
    EndFailed,
    BootSetFailed,
    /// A write arrived with no open update handle.
    NotOpen,
}

impl fmt::Display for FirmwareStorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPartition => write!(f, "no inactive OTA partition"),
            Self::BeginFailed => write!(f, "OTA begin failed"),
            Self::WriteFailed => write!(f, "OTA write failed"),
            Self::EndFailed => write!(f, "image validation failed"),
            Self::BootSetFailed => write!(f, "set boot partition failed"),
            Self::NotOpen => write!(f, "no open update handle"),
        }
    }
}

impl core::error::Error for FirmwareStorageError {}

/// The inactive application partition.
pub trait FirmwareStorage {
    fn begin(&mut self, image_size: u32) -> Result<(), FirmwareStorageError>;

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FirmwareStorageError>;

    fn end(&mut self) -> Result<(), FirmwareStorageError>;

    fn set_boot_target(&mut self) -> Result<(), FirmwareStorageError>;

    /// Drop any open handle without committing.
    fn abort(&mut self);
}

// ───────────────────────────────────────────────────────────────
// System control + event sink
// ───────────────────────────────────────────────────────────────

pub trait SystemPort {
    /// Reboot the chip. Never returns on hardware.
    fn restart(&mut self);
}

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

/// Every adapter the service talks to, borrowed for one call.
pub struct Ports<'p> {
    pub mesh: &'p mut dyn MeshPort,
    pub store: &'p mut dyn Persistence,
    pub retry_timer: &'p mut dyn RetryTimer,
    pub wake_pins: &'p mut dyn WakePins,
    pub battery: &'p mut dyn BatteryPort,
    pub firmware: &'p mut dyn FirmwareStorage,
    pub system: &'p mut dyn SystemPort,
    pub sink: &'p mut dyn EventSink,
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field is out of range.
    ValidationFailed(&'static str),
    /// The stored blob could not be decoded.
    Corrupted,
    /// The underlying storage failed.
    Io,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::Corrupted => write!(f, "stored config corrupted"),
            Self::Io => write!(f, "storage I/O error"),
        }
    }
}

impl core::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Flash read/write or commit failed.
    Io,
    /// The namespace could not be opened.
    Unavailable,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "storage I/O error"),
            Self::Unavailable => write!(f, "storage namespace unavailable"),
        }
    }
}

impl core::error::Error for StorageError {}
