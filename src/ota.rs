//! Firmware transfer state machine.
//!
//! Flow: `start` → N × `receive` → `check` → `apply` → `finish` → restart.
//!
//! The mesh stack owns the transfer protocol; this module only reassembles
//! the chunk stream into the inactive partition through [`FirmwareStorage`].
//! Two stream formats arrive in practice:
//!
//! - raw: every chunk is image bytes;
//! - tag-wrapped: the image is prefixed with one sub-element header
//!   `tag: u16 LE = 0x0000, length: u32 LE` whose length plus the header
//!   size equals the advertised image size.
//!
//! The format is decided once per session from the first chunk. Nothing is
//! committed unless the received byte count matches the expected size.

use core::fmt;

use log::{error, info, warn};

use crate::app::ports::{FirmwareStorage, FirmwareStorageError};

/// Sub-element header size: tag (2) + length (4).
pub const ELEMENT_HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    /// Advertised image size is zero.
    InvalidSize,
    /// Chunk arrived with no open session.
    NotReceiving,
    /// Tag-wrapped stream whose first chunk holds nothing past the header.
    HeaderTooShort,
    /// Chunk would run past the expected size.
    Overflow,
    SizeMismatch { received: u32, expected: u32 },
    /// Apply or finish without a passing check.
    NotChecked,
    Storage(FirmwareStorageError),
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize => write!(f, "image size must be non-zero"),
            Self::NotReceiving => write!(f, "no transfer in progress"),
            Self::HeaderTooShort => write!(f, "first chunk shorter than element header"),
            Self::Overflow => write!(f, "chunk exceeds expected image size"),
            Self::SizeMismatch { received, expected } => {
                write!(f, "received {received} of {expected} bytes")
            }
            Self::NotChecked => write!(f, "image not checked"),
            Self::Storage(e) => write!(f, "firmware storage: {e}"),
        }
    }
}

impl core::error::Error for OtaError {}

impl From<FirmwareStorageError> for OtaError {
    fn from(e: FirmwareStorageError) -> Self {
        Self::Storage(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    Unknown,
    Raw,
    TagWrapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaPhase {
    Idle,
    Receiving,
    Checked,
    Applying,
    /// Image committed as the next boot target; a restart is due.
    Finished,
    /// Session dropped without committing.
    Failed,
}

pub struct OtaSession {
    phase: OtaPhase,
    /// Size advertised by the session header.
    image_size: u32,
    /// Bytes expected in storage; the header length for tag-wrapped streams.
    expected_size: u32,
    received_offset: u32,
    header_mode: HeaderMode,
    tag_consumed: bool,
    file_version: u32,
}

impl OtaSession {
    pub const fn new() -> Self {
        Self {
            phase: OtaPhase::Idle,
            image_size: 0,
            expected_size: 0,
            received_offset: 0,
            header_mode: HeaderMode::Unknown,
            tag_consumed: false,
            file_version: 0,
        }
    }

    pub fn phase(&self) -> OtaPhase {
        self.phase
    }

    pub fn header_mode(&self) -> HeaderMode {
        self.header_mode
    }

    pub fn received_offset(&self) -> u32 {
        self.received_offset
    }

    pub fn expected_size(&self) -> u32 {
        self.expected_size
    }

    pub fn file_version(&self) -> u32 {
        self.file_version
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            OtaPhase::Receiving | OtaPhase::Checked | OtaPhase::Applying
        )
    }

    pub fn progress_percent(&self) -> u8 {
        if self.expected_size == 0 {
            return 0;
        }
        let pct = u64::from(self.received_offset) * 100 / u64::from(self.expected_size);
        pct.min(100) as u8
    }

    /// Open a new session. An active one is aborted first.
    pub fn start(
        &mut self,
        image_size: u32,
        file_version: u32,
        storage: &mut dyn FirmwareStorage,
    ) -> Result<(), OtaError> {
        if self.is_active() {
            warn!("OTA | restart over active session at {}", self.received_offset);
            storage.abort();
        }
        *self = Self::new();
        if image_size == 0 {
            self.phase = OtaPhase::Failed;
            return Err(OtaError::InvalidSize);
        }
        if let Err(e) = storage.begin(image_size) {
            self.phase = OtaPhase::Failed;
            error!("OTA | begin failed: {}", e);
            return Err(e.into());
        }
        self.image_size = image_size;
        self.expected_size = image_size;
        self.file_version = file_version;
        self.phase = OtaPhase::Receiving;
        info!("OTA | start version=0x{:08x} size={}", file_version, image_size);
        Ok(())
    }

    fn detect_header(&mut self, chunk: &[u8]) {
        self.header_mode = HeaderMode::Raw;
        if chunk.len() < ELEMENT_HEADER_LEN {
            return;
        }
        let tag = u16::from_le_bytes([chunk[0], chunk[1]]);
        let length = u32::from_le_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
        if tag == 0 && u64::from(length) + ELEMENT_HEADER_LEN as u64 == u64::from(self.image_size) {
            self.header_mode = HeaderMode::TagWrapped;
            self.expected_size = length;
        }
    }

    fn fail(&mut self, storage: &mut dyn FirmwareStorage, err: OtaError) -> OtaError {
        storage.abort();
        self.phase = OtaPhase::Failed;
        error!("OTA | failed at {}: {}", self.received_offset, err);
        err
    }

    /// Write one chunk. Returns the new received offset.
    pub fn receive(
        &mut self,
        chunk: &[u8],
        storage: &mut dyn FirmwareStorage,
    ) -> Result<u32, OtaError> {
        if self.phase != OtaPhase::Receiving {
            return Err(OtaError::NotReceiving);
        }
        if chunk.is_empty() {
            return Ok(self.received_offset);
        }
        if self.header_mode == HeaderMode::Unknown {
            self.detect_header(chunk);
        }

        let data = if self.header_mode == HeaderMode::TagWrapped && !self.tag_consumed {
            if chunk.len() <= ELEMENT_HEADER_LEN {
                return Err(self.fail(storage, OtaError::HeaderTooShort));
            }
            self.tag_consumed = true;
            &chunk[ELEMENT_HEADER_LEN..]
        } else {
            chunk
        };

        let end = u64::from(self.received_offset) + data.len() as u64;
        if end > u64::from(self.expected_size) {
            return Err(self.fail(storage, OtaError::Overflow));
        }
        if let Err(e) = storage.write(self.received_offset, data) {
            return Err(self.fail(storage, e.into()));
        }
        self.received_offset = end as u32;
        info!(
            "OTA | recv {}/{} ({}%)",
            self.received_offset,
            self.expected_size,
            self.progress_percent()
        );
        Ok(self.received_offset)
    }

    /// Passes iff every expected byte was written.
    pub fn check(&mut self, storage: &mut dyn FirmwareStorage) -> Result<(), OtaError> {
        if self.phase != OtaPhase::Receiving {
            return Err(OtaError::NotReceiving);
        }
        if self.received_offset != self.expected_size {
            let err = OtaError::SizeMismatch {
                received: self.received_offset,
                expected: self.expected_size,
            };
            return Err(self.fail(storage, err));
        }
        self.phase = OtaPhase::Checked;
        info!("OTA | check ok ({} bytes, {:?})", self.received_offset, self.header_mode);
        Ok(())
    }

    pub fn apply(&mut self) -> Result<(), OtaError> {
        match self.phase {
            OtaPhase::Checked | OtaPhase::Applying => {
                self.phase = OtaPhase::Applying;
                info!("OTA | apply");
                Ok(())
            }
            _ => Err(OtaError::NotChecked),
        }
    }

    /// Close the image and make it the next boot target.
    ///
    /// On success the caller restarts the node.
    pub fn finish(&mut self, storage: &mut dyn FirmwareStorage) -> Result<(), OtaError> {
        if !matches!(self.phase, OtaPhase::Checked | OtaPhase::Applying) {
            return Err(OtaError::NotChecked);
        }
        if let Err(e) = storage.end() {
            return Err(self.fail(storage, e.into()));
        }
        if let Err(e) = storage.set_boot_target() {
            return Err(self.fail(storage, e.into()));
        }
        self.phase = OtaPhase::Finished;
        info!(
            "OTA | finish version=0x{:08x} size={}",
            self.file_version, self.received_offset
        );
        Ok(())
    }

    /// Drop the session without committing.
    pub fn abort(&mut self, storage: &mut dyn FirmwareStorage) {
        if self.is_active() {
            storage.abort();
            warn!("OTA | aborted at {}", self.received_offset);
        }
        *self = Self::new();
    }
}

impl Default for OtaSession {
    fn default() -> Self {
        Self::new()
    }
}
