//! Inactive OTA partition behind [`FirmwareStorage`].
//!
//! On target this is `esp-ota`: `begin` opens the next update partition,
//! `write` appends, `end` validates the image and `set_boot_target` marks
//! it for the next boot. Dropping an open handle aborts the update.
//!
//! The host version collects the image in memory and can be told to fail
//! any single step.

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

use crate::app::ports::{FirmwareStorage, FirmwareStorageError};

#[cfg(target_os = "espidf")]
pub struct OtaPartition {
    update: Option<esp_ota::OtaUpdate>,
    completed: Option<esp_ota::CompletedOtaUpdate>,
    written: u32,
}

#[cfg(target_os = "espidf")]
impl OtaPartition {
    pub fn new() -> Self {
        Self {
            update: None,
            completed: None,
            written: 0,
        }
    }
}

#[cfg(target_os = "espidf")]
impl Default for OtaPartition {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "espidf")]
impl FirmwareStorage for OtaPartition {
    fn begin(&mut self, image_size: u32) -> Result<(), FirmwareStorageError> {
        self.abort();
        let update = esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("OTA | partition begin failed: {:?}", e);
            FirmwareStorageError::BeginFailed
        })?;
        self.update = Some(update);
        info!("OTA | partition open for {} bytes", image_size);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FirmwareStorageError> {
        let update = self.update.as_mut().ok_or(FirmwareStorageError::NotOpen)?;
        if offset != self.written {
            warn!("OTA | write at {} but {} written", offset, self.written);
            return Err(FirmwareStorageError::WriteFailed);
        }
        update.write(data).map_err(|e| {
            warn!("OTA | partition write failed: {:?}", e);
            FirmwareStorageError::WriteFailed
        })?;
        self.written += data.len() as u32;
        Ok(())
    }

    fn end(&mut self) -> Result<(), FirmwareStorageError> {
        let update = self.update.take().ok_or(FirmwareStorageError::NotOpen)?;
        let completed = update.finalize().map_err(|e| {
            warn!("OTA | image validation failed: {:?}", e);
            FirmwareStorageError::EndFailed
        })?;
        self.completed = Some(completed);
        Ok(())
    }

    fn set_boot_target(&mut self) -> Result<(), FirmwareStorageError> {
        let completed = self.completed.as_mut().ok_or(FirmwareStorageError::NotOpen)?;
        completed.set_as_boot_partition().map_err(|e| {
            warn!("OTA | set boot partition failed: {:?}", e);
            FirmwareStorageError::BootSetFailed
        })?;
        info!("OTA | boot partition switched ({} bytes)", self.written);
        Ok(())
    }

    fn abort(&mut self) {
        if self.update.take().is_some() {
            warn!("OTA | partition write aborted at {} bytes", self.written);
        }
        self.completed = None;
        self.written = 0;
    }
}

/// Which step the host partition should refuse.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Begin,
    Write,
    End,
    BootSet,
}

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct SimPartition {
    image: Vec<u8>,
    open: bool,
    ended: bool,
    boot_set: bool,
    aborts: u32,
    fail_at: Option<FailAt>,
}

#[cfg(not(target_os = "espidf"))]
impl SimPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_at(&mut self, step: Option<FailAt>) {
        self.fail_at = step;
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn is_boot_target(&self) -> bool {
        self.boot_set
    }

    pub fn aborts(&self) -> u32 {
        self.aborts
    }

    fn refuse(&self, step: FailAt) -> bool {
        self.fail_at == Some(step)
    }
}

#[cfg(not(target_os = "espidf"))]
impl FirmwareStorage for SimPartition {
    fn begin(&mut self, image_size: u32) -> Result<(), FirmwareStorageError> {
        if self.refuse(FailAt::Begin) {
            return Err(FirmwareStorageError::BeginFailed);
        }
        self.image.clear();
        self.image.reserve(image_size as usize);
        self.open = true;
        self.ended = false;
        self.boot_set = false;
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FirmwareStorageError> {
        if !self.open {
            return Err(FirmwareStorageError::NotOpen);
        }
        if self.refuse(FailAt::Write) || offset as usize != self.image.len() {
            return Err(FirmwareStorageError::WriteFailed);
        }
        self.image.extend_from_slice(data);
        Ok(())
    }

    fn end(&mut self) -> Result<(), FirmwareStorageError> {
        if !self.open {
            return Err(FirmwareStorageError::NotOpen);
        }
        self.open = false;
        if self.refuse(FailAt::End) {
            return Err(FirmwareStorageError::EndFailed);
        }
        self.ended = true;
        Ok(())
    }

    fn set_boot_target(&mut self) -> Result<(), FirmwareStorageError> {
        if !self.ended {
            return Err(FirmwareStorageError::NotOpen);
        }
        if self.refuse(FailAt::BootSet) {
            return Err(FirmwareStorageError::BootSetFailed);
        }
        self.boot_set = true;
        Ok(())
    }

    fn abort(&mut self) {
        if self.open {
            self.aborts += 1;
        }
        self.open = false;
        self.ended = false;
    }
}

/// Confirm the running image so the bootloader does not roll back.
#[cfg(target_os = "espidf")]
pub fn mark_running_valid() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("OTA | running image marked valid"),
        Err(e) => warn!("OTA | mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn mark_running_valid() {
    info!("OTA | sim: rollback check skipped");
}
