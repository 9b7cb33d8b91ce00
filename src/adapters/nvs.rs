//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] on the `meter`
//! namespace:
//!
//! | Key      | Type  | Content                         |
//! |----------|-------|---------------------------------|
//! | `cfg`    | blob  | postcard-encoded `MeterConfig`  |
//! | `pulses` | u64   | cumulative pulse total          |
//!
//! The host build keeps everything in a `HashMap` and can be told to fail
//! writes, which is how tests exercise the retry path.

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::MeterConfig;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

pub const NAMESPACE: &str = "meter";
pub const KEY_CONFIG: &str = "cfg";

/// Largest config blob read back from flash.
const MAX_BLOB_SIZE: usize = 512;

pub struct NvsAdapter {
    #[cfg(target_os = "espidf")]
    nvs: EspNvs<NvsDefault>,
    #[cfg(not(target_os = "espidf"))]
    store: HashMap<String, Vec<u8>>,
    #[cfg(not(target_os = "espidf"))]
    fail_writes: bool,
}

#[cfg(target_os = "espidf")]
impl NvsAdapter {
    /// Open the `meter` namespace read-write on the default partition.
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self, StorageError> {
        let nvs = EspNvs::new(partition, NAMESPACE, true).map_err(|e| {
            warn!("NVS | open '{}' failed: {}", NAMESPACE, e);
            StorageError::Unavailable
        })?;
        info!("NVS | namespace '{}' open", NAMESPACE);
        Ok(Self { nvs })
    }
}

#[cfg(not(target_os = "espidf"))]
impl NvsAdapter {
    pub fn new() -> Self {
        info!("NVS | simulation backend");
        Self {
            store: HashMap::new(),
            fail_writes: false,
        }
    }

    /// Make every subsequent write fail with [`StorageError::Io`].
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    fn put(&mut self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Io);
        }
        self.store.insert(key.to_owned(), bytes);
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for NvsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<MeterConfig, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        let stored = self.store.get(KEY_CONFIG).cloned();

        #[cfg(target_os = "espidf")]
        let stored = {
            let mut buf = [0u8; MAX_BLOB_SIZE];
            self.nvs
                .get_blob(KEY_CONFIG, &mut buf)
                .map_err(|e| {
                    warn!("NVS | read '{}' failed: {}", KEY_CONFIG, e);
                    ConfigError::Io
                })?
                .map(<[u8]>::to_vec)
        };

        match stored {
            Some(bytes) if bytes.len() <= MAX_BLOB_SIZE => {
                let cfg: MeterConfig =
                    postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                info!("NVS | loaded config ({} bytes)", bytes.len());
                Ok(cfg)
            }
            Some(_) => Err(ConfigError::Corrupted),
            None => {
                info!("NVS | no stored config, using defaults");
                Ok(MeterConfig::default())
            }
        }
    }

    fn save(&mut self, config: &MeterConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::Io)?;

        #[cfg(not(target_os = "espidf"))]
        self.put(KEY_CONFIG, bytes.clone()).map_err(|_| ConfigError::Io)?;

        #[cfg(target_os = "espidf")]
        self.nvs.set_blob(KEY_CONFIG, &bytes).map_err(|e| {
            warn!("NVS | write '{}' failed: {}", KEY_CONFIG, e);
            ConfigError::Io
        })?;

        info!("NVS | config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

impl StoragePort for NvsAdapter {
    fn load_u64(&self, key: &str) -> Result<Option<u64>, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            match self.store.get(key) {
                Some(bytes) => {
                    let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| StorageError::Io)?;
                    Ok(Some(u64::from_le_bytes(raw)))
                }
                None => Ok(None),
            }
        }

        #[cfg(target_os = "espidf")]
        {
            self.nvs.get_u64(key).map_err(|e| {
                warn!("NVS | read '{}' failed: {}", key, e);
                StorageError::Io
            })
        }
    }

    fn save_u64(&mut self, key: &str, value: u64) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.put(key, value.to_le_bytes().to_vec())
        }

        #[cfg(target_os = "espidf")]
        {
            self.nvs.set_u64(key, value).map_err(|e| {
                warn!("NVS | write '{}' failed: {}", key, e);
                StorageError::Io
            })
        }
    }

    fn erase_all(&mut self) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            if self.fail_writes {
                return Err(StorageError::Io);
            }
            self.store.clear();
        }

        #[cfg(target_os = "espidf")]
        for key in [KEY_CONFIG, crate::app::service::KEY_PULSES] {
            self.nvs.remove(key).map_err(|e| {
                warn!("NVS | erase '{}' failed: {}", key, e);
                StorageError::Io
            })?;
        }

        info!("NVS | namespace '{}' erased", NAMESPACE);
        Ok(())
    }
}
