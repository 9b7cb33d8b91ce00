//! PulseMeter firmware library.
//!
//! Exposes the pulse pipeline, metering engine, join controller, sleep
//! gate and OTA state machine for integration testing. All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module, with host stand-ins alongside.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod events;
pub mod metering;
pub mod network;
pub mod ota;
pub mod power;

pub mod error;
pub mod pins;

pub mod adapters;
pub mod drivers;
pub mod sensors;
