//! Application core: orchestration logic with no direct I/O.
//!
//! [`service::MeterService`] ties the pulse pipeline, metering engine,
//! join controller, sleep gate and transfer session together. Hardware and
//! the mesh stack are reached only through the **port traits** in
//! [`ports`], so the whole core runs on the host against mock adapters.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
