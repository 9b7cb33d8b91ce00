//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the host adapters. All tests run on the host (x86_64) with no
//! real hardware or radio required.

mod join_flow_tests;
mod mock_ports;
mod ota_flow_tests;
mod service_tests;
mod sleep_tests;
