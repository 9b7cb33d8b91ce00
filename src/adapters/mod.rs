//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter         | Implements       | Connects to                     |
//! |-----------------|------------------|---------------------------------|
//! | `zigbee`        | MeshPort         | esp-zigbee-lib end device       |
//! | `nvs`           | ConfigPort       | NVS / in-memory store           |
//! |                 | StoragePort      |                                 |
//! | `retry_timer`   | RetryTimer       | esp_timer one-shot              |
//! | `wake_pins`     | WakePins         | GPIO levels                     |
//! | `battery_adc`   | BatteryPort      | ADC1 oneshot + calibration      |
//! | `ota_partition` | FirmwareStorage  | Inactive app partition          |
//! | `system`        | SystemPort       | Chip restart                    |
//! | `log_sink`      | EventSink        | Serial log output               |
//! | `pulse_input`   | (ISR)            | Pulse GPIO edge interrupt       |
//! | `time`          | (clock)          | esp_timer uptime                |
//!
//! Each adapter has a host stand-in selected when not building for
//! `espidf`, so the domain and its tests run on the development machine.

pub mod battery_adc;
pub mod log_sink;
pub mod nvs;
pub mod ota_partition;
pub mod pulse_input;
pub mod retry_timer;
pub mod system;
pub mod time;
pub mod wake_pins;
pub mod zigbee;
