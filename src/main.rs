//! PulseMeter Firmware: Main Entry Point
//!
//! Battery-powered Zigbee end device counting S0 / reed pulses.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  ZigbeeMesh      NvsAdapter       EspRetryTimer  AdcBattery    │
//! │  (MeshPort)      (Config+Storage) (RetryTimer)   (BatteryPort) │
//! │  OtaPartition    GpioWakePins     EspSystem      LogEventSink  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              MeterService (pure logic)                 │    │
//! │  │  Metering · Join · Sleep gate · OTA session            │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Pulse ISR ─▶ PulseCounter      Stack callbacks ─▶ queues      │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop below is also the Zigbee task: every stack call and every
//! stack callback happens on this thread.
#![deny(unused_must_use)]

use anyhow::Result;
use log::{info, warn};

use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use pulsemeter::adapters::battery_adc::AdcBattery;
use pulsemeter::adapters::log_sink::LogEventSink;
use pulsemeter::adapters::nvs::NvsAdapter;
use pulsemeter::adapters::ota_partition::{self, OtaPartition};
use pulsemeter::adapters::retry_timer::EspRetryTimer;
use pulsemeter::adapters::system::EspSystem;
use pulsemeter::adapters::time::MonotonicClock;
use pulsemeter::adapters::wake_pins::{GpioWakePins, LevelPin};
use pulsemeter::adapters::{pulse_input, zigbee};
use pulsemeter::app::ports::{ConfigPort, EventSink, MeshPort, Ports, StoragePort, SystemPort};
use pulsemeter::app::service::{MeterService, KEY_PULSES};
use pulsemeter::config::MeterConfig;
use pulsemeter::drivers::{button::ResetButton, hw_timer};
use pulsemeter::events::{self, push_event, Event};
use pulsemeter::sensors::pulse::PulseCounter;

/// Shared with the pulse ISR for the lifetime of the program.
static PULSES: PulseCounter = PulseCounter::new();

fn load_config(nvs: &NvsAdapter) -> MeterConfig {
    let mut config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Config load failed ({}), using defaults", e);
            return MeterConfig::default();
        }
    };
    config.sanitize();
    if let Err(e) = config.validate() {
        warn!("Stored config rejected ({}), using defaults", e);
        return MeterConfig::default();
    }
    config
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  PulseMeter v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    ota_partition::mark_running_valid();

    // ── 2. Storage + config ───────────────────────────────────
    let partition = EspDefaultNvsPartition::take()?;
    let mut nvs = NvsAdapter::new(partition)?;
    let config = load_config(&nvs);
    match serde_json::to_string(&config) {
        Ok(json) => info!("Config: {}", json),
        Err(e) => warn!("Config not printable: {}", e),
    }

    let initial_total = match nvs.load_u64(KEY_PULSES) {
        Ok(total) => total.unwrap_or(0),
        Err(e) => {
            warn!("Pulse total unreadable ({}), starting at 0", e);
            0
        }
    };
    info!("Restored total={}", initial_total);

    let mut sink = LogEventSink::new();
    let mut system = EspSystem;

    // ── 3. Reset button (held through power-up) ───────────────
    let mut button = match config.reset_button.gpio {
        Some(gpio) => match LevelPin::input_pullup(gpio) {
            Ok(pin) => Some(ResetButton::new(pin, config.reset_button.hold_ms)),
            Err(e) => {
                warn!("Reset button disabled: {}", e);
                None
            }
        },
        None => None,
    };
    if let Some(b) = button.as_mut() {
        if b.held_at_boot(FreeRtos::delay_ms) {
            sink.emit(&pulsemeter::app::events::AppEvent::FactoryReset);
            if let Err(e) = nvs.erase_all() {
                warn!("NVS erase failed: {}", e);
            }
            system.restart();
        }
    }

    // ── 4. Pulse input ────────────────────────────────────────
    let service_pulses: &'static PulseCounter = &PULSES;
    pulse_input::attach(config.pulse.gpio, service_pulses)?;

    let mut wake_pins = GpioWakePins::new();
    let mut wake_gpios: heapless::Vec<i32, 2> = heapless::Vec::new();
    let inputs = [Some(("pulse", config.pulse.gpio)), config.reset_button.gpio.map(|g| ("reset", g))];
    for (name, gpio) in inputs.into_iter().flatten() {
        if wake_pins.add(name, LevelPin::new(gpio)).is_err() {
            warn!("Wake pin table full, {} (GPIO{}) not checked before sleep", name, gpio);
        }
        if wake_gpios.push(gpio).is_err() {
            warn!("Wake mask full, {} (GPIO{}) will not wake the node", name, gpio);
        }
    }

    // ── 5. Timers, ADC, mesh stack ────────────────────────────
    let mut battery = AdcBattery::new(config.battery)?;
    hw_timer::start_battery_timer(config.battery.sample_period_s);
    let mut retry_timer = EspRetryTimer::new()?;
    let mut firmware = OtaPartition::new();

    let mut mesh = zigbee::init(&config)?;
    zigbee::arm_wake_sources(&wake_gpios);
    mesh.set_tx_power(config.steering.join_tx_power_dbm);

    // ── 6. Service ────────────────────────────────────────────
    let clock = MonotonicClock::new();
    let mut app = MeterService::new(config, service_pulses, initial_total);
    {
        let mut ports = Ports {
            mesh: &mut mesh,
            store: &mut nvs,
            retry_timer: &mut retry_timer,
            wake_pins: &mut wake_pins,
            battery: &mut battery,
            firmware: &mut firmware,
            system: &mut system,
            sink: &mut sink,
        };
        app.start(&mut ports, clock.uptime_us());
    }

    info!("System ready. Entering event loop.");

    // ── 7. Event loop ─────────────────────────────────────────
    loop {
        if let Some(b) = button.as_mut() {
            if b.tick(clock.uptime_us()) && !push_event(Event::FactoryResetHold) {
                warn!("Event queue full, factory reset hold dropped");
            }
        }

        zigbee::main_loop_iteration();

        let mut ports = Ports {
            mesh: &mut mesh,
            store: &mut nvs,
            retry_timer: &mut retry_timer,
            wake_pins: &mut wake_pins,
            battery: &mut battery,
            firmware: &mut firmware,
            system: &mut system,
            sink: &mut sink,
        };

        events::drain_events(|event| app.handle_event(event, &mut ports, clock.uptime_us()));

        while let Some(msg) = events::pop_ota() {
            if let Err(e) = app.handle_ota(msg, &mut ports, clock.uptime_us()) {
                warn!("OTA step rejected: {}", e);
            }
        }

        app.run_once(&mut ports, clock.uptime_us());
    }
}
