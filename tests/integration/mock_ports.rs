//! Host rig for integration tests.
//!
//! Wires the library's host adapters (SimMesh, the HashMap NVS backend,
//! SimPartition, ...) into one `Ports` bundle driven by a manual clock, and
//! records every `AppEvent` so tests can assert on the full history.

use std::cell::Cell;
use std::rc::Rc;

use pulsemeter::adapters::battery_adc::SimBattery;
use pulsemeter::adapters::nvs::NvsAdapter;
use pulsemeter::adapters::ota_partition::SimPartition;
use pulsemeter::adapters::pulse_input::dispatch_edge;
use pulsemeter::adapters::retry_timer::SimRetryTimer;
use pulsemeter::adapters::system::SimSystem;
use pulsemeter::adapters::zigbee::SimMesh;
use pulsemeter::app::commands::AppCommand;
use pulsemeter::app::events::AppEvent;
use pulsemeter::app::ports::{EventSink, Ports, WakePins};
use pulsemeter::app::service::MeterService;
use pulsemeter::config::MeterConfig;
use pulsemeter::error;
use pulsemeter::events::{Event, OtaMessage};
use pulsemeter::network::MeshSignal;
use pulsemeter::sensors::pulse::PulseCounter;

// ── Event recorder ────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn contains(&self, event: &AppEvent) -> bool {
        self.events.contains(event)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Wake pin levels ───────────────────────────────────────────

#[derive(Default)]
pub struct MockWakePins {
    pub asserted: Option<&'static str>,
}

impl WakePins for MockWakePins {
    fn asserted(&mut self) -> Option<&'static str> {
        self.asserted
    }
}

// ── Rig ───────────────────────────────────────────────────────

pub type Clock = Box<dyn Fn() -> u64>;

pub struct Rig {
    now: Rc<Cell<u64>>,
    pub mesh: SimMesh,
    pub store: NvsAdapter,
    pub timer: SimRetryTimer<Clock>,
    pub pins: MockWakePins,
    pub battery: SimBattery,
    pub firmware: SimPartition,
    pub system: SimSystem,
    pub sink: RecordingSink,
}

/// Debounce-safe spacing between test pulses.
pub const PULSE_GAP_US: u64 = 1_000_000;

#[allow(dead_code)]
impl Rig {
    pub fn new(config: &MeterConfig) -> Self {
        let now = Rc::new(Cell::new(1_000_000));
        let clock = Rc::clone(&now);
        let mut battery = SimBattery::new(config.battery);
        battery.set_tap_mv(Some(1400));
        Self {
            now,
            mesh: SimMesh::new(),
            store: NvsAdapter::new(),
            timer: SimRetryTimer::new(Box::new(move || clock.get()) as Clock),
            pins: MockWakePins::default(),
            battery,
            firmware: SimPartition::new(),
            system: SimSystem::default(),
            sink: RecordingSink::default(),
        }
    }

    pub fn ports(&mut self) -> Ports<'_> {
        Ports {
            mesh: &mut self.mesh,
            store: &mut self.store,
            retry_timer: &mut self.timer,
            wake_pins: &mut self.pins,
            battery: &mut self.battery,
            firmware: &mut self.firmware,
            system: &mut self.system,
            sink: &mut self.sink,
        }
    }

    pub fn now(&self) -> u64 {
        self.now.get()
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now.set(self.now.get() + ms * 1000);
    }

    pub fn advance_s(&self, s: u64) {
        self.advance_ms(s * 1000);
    }

    pub fn start(&mut self, app: &mut MeterService<'_>) {
        let now = self.now();
        app.start(&mut self.ports(), now);
    }

    pub fn tick(&mut self, app: &mut MeterService<'_>) {
        let now = self.now();
        app.run_once(&mut self.ports(), now);
    }

    pub fn event(&mut self, app: &mut MeterService<'_>, event: Event) {
        let now = self.now();
        app.handle_event(event, &mut self.ports(), now);
    }

    pub fn signal(&mut self, app: &mut MeterService<'_>, signal: MeshSignal) {
        self.event(app, Event::Mesh(signal));
    }

    pub fn command(&mut self, app: &mut MeterService<'_>, cmd: AppCommand) -> error::Result<()> {
        let now = self.now();
        app.handle_command(cmd, &mut self.ports(), now)
    }

    pub fn ota(&mut self, app: &mut MeterService<'_>, msg: OtaMessage) -> error::Result<()> {
        let now = self.now();
        app.handle_ota(msg, &mut self.ports(), now)
    }

    /// One clean contact closure of `width_ms`, then a debounce-safe gap.
    pub fn pulse(&self, counter: &PulseCounter, width_ms: u64) {
        dispatch_edge(counter, true, self.now());
        self.advance_ms(width_ms);
        dispatch_edge(counter, false, self.now());
        self.advance_ms(PULSE_GAP_US / 1000);
    }

    /// Bring the node to `Joined` through a first-start steering round.
    pub fn join(&mut self, app: &mut MeterService<'_>) {
        self.signal(app, MeshSignal::FirstStart { status: 0, joined: false });
        self.signal(app, MeshSignal::Steering { status: 0 });
    }
}
