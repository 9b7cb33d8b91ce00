//! Sleep admission: who may veto light sleep and what a level wake counts.

use crate::mock_ports::Rig;

use pulsemeter::app::events::AppEvent;
use pulsemeter::app::service::MeterService;
use pulsemeter::config::MeterConfig;
use pulsemeter::network::MeshSignal;
use pulsemeter::power::{WakeCause, WakeInfo};
use pulsemeter::sensors::pulse::PulseCounter;

fn slept(rig: &Rig) -> usize {
    rig.sink.count(|e| matches!(e, AppEvent::Slept { .. }))
}

#[test]
fn no_sleep_before_join() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.signal(&mut app, MeshSignal::FirstStart { status: 0, joined: false });

    rig.signal(&mut app, MeshSignal::CanSleep);

    assert_eq!(rig.mesh.sleeps, 0);
}

#[test]
fn grace_window_after_join_holds_the_node_awake() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.join(&mut app);

    rig.advance_s(29);
    rig.signal(&mut app, MeshSignal::CanSleep);
    assert_eq!(rig.mesh.sleeps, 0);

    rig.advance_s(1);
    rig.signal(&mut app, MeshSignal::CanSleep);
    assert_eq!(rig.mesh.sleeps, 1);
    assert_eq!(slept(&rig), 1);
}

#[test]
fn asserted_wake_pin_vetoes_sleep() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.join(&mut app);
    rig.advance_s(30);

    rig.pins.asserted = Some("pulse");
    rig.signal(&mut app, MeshSignal::CanSleep);
    assert_eq!(rig.mesh.sleeps, 0);

    rig.pins.asserted = None;
    rig.signal(&mut app, MeshSignal::CanSleep);
    assert_eq!(rig.mesh.sleeps, 1);
}

#[test]
fn level_wake_on_pulse_pin_counts_missed_edge() {
    let config = MeterConfig::default();
    let gpio = config.pulse.gpio as u32;
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 100);
    rig.start(&mut app);
    rig.join(&mut app);
    rig.advance_s(30);

    rig.mesh.wakes.push_back(WakeInfo {
        cause: WakeCause::Ext1 { status: 1 << gpio },
        slept_us: 12_000_000,
        woke_at: rig.now() + 12_000_000,
    });
    rig.signal(&mut app, MeshSignal::CanSleep);

    assert_eq!(app.total_pulses(), 101);
    assert!(rig.sink.contains(&AppEvent::Slept {
        slept_ms: 12_000,
        cause: WakeCause::Ext1 { status: 1 << gpio },
        pulse_counted: true,
    }));
}

#[test]
fn level_wake_right_after_counted_edge_is_not_double_counted() {
    let config = MeterConfig::default();
    let gpio = config.pulse.gpio as u32;
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.join(&mut app);
    rig.advance_s(30);

    let t = rig.now();
    pulsemeter::adapters::pulse_input::dispatch_edge(&pulses, true, t);
    pulsemeter::adapters::pulse_input::dispatch_edge(&pulses, false, t + 20_000);
    rig.mesh.wakes.push_back(WakeInfo {
        cause: WakeCause::Ext1 { status: 1 << gpio },
        slept_us: 10_000,
        woke_at: t + 30_000,
    });
    rig.signal(&mut app, MeshSignal::CanSleep);
    rig.tick(&mut app);

    assert_eq!(app.total_pulses(), 1);
}

#[test]
fn timer_wake_counts_nothing() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 5);
    rig.start(&mut app);
    rig.join(&mut app);
    rig.advance_s(30);

    rig.mesh.wakes.push_back(WakeInfo {
        cause: WakeCause::Timer,
        slept_us: 1_000_000,
        woke_at: rig.now() + 1_000_000,
    });
    rig.signal(&mut app, MeshSignal::CanSleep);

    assert_eq!(rig.mesh.sleeps, 1);
    assert_eq!(app.total_pulses(), 5);
}
