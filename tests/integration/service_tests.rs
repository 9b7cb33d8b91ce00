//! MeterService: pulses, attribute publication, persistence and commands.

use crate::mock_ports::Rig;

use pulsemeter::app::commands::AppCommand;
use pulsemeter::app::events::AppEvent;
use pulsemeter::app::ports::{ConfigPort, StoragePort};
use pulsemeter::app::service::{MeterService, KEY_PULSES};
use pulsemeter::config::MeterConfig;
use pulsemeter::error::Error;
use pulsemeter::events::Event;
use pulsemeter::metering::variant::MeterVariant;
use pulsemeter::network::zcl::{self, AttrValue};
use pulsemeter::network::MeshSignal;
use pulsemeter::power::{WakeCause, WakeInfo};
use pulsemeter::sensors::pulse::PulseCounter;

fn summation(rig: &Rig) -> Option<&AttrValue> {
    rig.mesh
        .attribute(zcl::CLUSTER_METERING, zcl::ATTR_CURRENT_SUMMATION_DELIVERED)
}

#[test]
fn start_publishes_identity_and_restored_total() {
    let config = MeterConfig {
        variant: MeterVariant::Water,
        ..MeterConfig::default()
    };
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 4242);
    rig.start(&mut app);

    assert_eq!(summation(&rig), Some(&AttrValue::U48(4242)));
    assert_eq!(
        rig.mesh.attribute(zcl::CLUSTER_BASIC, zcl::ATTR_MODEL_IDENTIFIER),
        Some(&AttrValue::text("ESP32-PulseMeter-Water"))
    );
    assert_eq!(
        rig.mesh.attribute(zcl::CLUSTER_METERING, zcl::ATTR_DIVISOR),
        Some(&AttrValue::U24(1000))
    );
    assert_eq!(
        rig.mesh.attribute(zcl::CLUSTER_METERING, zcl::ATTR_MULTIPLIER),
        Some(&AttrValue::U24(1))
    );
    assert_eq!(
        rig.mesh
            .attribute(zcl::CLUSTER_POWER_CONFIG, zcl::ATTR_BATTERY_VOLTAGE),
        Some(&AttrValue::U8(28))
    );
    assert!(rig.sink.contains(&AppEvent::Started { total: 4242 }));
    assert_eq!(rig.mesh.steering_calls, 0, "steering waits for the stack");
}

#[test]
fn counted_pulses_reach_summation_and_flash() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 10);
    rig.start(&mut app);

    for _ in 0..3 {
        rig.pulse(&pulses, 50);
    }
    rig.tick(&mut app);
    assert_eq!(app.total_pulses(), 13);
    assert_eq!(summation(&rig), Some(&AttrValue::U48(13)));
    assert!(app.is_dirty());
    assert_eq!(rig.store.load_u64(KEY_PULSES), Ok(None));

    rig.advance_s(5);
    rig.tick(&mut app);
    assert!(!app.is_dirty());
    assert_eq!(rig.store.load_u64(KEY_PULSES), Ok(Some(13)));
    assert!(rig.sink.contains(&AppEvent::Persisted { total: 13 }));
}

#[test]
fn steady_pulses_are_saved_on_the_interval() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    // 1.05 s per pulse never leaves a 5 s quiet gap, so only the 60 s
    // interval can trigger a save.
    for i in 1..=70u64 {
        rig.pulse(&pulses, 50);
        rig.tick(&mut app);
        if i == 57 {
            assert_eq!(rig.store.load_u64(KEY_PULSES), Ok(None));
        }
    }

    assert_eq!(rig.store.load_u64(KEY_PULSES), Ok(Some(58)));
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::Persisted { .. })), 1);
    assert!(rig.sink.contains(&AppEvent::Persisted { total: 58 }));
    assert!(app.is_dirty());
    assert_eq!(app.total_pulses(), 70);
}

#[test]
fn idle_timeout_publishes_zero_demand_once() {
    let config = MeterConfig::default();
    let idle_s = u64::from(config.demand.idle_timeout_s);
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    for _ in 0..5 {
        rig.pulse(&pulses, 50);
        rig.tick(&mut app);
    }
    assert!(app.instantaneous_demand() > 0);

    // The last rising edge was one pulse gap ago.
    for _ in 1..idle_s - 1 {
        rig.advance_s(1);
        rig.tick(&mut app);
    }
    assert!(app.instantaneous_demand() > 0);
    rig.sink.clear();

    rig.advance_s(1);
    rig.tick(&mut app);
    assert_eq!(app.instantaneous_demand(), 0);
    assert_eq!(
        rig.mesh.attribute(zcl::CLUSTER_METERING, zcl::ATTR_INSTANTANEOUS_DEMAND),
        Some(&AttrValue::S24(0))
    );
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::DemandChanged { .. })), 1);
    assert!(rig.sink.contains(&AppEvent::DemandChanged { demand: 0 }));

    for _ in 0..10 {
        rig.advance_s(1);
        rig.tick(&mut app);
    }
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::DemandChanged { .. })), 1);
}

#[test]
fn bounce_inside_debounce_window_is_dropped() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    let t = rig.now();
    pulsemeter::adapters::pulse_input::dispatch_edge(&pulses, true, t);
    pulsemeter::adapters::pulse_input::dispatch_edge(&pulses, false, t + 10_000);
    pulsemeter::adapters::pulse_input::dispatch_edge(&pulses, true, t + 20_000);
    pulsemeter::adapters::pulse_input::dispatch_edge(&pulses, false, t + 30_000);
    rig.tick(&mut app);
    assert_eq!(app.total_pulses(), 1);
}

#[test]
fn failed_save_waits_one_interval_before_retry() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    rig.pulse(&pulses, 50);
    rig.store.set_fail_writes(true);
    rig.advance_s(5);
    rig.tick(&mut app);
    assert!(rig.sink.contains(&AppEvent::PersistFailed));
    assert!(app.is_dirty());

    rig.store.set_fail_writes(false);
    rig.advance_s(30);
    rig.tick(&mut app);
    assert_eq!(rig.store.load_u64(KEY_PULSES), Ok(None));

    rig.advance_s(30);
    rig.tick(&mut app);
    assert_eq!(rig.store.load_u64(KEY_PULSES), Ok(Some(1)));
}

#[test]
fn reset_attribute_write_zeroes_everything() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 500);
    rig.start(&mut app);
    rig.pulse(&pulses, 50);
    rig.pulse(&pulses, 50);
    rig.tick(&mut app);

    rig.signal(&mut app, MeshSignal::ResetCounterWritten);

    assert_eq!(app.total_pulses(), 0);
    assert_eq!(app.instantaneous_demand(), 0);
    assert_eq!(pulses.total(), 0);
    assert_eq!(summation(&rig), Some(&AttrValue::U48(0)));
    assert_eq!(rig.store.load_u64(KEY_PULSES), Ok(Some(0)));
    assert!(rig.sink.contains(&AppEvent::CounterReset));

    rig.pulse(&pulses, 50);
    rig.tick(&mut app);
    assert_eq!(app.total_pulses(), 1);
}

#[test]
fn factory_reset_hold_wipes_and_restarts() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.pulse(&pulses, 50);
    rig.advance_s(5);
    rig.tick(&mut app);
    assert_eq!(rig.store.load_u64(KEY_PULSES), Ok(Some(1)));

    rig.event(&mut app, Event::FactoryResetHold);

    assert_eq!(rig.store.load_u64(KEY_PULSES), Ok(None));
    assert_eq!(rig.mesh.factory_resets, 1);
    assert_eq!(rig.system.restarts, 1);
    assert!(rig.sink.contains(&AppEvent::FactoryReset));

    // Counting stays off until the restart.
    rig.pulse(&pulses, 50);
    rig.tick(&mut app);
    assert_eq!(app.total_pulses(), 1);
}

#[test]
fn battery_tick_publishes_only_real_changes() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    assert_eq!(app.battery_status().millivolts, 2800);
    assert_eq!(
        rig.mesh
            .attribute(zcl::CLUSTER_POWER_CONFIG, zcl::ATTR_BATTERY_PERCENTAGE),
        Some(&AttrValue::U8(160))
    );

    // 2810 mV moves percent by one point, inside the hysteresis band.
    rig.battery.set_tap_mv(Some(1405));
    rig.event(&mut app, Event::BatteryTick);
    assert_eq!(
        rig.mesh
            .attribute(zcl::CLUSTER_POWER_CONFIG, zcl::ATTR_BATTERY_PERCENTAGE),
        Some(&AttrValue::U8(160))
    );

    // A failed read keeps the last good value.
    rig.battery.set_tap_mv(None);
    rig.event(&mut app, Event::BatteryTick);
    assert_eq!(app.battery_status().millivolts, 2810);

    rig.battery.set_tap_mv(Some(1250));
    rig.event(&mut app, Event::BatteryTick);
    assert_eq!(
        rig.mesh
            .attribute(zcl::CLUSTER_POWER_CONFIG, zcl::ATTR_BATTERY_PERCENTAGE),
        Some(&AttrValue::U8(100))
    );
    assert_eq!(
        rig.mesh
            .attribute(zcl::CLUSTER_POWER_CONFIG, zcl::ATTR_BATTERY_VOLTAGE),
        Some(&AttrValue::U8(25))
    );
}

#[test]
fn invalid_config_update_is_rejected_whole() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config.clone(), &pulses, 0);
    rig.start(&mut app);

    let mut bad = config.clone();
    bad.pulse.pulses_per_unit = 0;
    bad.pulse.debounce_ms = 5;
    let err = rig.command(&mut app, AppCommand::UpdateConfig(bad));

    assert_eq!(err, Err(Error::Config("pulses_per_unit must be > 0")));
    assert_eq!(app.config(), &config);
    assert_eq!(rig.store.load(), Ok(MeterConfig::default()));
}

#[test]
fn config_update_cannot_move_the_pulse_input() {
    let config = MeterConfig::default();
    let gpio = config.pulse.gpio as u32;
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config.clone(), &pulses, 0);
    rig.start(&mut app);
    rig.join(&mut app);
    rig.advance_s(30);

    let mut moved = config.clone();
    moved.pulse.gpio = 7;
    assert!(moved.validate().is_ok());
    let err = rig.command(&mut app, AppCommand::UpdateConfig(moved));

    assert_eq!(err, Err(Error::Config("input gpios cannot change until restart")));
    assert_eq!(app.config(), &config);

    // A wake on the boot-time pulse input still counts the missed edge.
    rig.mesh.wakes.push_back(WakeInfo {
        cause: WakeCause::Ext1 { status: 1 << gpio },
        slept_us: 1_000_000,
        woke_at: rig.now() + 1_000_000,
    });
    rig.signal(&mut app, MeshSignal::CanSleep);
    assert_eq!(app.total_pulses(), 1);
}

#[test]
fn valid_config_update_rescales_and_persists() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config.clone(), &pulses, 0);
    rig.start(&mut app);

    let mut next = config;
    next.pulse.pulses_per_unit = 800;
    next.variant = MeterVariant::Gas;
    assert!(rig.command(&mut app, AppCommand::UpdateConfig(next.clone())).is_ok());

    assert_eq!(
        rig.mesh.attribute(zcl::CLUSTER_METERING, zcl::ATTR_DIVISOR),
        Some(&AttrValue::U24(800))
    );
    assert_eq!(
        rig.mesh.attribute(zcl::CLUSTER_BASIC, zcl::ATTR_SW_BUILD_ID),
        Some(&AttrValue::text("PU=800 DB=50"))
    );
    assert_eq!(rig.store.load(), Ok(next));
}

#[test]
fn save_command_flushes_dirty_total() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 7);
    rig.start(&mut app);
    rig.pulse(&pulses, 50);
    rig.tick(&mut app);

    assert!(rig.command(&mut app, AppCommand::SaveNow).is_ok());
    assert_eq!(rig.store.load_u64(KEY_PULSES), Ok(Some(8)));
    assert!(!app.is_dirty());
}
