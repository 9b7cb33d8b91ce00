//! Network join controller driven through the service: steering, backoff,
//! attempt budget, cooldown and the post-join setup.

use crate::mock_ports::Rig;

use pulsemeter::app::commands::AppCommand;
use pulsemeter::app::events::AppEvent;
use pulsemeter::app::ports::MeshError;
use pulsemeter::app::service::MeterService;
use pulsemeter::config::MeterConfig;
use pulsemeter::network::zcl;
use pulsemeter::network::{JoinPhase, MeshSignal};
use pulsemeter::sensors::pulse::PulseCounter;

fn budget(max_attempts: u32, cooldown_s: u32) -> MeterConfig {
    let mut config = MeterConfig::default();
    config.steering.max_attempts = max_attempts;
    config.steering.cooldown_s = cooldown_s;
    config
}

#[test]
fn first_start_steers_at_join_power() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    rig.signal(&mut app, MeshSignal::FirstStart { status: 0, joined: false });

    assert_eq!(rig.mesh.steering_calls, 1);
    assert_eq!(rig.mesh.tx_power, Some(20));
    assert_eq!(app.join_state().phase, JoinPhase::Steering);
}

#[test]
fn first_start_already_joined_skips_steering() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    rig.signal(&mut app, MeshSignal::FirstStart { status: 0, joined: true });

    assert_eq!(rig.mesh.steering_calls, 0);
    assert_eq!(app.join_state().phase, JoinPhase::Joined);
}

#[test]
fn failures_back_off_five_ten_twenty() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.signal(&mut app, MeshSignal::FirstStart { status: 0, joined: false });

    for (retry, delay_s) in [(1u8, 5u64), (2, 10), (3, 20)] {
        rig.signal(&mut app, MeshSignal::Steering { status: -1 });
        assert!(rig.sink.contains(&AppEvent::SteeringScheduled {
            delay_s: delay_s as u32,
            retry_count: retry,
        }));
        assert_eq!(app.join_state().phase, JoinPhase::RetryWait);

        rig.advance_s(delay_s - 1);
        rig.tick(&mut app);
        assert_eq!(rig.mesh.steering_calls, u32::from(retry));

        rig.advance_s(1);
        rig.tick(&mut app);
        assert_eq!(rig.mesh.steering_calls, u32::from(retry) + 1);
    }
}

#[test]
fn reboot_rejoin_failure_schedules_retry() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    rig.signal(&mut app, MeshSignal::Reboot { status: -1 });

    assert_eq!(app.join_state().phase, JoinPhase::RetryWait);
    assert_eq!(rig.timer.deadline(), Some(rig.now() + 5_000_000));
}

#[test]
fn stack_refusal_counts_as_failed_attempt() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.mesh.steer_results.push_back(Err(MeshError(-2)));

    rig.signal(&mut app, MeshSignal::FirstStart { status: 0, joined: false });

    let state = app.join_state();
    assert_eq!(state.phase, JoinPhase::RetryWait);
    assert_eq!(state.total_attempts, 1);
    assert_eq!(state.retry_count, 1);
}

#[test]
fn join_sets_up_reporting_and_bindings() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.signal(&mut app, MeshSignal::FirstStart { status: 0, joined: false });
    rig.signal(&mut app, MeshSignal::Steering { status: -1 });

    rig.signal(&mut app, MeshSignal::Steering { status: 0 });

    let state = app.join_state();
    assert_eq!(state.phase, JoinPhase::Joined);
    assert_eq!((state.retry_count, state.total_attempts), (0, 0));
    assert_eq!(rig.timer.deadline(), None);
    assert_eq!(rig.mesh.tx_power, Some(10));
    assert!(rig.sink.contains(&AppEvent::Joined));

    let reported: Vec<(u16, u16)> = rig.mesh.reports.iter().map(|(c, a, _)| (*c, *a)).collect();
    assert!(reported.contains(&(zcl::CLUSTER_METERING, zcl::ATTR_CURRENT_SUMMATION_DELIVERED)));
    assert!(reported.contains(&(zcl::CLUSTER_METERING, zcl::ATTR_INSTANTANEOUS_DEMAND)));
    assert!(reported.contains(&(zcl::CLUSTER_POWER_CONFIG, zcl::ATTR_BATTERY_PERCENTAGE)));

    assert_eq!(rig.mesh.binds.len(), 2);
    assert_eq!(app.binds_in_flight(), 2);
    let tokens: Vec<u16> = rig.mesh.binds.iter().map(|(_, t)| *t).collect();
    for token in tokens {
        rig.signal(&mut app, MeshSignal::BindComplete { token, status: 0 });
    }
    assert_eq!(app.binds_in_flight(), 0);

    // A late duplicate completion is ignored.
    let (_, token) = rig.mesh.binds[0];
    rig.signal(&mut app, MeshSignal::BindComplete { token, status: 0 });
    assert_eq!(app.binds_in_flight(), 0);
}

#[test]
fn refused_bind_releases_its_slot() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.mesh.bind_result = Some(MeshError(-1));

    rig.join(&mut app);

    assert_eq!(app.join_state().phase, JoinPhase::Joined);
    assert_eq!(app.binds_in_flight(), 0);
}

#[test]
fn exhausted_budget_without_cooldown_halts_until_restart() {
    let config = budget(2, 0);
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.signal(&mut app, MeshSignal::FirstStart { status: 0, joined: false });
    rig.signal(&mut app, MeshSignal::Steering { status: -1 });
    rig.advance_s(5);
    rig.tick(&mut app);
    assert_eq!(rig.mesh.steering_calls, 2);

    rig.signal(&mut app, MeshSignal::Steering { status: -1 });
    assert_eq!(app.join_state().phase, JoinPhase::Halted);
    assert!(rig.sink.contains(&AppEvent::SteeringHalted));

    rig.advance_s(600);
    rig.tick(&mut app);
    assert_eq!(rig.mesh.steering_calls, 2);

    assert!(rig.command(&mut app, AppCommand::RestartSteering).is_ok());
    assert_eq!(rig.mesh.steering_calls, 3);
    assert_eq!(app.join_state().total_attempts, 1);
}

#[test]
fn cooldown_starts_a_fresh_burst() {
    let config = budget(2, 30);
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.signal(&mut app, MeshSignal::FirstStart { status: 0, joined: false });
    rig.signal(&mut app, MeshSignal::Steering { status: -1 });
    rig.advance_s(5);
    rig.tick(&mut app);
    rig.signal(&mut app, MeshSignal::Steering { status: -1 });

    assert_eq!(app.join_state().phase, JoinPhase::Cooldown);
    assert_eq!(app.join_state().retry_count, 0);
    assert!(rig.sink.contains(&AppEvent::SteeringScheduled {
        delay_s: 30,
        retry_count: 0
    }));

    rig.advance_s(29);
    rig.tick(&mut app);
    assert_eq!(rig.mesh.steering_calls, 2);

    rig.advance_s(1);
    rig.tick(&mut app);
    let state = app.join_state();
    assert_eq!(rig.mesh.steering_calls, 3);
    assert_eq!(state.phase, JoinPhase::Steering);
    assert_eq!((state.retry_count, state.total_attempts), (0, 1));
}

#[test]
fn leaving_the_network_steers_again() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.join(&mut app);
    let before = rig.mesh.steering_calls;

    rig.signal(&mut app, MeshSignal::Leave);

    assert!(rig.sink.contains(&AppEvent::Left));
    assert_eq!(rig.mesh.steering_calls, before + 1);
    assert_eq!(app.join_state().phase, JoinPhase::Steering);
}

#[test]
fn manual_restart_is_ignored_once_joined() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.join(&mut app);
    let before = rig.mesh.steering_calls;

    assert!(rig.command(&mut app, AppCommand::RestartSteering).is_ok());

    assert_eq!(rig.mesh.steering_calls, before);
    assert_eq!(app.join_state().phase, JoinPhase::Joined);
}
