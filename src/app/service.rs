//! Meter service: the single cooperative loop body.
//!
//! [`MeterService`] owns one instance of every subsystem's state and
//! drives them from the main loop. All I/O flows through the [`Ports`]
//! bundle handed in at each call site, so the whole service runs on the
//! host against mock adapters.
//!
//! ```text
//!  PulseCounter ──▶ ┌──────────────────────────────┐ ──▶ MeshPort
//!   (ISR side)      │         MeterService          │ ──▶ StoragePort
//!  Event queue  ──▶ │ Metering · Join · Sleep · OTA │ ──▶ FirmwareStorage
//!  OTA queue    ──▶ └──────────────────────────────┘ ──▶ EventSink
//! ```
//!
//! Nothing here runs in interrupt or timer context. Timer callbacks and
//! the mesh stack only queue events; every state transition happens in
//! [`run_once`](MeterService::run_once) or one of the `handle_*` calls.

use log::{debug, info, warn};

use crate::config::MeterConfig;
use crate::error::{self, Error, ProtocolFailure};
use crate::events::{Event, OtaMessage};
use crate::metering::variant::MANUFACTURER_NAME;
use crate::metering::{MeteringConfig, MeteringEngine};
use crate::network::bind::{BindPool, BindRequest, BindToken};
use crate::network::zcl::{self, AttrValue};
use crate::network::{JoinController, JoinPhase, JoinState, JoinTransition, MeshSignal, SteeringPolicy};
use crate::ota::{OtaError, OtaPhase, OtaSession};
use crate::power::SleepGate;
use crate::sensors::battery::{BatteryMonitor, BatteryStatus};
use crate::sensors::pulse::{PulseCounter, PulseTiming};

use super::commands::AppCommand;
use super::events::AppEvent;
use super::ports::{MeshPort, Ports};

/// Storage key of the persisted pulse total.
pub const KEY_PULSES: &str = "pulses";

/// How often the demand estimate is aged between pulses.
pub const DEMAND_CHECK_INTERVAL_US: u64 = 1_000_000;

/// In-flight bind requests at most.
const BIND_SLOTS: usize = 4;

const US_PER_S: u64 = 1_000_000;

pub struct MeterService<'a> {
    config: MeterConfig,
    pulses: &'a PulseCounter,
    metering: MeteringEngine,
    join: JoinController,
    sleep: SleepGate,
    ota: OtaSession,
    battery: BatteryMonitor,
    last_battery: BatteryStatus,
    binds: BindPool<BIND_SLOTS>,
    /// Total changed since the last successful save.
    dirty: bool,
    last_save: u64,
    /// After a failed save, nothing is attempted before this time.
    save_retry_at: Option<u64>,
    last_demand_check: Option<u64>,
}

impl<'a> MeterService<'a> {
    /// Build the service and start the pulse pipeline at `initial_total`.
    ///
    /// Does **not** publish anything; call [`start`](Self::start) next.
    pub fn new(config: MeterConfig, pulses: &'a PulseCounter, initial_total: u64) -> Self {
        pulses.start(timing_of(&config), initial_total);
        let metering = MeteringEngine::new(MeteringConfig::from(&config), initial_total);
        let scaling = metering.scaling();
        info!(
            "meter: pulses_per_unit={} divisor={} multiplier={} variant={:?}",
            config.pulse.pulses_per_unit, scaling.divisor, scaling.multiplier, config.variant
        );
        Self {
            join: JoinController::new(SteeringPolicy::from(&config.steering)),
            sleep: SleepGate::new(config.pulse.gpio),
            ota: OtaSession::new(),
            battery: BatteryMonitor::new(),
            last_battery: BatteryStatus::UNKNOWN,
            binds: BindPool::new(),
            dirty: false,
            last_save: 0,
            save_retry_at: None,
            last_demand_check: None,
            metering,
            pulses,
            config,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Publish the initial attribute set. Steering is kicked off by the
    /// stack's first-start signal, not here.
    pub fn start(&mut self, ports: &mut Ports<'_>, now: u64) {
        self.last_save = now;
        self.poll_battery(ports);
        self.publish_static(ports.mesh);
        self.publish_dynamic(ports.mesh);
        let total = self.metering.total_pulses();
        ports.sink.emit(&AppEvent::Started { total });
        info!("meter: started, total={}", total);
    }

    /// One loop iteration: drain pulses, age demand, service the retry
    /// timer and persist when due.
    pub fn run_once(&mut self, ports: &mut Ports<'_>, now: u64) {
        self.drain_pulses(ports);

        let due = self
            .last_demand_check
            .is_none_or(|last| now.saturating_sub(last) >= DEMAND_CHECK_INTERVAL_US);
        if due {
            self.last_demand_check = Some(now);
            if self.metering.tick(now) {
                self.publish_dynamic(ports.mesh);
                ports.sink.emit(&AppEvent::DemandChanged {
                    demand: self.metering.instantaneous_demand(),
                });
            }
        }

        let t = self.join.poll(ports.mesh, ports.retry_timer, now);
        self.apply_transition(t, ports, now);

        self.maybe_persist(ports, now);
    }

    // ── Pulses ────────────────────────────────────────────────

    fn drain_pulses(&mut self, ports: &mut Ports<'_>) {
        let batch = self.pulses.take_pending();
        if !batch.has_data {
            return;
        }
        if batch.lost > 0 {
            warn!("PULSE | lost={} while pending counter was saturated", batch.lost);
        }
        let added = batch.count.saturating_add(batch.lost);
        let demand_changed = self.metering.on_pulses(added, batch.last_ts, batch.prev_ts);
        self.dirty = true;
        self.publish_dynamic(ports.mesh);

        let total = self.metering.total_pulses();
        ports.sink.emit(&AppEvent::PulsesCounted {
            added: u64::from(added),
            total,
            lost: batch.lost,
        });
        if demand_changed {
            ports.sink.emit(&AppEvent::DemandChanged {
                demand: self.metering.instantaneous_demand(),
            });
        }
    }

    // ── Persistence ───────────────────────────────────────────

    /// Save the total if dirty and either the save interval has elapsed or
    /// pulses have gone quiet. Returns true if a save was attempted.
    fn maybe_persist(&mut self, ports: &mut Ports<'_>, now: u64) -> bool {
        if !self.dirty {
            return false;
        }
        if self.save_retry_at.is_some_and(|at| now < at) {
            return false;
        }
        let persist = &self.config.persist;
        let interval_due =
            now.saturating_sub(self.last_save) >= u64::from(persist.save_interval_s) * US_PER_S;
        let idle_due = self
            .metering
            .last_pulse_ts()
            .is_some_and(|last| now.saturating_sub(last) >= u64::from(persist.idle_save_s) * US_PER_S);
        if !interval_due && !idle_due {
            return false;
        }
        self.persist_now(ports, now);
        true
    }

    fn persist_now(&mut self, ports: &mut Ports<'_>, now: u64) -> bool {
        let total = self.metering.total_pulses();
        match ports.store.save_u64(KEY_PULSES, total) {
            Ok(()) => {
                self.dirty = false;
                self.last_save = now;
                self.save_retry_at = None;
                ports.sink.emit(&AppEvent::Persisted { total });
                true
            }
            Err(e) => {
                warn!("NVS | save total={} failed: {}", total, e);
                self.dirty = true;
                self.save_retry_at =
                    Some(now.saturating_add(u64::from(self.config.persist.save_interval_s) * US_PER_S));
                ports.sink.emit(&AppEvent::PersistFailed);
                false
            }
        }
    }

    // ── Queued events ─────────────────────────────────────────

    pub fn handle_event(&mut self, event: Event, ports: &mut Ports<'_>, now: u64) {
        match event {
            Event::Mesh(signal) => self.handle_signal(signal, ports, now),
            Event::BatteryTick => self.poll_battery(ports),
            Event::FactoryResetHold => {
                if let Err(e) = self.handle_command(AppCommand::FactoryReset, ports, now) {
                    warn!("factory reset: {}", e);
                }
            }
        }
    }

    fn handle_signal(&mut self, signal: MeshSignal, ports: &mut Ports<'_>, now: u64) {
        match signal {
            MeshSignal::FirstStart { status, joined } => {
                if status != 0 {
                    let t = self.join.on_join_failure(
                        ports.retry_timer,
                        now,
                        ProtocolFailure::StartupFailed(status),
                    );
                    self.apply_transition(t, ports, now);
                } else if joined {
                    self.on_joined(ports, now);
                } else {
                    let t = self
                        .join
                        .start_steering(ports.mesh, ports.retry_timer, now, "first start");
                    self.apply_transition(t, ports, now);
                }
            }
            MeshSignal::Reboot { status: 0 } | MeshSignal::Steering { status: 0 } => {
                self.on_joined(ports, now);
            }
            MeshSignal::Reboot { status } => {
                let t = self.join.on_join_failure(
                    ports.retry_timer,
                    now,
                    ProtocolFailure::RebootRejoinFailed(status),
                );
                self.apply_transition(t, ports, now);
            }
            MeshSignal::Steering { status } => {
                let t = self.join.on_join_failure(
                    ports.retry_timer,
                    now,
                    ProtocolFailure::SteeringFailed(status),
                );
                self.apply_transition(t, ports, now);
            }
            MeshSignal::Leave => {
                let t = self.join.on_leave(ports.retry_timer);
                self.apply_transition(t, ports, now);
                let t = self
                    .join
                    .start_steering(ports.mesh, ports.retry_timer, now, "left network");
                self.apply_transition(t, ports, now);
            }
            MeshSignal::CanSleep => {
                self.try_sleep(ports, now);
            }
            MeshSignal::BindComplete { token, status } => {
                match self.binds.complete(BindToken::from_raw(token)) {
                    Some(req) if status == 0 => {
                        info!("JOIN | bind cluster=0x{:04x} ok", req.cluster);
                    }
                    Some(req) => {
                        warn!("JOIN | bind cluster=0x{:04x} status={}", req.cluster, status);
                    }
                    None => debug!("JOIN | stale bind completion token=0x{:04x}", token),
                }
            }
            MeshSignal::ResetCounterWritten => {
                if let Err(e) = self.handle_command(AppCommand::ResetCounter, ports, now) {
                    warn!("counter reset: {}", e);
                }
            }
            MeshSignal::Other { signal, status } => {
                debug!("mesh signal {} status {}", signal, status);
            }
        }
    }

    fn apply_transition(&mut self, t: JoinTransition, ports: &mut Ports<'_>, now: u64) {
        match t {
            JoinTransition::Joined => self.after_join(ports, now),
            JoinTransition::RetryScheduled { delay_s, retry_count } => {
                ports
                    .sink
                    .emit(&AppEvent::SteeringScheduled { delay_s, retry_count });
            }
            JoinTransition::CooldownStarted { cooldown_s } => {
                ports.sink.emit(&AppEvent::SteeringScheduled {
                    delay_s: cooldown_s,
                    retry_count: 0,
                });
            }
            JoinTransition::Halted => ports.sink.emit(&AppEvent::SteeringHalted),
            JoinTransition::Left => ports.sink.emit(&AppEvent::Left),
            JoinTransition::None
            | JoinTransition::SteeringStarted { .. }
            | JoinTransition::AlreadySteering
            | JoinTransition::Suppressed => {}
        }
    }

    fn on_joined(&mut self, ports: &mut Ports<'_>, now: u64) {
        let t = self.join.on_join_success(ports.mesh, ports.retry_timer);
        self.apply_transition(t, ports, now);
    }

    /// Grace window, attribute publication, reporting and bindings.
    fn after_join(&mut self, ports: &mut Ports<'_>, now: u64) {
        let block_us = u64::from(self.config.steering.post_join_sleep_block_s) * US_PER_S;
        self.sleep.block_for(now, block_us);

        self.publish_static(ports.mesh);
        self.publish_dynamic(ports.mesh);
        self.poll_battery(ports);
        self.configure_reporting(ports.mesh);
        self.bind_clusters(ports.mesh);
        ports.sink.emit(&AppEvent::Joined);
    }

    // ── Sleep ─────────────────────────────────────────────────

    /// Enter light sleep if the gate allows it. Returns true if the node slept.
    fn try_sleep(&mut self, ports: &mut Ports<'_>, now: u64) -> bool {
        if !self.sleep.can_sleep(self.join.phase(), ports.wake_pins, now) {
            return false;
        }
        let info = ports.mesh.sleep_now();
        let pulse_counted = self.sleep.on_wake(&info, self.pulses);
        ports.sink.emit(&AppEvent::Slept {
            slept_ms: info.slept_us / 1000,
            cause: info.cause,
            pulse_counted,
        });
        if pulse_counted {
            self.drain_pulses(ports);
        }
        true
    }

    // ── Battery ───────────────────────────────────────────────

    fn poll_battery(&mut self, ports: &mut Ports<'_>) {
        let sample = match ports.battery.read_millivolts() {
            Ok(mv) => Some(mv),
            Err(e) => {
                warn!("BATT | read failed: {}", e);
                None
            }
        };
        let status = self.battery.evaluate(sample, &self.config.battery);
        self.last_battery = status;
        self.publish_power(ports.mesh, &status);
        ports.sink.emit(&AppEvent::BatteryUpdated {
            millivolts: status.millivolts,
            percent_attr: status.percent_attr,
        });
    }

    // ── Attribute publication ─────────────────────────────────

    fn publish_static(&self, mesh: &mut dyn MeshPort) {
        let desc = self.config.variant.descriptor();
        let scaling = self.metering.scaling();

        mesh.set_attribute(
            zcl::CLUSTER_BASIC,
            zcl::ATTR_MANUFACTURER_NAME,
            &AttrValue::text(MANUFACTURER_NAME),
        );
        mesh.set_attribute(
            zcl::CLUSTER_BASIC,
            zcl::ATTR_MODEL_IDENTIFIER,
            &AttrValue::text(desc.model_id),
        );
        mesh.set_attribute(
            zcl::CLUSTER_BASIC,
            zcl::ATTR_POWER_SOURCE,
            &AttrValue::Enum8(zcl::POWER_SOURCE_BATTERY),
        );
        mesh.set_attribute(
            zcl::CLUSTER_BASIC,
            zcl::ATTR_SW_BUILD_ID,
            &AttrValue::text(&self.config.sw_build_id()),
        );

        let metering = [
            (zcl::ATTR_UNIT_OF_MEASURE, AttrValue::Enum8(desc.unit_of_measure)),
            (zcl::ATTR_MULTIPLIER, AttrValue::U24(scaling.multiplier)),
            (zcl::ATTR_DIVISOR, AttrValue::U24(scaling.divisor)),
            (zcl::ATTR_SUMMATION_FORMATTING, AttrValue::Bitmap8(scaling.summation_formatting)),
            (zcl::ATTR_DEMAND_FORMATTING, AttrValue::Bitmap8(scaling.demand_formatting)),
            (zcl::ATTR_METERING_DEVICE_TYPE, AttrValue::Bitmap8(desc.device_type)),
        ];
        for (attr, value) in &metering {
            mesh.set_attribute(zcl::CLUSTER_METERING, *attr, value);
        }
        info!(
            "meter: unit={} device_type={} mult={} div={} fmt=0x{:02x}",
            desc.unit_of_measure,
            desc.device_type,
            scaling.multiplier,
            scaling.divisor,
            scaling.summation_formatting
        );
    }

    fn publish_dynamic(&self, mesh: &mut dyn MeshPort) {
        mesh.set_attribute(
            zcl::CLUSTER_METERING,
            zcl::ATTR_CURRENT_SUMMATION_DELIVERED,
            &AttrValue::U48(self.metering.total_pulses()),
        );
        mesh.set_attribute(
            zcl::CLUSTER_METERING,
            zcl::ATTR_INSTANTANEOUS_DEMAND,
            &AttrValue::S24(self.metering.instantaneous_demand()),
        );
    }

    fn publish_power(&mut self, mesh: &mut dyn MeshPort, status: &BatteryStatus) {
        let update = self
            .battery
            .publish(status, self.config.battery.report_hysteresis_pct);
        if let Some(v) = update.voltage {
            mesh.set_attribute(zcl::CLUSTER_POWER_CONFIG, zcl::ATTR_BATTERY_VOLTAGE, &AttrValue::U8(v));
        }
        if let Some(p) = update.percent {
            mesh.set_attribute(
                zcl::CLUSTER_POWER_CONFIG,
                zcl::ATTR_BATTERY_PERCENTAGE,
                &AttrValue::U8(p),
            );
        }
    }

    fn configure_reporting(&self, mesh: &mut dyn MeshPort) {
        let net = &self.config.network;
        if net.summation_report.reportable_change == 0 {
            warn!(
                "JOIN | summation reportable change 0 reports every {}s",
                net.summation_report.min_interval_s
            );
        }
        // Voltage reports only on the min/max timers.
        let voltage_report = crate::config::ReportConfig {
            reportable_change: 0,
            ..net.battery_report
        };
        mesh.configure_reporting(
            zcl::CLUSTER_METERING,
            zcl::ATTR_CURRENT_SUMMATION_DELIVERED,
            &net.summation_report,
        );
        mesh.configure_reporting(
            zcl::CLUSTER_METERING,
            zcl::ATTR_INSTANTANEOUS_DEMAND,
            &net.demand_report,
        );
        mesh.configure_reporting(
            zcl::CLUSTER_POWER_CONFIG,
            zcl::ATTR_BATTERY_PERCENTAGE,
            &net.battery_report,
        );
        mesh.configure_reporting(
            zcl::CLUSTER_POWER_CONFIG,
            zcl::ATTR_BATTERY_VOLTAGE,
            &voltage_report,
        );
    }

    fn bind_clusters(&mut self, mesh: &mut dyn MeshPort) {
        let net = &self.config.network;
        if net.report_dst_short == 0xFFFF {
            warn!("JOIN | bind skipped, no report destination");
            return;
        }
        for cluster in [zcl::CLUSTER_METERING, zcl::CLUSTER_POWER_CONFIG] {
            let request = BindRequest {
                cluster,
                dst_short: net.report_dst_short,
                dst_endpoint: net.report_dst_endpoint,
            };
            let token = match self.binds.acquire(request) {
                Ok(token) => token.into_raw(),
                Err(e) => {
                    warn!("JOIN | bind cluster=0x{:04x}: {}", cluster, e);
                    continue;
                }
            };
            if let Err(e) = mesh.bind_request(&request, token) {
                warn!("JOIN | bind cluster=0x{:04x} not sent: {}", cluster, e);
                self.binds.complete(BindToken::from_raw(token));
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────

    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        ports: &mut Ports<'_>,
        now: u64,
    ) -> error::Result<()> {
        match cmd {
            AppCommand::ResetCounter => {
                info!("meter: resetting counter");
                self.metering.reset();
                self.pulses.set_total(0);
                self.dirty = true;
                self.save_retry_at = None;
                self.persist_now(ports, now);
                self.publish_dynamic(ports.mesh);
                let status = self.last_battery;
                self.publish_power(ports.mesh, &status);
                ports.sink.emit(&AppEvent::CounterReset);
                Ok(())
            }
            AppCommand::FactoryReset => {
                self.factory_reset(ports);
                Ok(())
            }
            AppCommand::UpdateConfig(config) => self.update_config(config, ports, now),
            AppCommand::SaveNow => {
                if self.dirty {
                    self.save_retry_at = None;
                    self.persist_now(ports, now);
                }
                Ok(())
            }
            AppCommand::RestartSteering => {
                if self.join.is_joined() {
                    return Ok(());
                }
                self.join.reset(ports.retry_timer);
                let t = self
                    .join
                    .start_steering(ports.mesh, ports.retry_timer, now, "manual restart");
                self.apply_transition(t, ports, now);
                Ok(())
            }
        }
    }

    fn update_config(
        &mut self,
        config: MeterConfig,
        ports: &mut Ports<'_>,
        now: u64,
    ) -> error::Result<()> {
        config.validate()?;
        // The edge ISR and the EXT1 wake mask are wired once at boot.
        if config.pulse.gpio != self.config.pulse.gpio
            || config.reset_button.gpio != self.config.reset_button.gpio
        {
            return Err(Error::Config("input gpios cannot change until restart"));
        }

        self.pulses.set_timing(timing_of(&config));
        self.metering.set_config(MeteringConfig::from(&config));
        self.join.set_policy(SteeringPolicy::from(&config.steering));
        self.config = config;
        info!("meter: configuration updated");
        self.publish_static(ports.mesh);

        if self.join.phase() == JoinPhase::Halted {
            self.join.reset(ports.retry_timer);
            let t = self
                .join
                .start_steering(ports.mesh, ports.retry_timer, now, "config updated");
            self.apply_transition(t, ports, now);
        }

        ports.store.save(&self.config).map_err(Error::from)
    }

    fn factory_reset(&mut self, ports: &mut Ports<'_>) {
        warn!("meter: factory reset");
        self.pulses.set_blocked(true);
        ports.sink.emit(&AppEvent::FactoryReset);
        if let Err(e) = ports.store.erase_all() {
            warn!("NVS | erase failed: {}", e);
        }
        ports.mesh.factory_reset();
        ports.system.restart();
    }

    // ── Firmware transfer ─────────────────────────────────────

    /// Drive the transfer session with one queued step.
    ///
    /// A successful `Finish` persists the total and restarts the node.
    pub fn handle_ota(
        &mut self,
        msg: OtaMessage,
        ports: &mut Ports<'_>,
        now: u64,
    ) -> error::Result<()> {
        let result = match msg {
            OtaMessage::Start {
                image_size,
                file_version,
            } => self.ota.start(image_size, file_version, ports.firmware),
            OtaMessage::Chunk(data) => self.ota.receive(&data, ports.firmware).map(|offset| {
                ports.sink.emit(&AppEvent::OtaProgress {
                    offset,
                    expected: self.ota.expected_size(),
                });
            }),
            OtaMessage::Oversized(len) => {
                warn!("OTA | block of {} bytes does not fit the queue", len);
                self.ota.abort(ports.firmware);
                Err(OtaError::Overflow)
            }
            OtaMessage::Check => self.ota.check(ports.firmware),
            OtaMessage::Apply => self.ota.apply(),
            OtaMessage::Finish => self.ota.finish(ports.firmware),
            OtaMessage::Abort => {
                self.ota.abort(ports.firmware);
                Ok(())
            }
        };

        if let Err(e) = result {
            ports.sink.emit(&AppEvent::OtaFailed(e));
            return Err(e.into());
        }
        if self.ota.phase() == OtaPhase::Finished {
            if self.dirty {
                self.persist_now(ports, now);
            }
            ports.sink.emit(&AppEvent::OtaFinished {
                version: self.ota.file_version(),
            });
            ports.system.restart();
        }
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    pub fn total_pulses(&self) -> u64 {
        self.metering.total_pulses()
    }

    pub fn instantaneous_demand(&self) -> i32 {
        self.metering.instantaneous_demand()
    }

    pub fn join_state(&self) -> JoinState {
        self.join.state()
    }

    pub fn ota_phase(&self) -> OtaPhase {
        self.ota.phase()
    }

    pub fn battery_status(&self) -> BatteryStatus {
        self.last_battery
    }

    /// Whether the total has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn binds_in_flight(&self) -> usize {
        self.binds.in_flight()
    }
}

fn timing_of(config: &MeterConfig) -> PulseTiming {
    PulseTiming::from_ms(config.pulse.debounce_ms, config.pulse.min_width_ms)
}
