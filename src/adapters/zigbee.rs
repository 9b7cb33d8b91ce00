//! Zigbee end-device adapter.
//!
//! Implements [`MeshPort`] on top of the Espressif Zigbee SDK (bindings in
//! `esp_idf_svc::sys::zigbee`, generated from `components/zigbee_bindings.h`).
//!
//! The stack runs on the main task: the loop calls
//! [`main_loop_iteration`] and the stack invokes its callbacks from inside
//! that call. Callbacks never touch domain state directly. They translate
//! what they receive into [`Event::Mesh`] and [`OtaMessage`] values and
//! queue them, and the loop hands those to the service afterwards.
//!
//! The mapping from raw stack codes to domain values is plain Rust and
//! tested on the host. [`SimMesh`] stands in for the stack off-target.

#[cfg(target_os = "espidf")]
use log::{debug, warn};

#[cfg(target_os = "espidf")]
use crate::events::Event;
use crate::events::OtaMessage;
use crate::network::MeshSignal;

// ── Stack codes ───────────────────────────────────────────────

/// Application signal types (`esp_zb_app_signal_type_t`).
pub mod signal {
    pub const ZDO_DEFAULT_START: u32 = 0x00;
    pub const ZDO_SKIP_STARTUP: u32 = 0x01;
    pub const ZDO_DEVICE_ANNCE: u32 = 0x02;
    pub const ZDO_LEAVE: u32 = 0x03;
    pub const ZDO_ERROR: u32 = 0x04;
    pub const BDB_DEVICE_FIRST_START: u32 = 0x05;
    pub const BDB_DEVICE_REBOOT: u32 = 0x06;
    pub const BDB_STEERING: u32 = 0x0A;
    pub const ZDO_LEAVE_INDICATION: u32 = 0x13;
    pub const COMMON_CAN_SLEEP: u32 = 0x16;
}

/// Core action callback ids (`esp_zb_core_action_callback_id_t`).
pub mod action {
    pub const SET_ATTR_VALUE: u32 = 0x0000;
    pub const OTA_UPGRADE_VALUE: u32 = 0x0004;
}

/// OTA client progress codes (`esp_zb_zcl_ota_upgrade_status_t`).
pub mod ota_status {
    pub const START: u32 = 0x0000;
    pub const APPLY: u32 = 0x0001;
    pub const RECEIVE: u32 = 0x0002;
    pub const FINISH: u32 = 0x0003;
    pub const ABORT: u32 = 0x0004;
    pub const CHECK: u32 = 0x0005;
    pub const OK: u32 = 0x0006;
    pub const ERROR: u32 = 0x0007;
}

/// Translate one application signal. `joined` is only consulted for the
/// first-start signal.
pub fn classify_signal(sig_type: u32, status: i32, joined: bool) -> MeshSignal {
    match sig_type {
        signal::BDB_DEVICE_FIRST_START => MeshSignal::FirstStart { status, joined },
        signal::BDB_DEVICE_REBOOT => MeshSignal::Reboot { status },
        signal::BDB_STEERING => MeshSignal::Steering { status },
        signal::ZDO_LEAVE => MeshSignal::Leave,
        signal::COMMON_CAN_SLEEP => MeshSignal::CanSleep,
        other => MeshSignal::Other {
            signal: other,
            status,
        },
    }
}

/// True for a write of `true` to the counter-reset attribute.
pub fn is_reset_write(cluster: u16, attr: u16, value: Option<u8>) -> bool {
    use crate::network::zcl::{ATTR_RESET_COUNTER, CLUSTER_METER_MAINTENANCE};
    cluster == CLUSTER_METER_MAINTENANCE && attr == ATTR_RESET_COUNTER && value.is_some_and(|v| v != 0)
}

/// Translate one OTA client callback into a queue message.
pub fn ota_message(status: u32, image_size: u32, file_version: u32, payload: &[u8]) -> Option<OtaMessage> {
    match status {
        ota_status::START => Some(OtaMessage::Start {
            image_size,
            file_version,
        }),
        ota_status::RECEIVE if !payload.is_empty() => Some(OtaMessage::from_block(payload)),
        ota_status::CHECK => Some(OtaMessage::Check),
        ota_status::APPLY => Some(OtaMessage::Apply),
        ota_status::FINISH => Some(OtaMessage::Finish),
        ota_status::ABORT | ota_status::ERROR => Some(OtaMessage::Abort),
        _ => None,
    }
}

/// Bind completions carry the pool token in the stack's `user_ctx` pointer.
/// The pointer is never dereferenced.
pub fn bind_token_to_ctx(token: u16) -> *mut core::ffi::c_void {
    core::ptr::without_provenance_mut(usize::from(token))
}

pub fn bind_token_from_ctx(ctx: *mut core::ffi::c_void) -> u16 {
    ctx.addr() as u16
}

#[cfg(target_os = "espidf")]
fn queue_signal(sig: MeshSignal) {
    if !matches!(sig, MeshSignal::CanSleep) {
        debug!("JOIN | signal {:?}", sig);
    }
    if !crate::events::push_event(Event::Mesh(sig)) {
        warn!("JOIN | event queue full, dropped {:?}", sig);
    }
}

// ── ESP-IDF stack adapter ─────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use self::esp::{arm_wake_sources, init, main_loop_iteration, ZigbeeMesh};

#[cfg(target_os = "espidf")]
mod esp {
    use core::ffi::c_void;

    use esp_idf_svc::sys::zigbee as zb;
    use esp_idf_svc::sys::{
        esp_err_t, esp_sleep_enable_ext1_wakeup, esp_sleep_ext1_wakeup_mode_t_ESP_EXT1_WAKEUP_ANY_LOW,
        esp_sleep_get_ext1_wakeup_status, esp_sleep_get_wakeup_cause,
        esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT1, esp_sleep_source_t_ESP_SLEEP_WAKEUP_GPIO,
        esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER, esp_sleep_source_t_ESP_SLEEP_WAKEUP_UNDEFINED,
        esp_timer_get_time, ESP_FAIL, ESP_OK,
    };
    use log::{info, warn};

    use super::{
        action, bind_token_from_ctx, bind_token_to_ctx, classify_signal, is_reset_write, ota_message, queue_signal,
        signal,
    };
    use crate::app::ports::{MeshError, MeshPort};
    use crate::config::{MeterConfig, ReportConfig};
    use crate::error::ProtocolFailure;
    use crate::events::push_ota;
    use crate::metering::variant::MANUFACTURER_NAME;
    use crate::network::bind::BindRequest;
    use crate::network::zcl::{self, AttrValue};
    use crate::network::MeshSignal;
    use crate::power::{WakeCause, WakeInfo};

    const HA_PROFILE_ID: u16 = 0x0104;
    const METER_INTERFACE_DEVICE_ID: u16 = 0x0053;
    const ROLE_SERVER: u8 = 0x01;
    const ROLE_CLIENT: u8 = 0x02;
    const ACCESS_READ_ONLY: u8 = 0x01;
    const ACCESS_WRITE_ONLY: u8 = 0x02;
    const ACCESS_REPORTING: u8 = 0x04;
    const NON_MANUFACTURER_SPECIFIC: u16 = 0xFFFF;
    const BIND_DST_ADDR_MODE_64_BIT: u8 = 0x03;
    const OTA_QUERY_INTERVAL_MIN: u16 = 1440;
    const ED_KEEP_ALIVE_MS: u32 = 3000;
    const SLEEP_THRESHOLD_MS: u32 = 20;
    const OTA_MANUFACTURER_CODE: u16 = 0x131B;
    const OTA_IMAGE_TYPE: u16 = 0x1011;
    const OTA_FILE_VERSION: u32 = 0x0000_0001;
    const OTA_HW_VERSION: u16 = 0x0001;
    const OTA_MAX_DATA_SIZE: u8 = 64;

    fn now_us() -> u64 {
        // SAFETY: esp_timer_get_time has no preconditions.
        (unsafe { esp_timer_get_time() }).max(0) as u64
    }

    fn check(ret: esp_err_t) -> Result<(), ProtocolFailure> {
        if ret == ESP_OK as esp_err_t {
            Ok(())
        } else {
            Err(ProtocolFailure::StartupFailed(ret))
        }
    }

    /// Add one attribute to a cluster's attribute list, copying `value`.
    ///
    /// # Safety
    /// `list` must be a live attribute list for `cluster`.
    unsafe fn add_attr(
        list: *mut zb::esp_zb_attribute_list_t,
        cluster: u16,
        attr: u16,
        value: &AttrValue,
        access: u8,
    ) -> Result<(), ProtocolFailure> {
        let mut bytes = value.to_bytes();
        // SAFETY: the stack copies `bytes` before returning.
        check(unsafe {
            zb::esp_zb_cluster_add_attr(list, cluster, attr, value.zcl_type(), access, bytes.as_mut_ptr().cast())
        })
    }

    /// Configure the radio, register the endpoint and its clusters, and
    /// start the stack. Signals begin to arrive on the first
    /// [`main_loop_iteration`].
    pub fn init(cfg: &MeterConfig) -> Result<ZigbeeMesh, ProtocolFailure> {
        let endpoint = cfg.network.endpoint;
        let desc = cfg.variant.descriptor();

        // SAFETY: all calls below run once on the main task before the
        // stack loop starts; every pointer handed over is either owned by
        // the stack afterwards or copied during the call.
        unsafe {
            let mut platform: zb::esp_zb_platform_config_t = core::mem::zeroed();
            platform.radio_config.radio_mode = zb::esp_zb_radio_mode_t_ZB_RADIO_MODE_NATIVE;
            platform.host_config.host_connection_mode =
                zb::esp_zb_host_connection_mode_t_ZB_HOST_CONNECTION_MODE_NONE;
            check(zb::esp_zb_platform_config(&mut platform))?;

            let mut nwk: zb::esp_zb_cfg_t = core::mem::zeroed();
            nwk.esp_zb_role = zb::esp_zb_nwk_device_type_t_ESP_ZB_DEVICE_TYPE_ED;
            nwk.install_code_policy = false;
            nwk.nwk_cfg.zed_cfg.ed_timeout = zb::esp_zb_aging_timeout_t_ESP_ZB_ED_AGING_TIMEOUT_64MIN as u8;
            nwk.nwk_cfg.zed_cfg.keep_alive = ED_KEEP_ALIVE_MS;
            zb::esp_zb_sleep_enable(true);
            zb::esp_zb_init(&mut nwk);
            zb::esp_zb_set_rx_on_when_idle(false);
            check(zb::esp_zb_sleep_set_threshold(SLEEP_THRESHOLD_MS))?;
            check(zb::esp_zb_set_primary_network_channel_set(cfg.network.channel_mask))?;

            let clusters = zb::esp_zb_zcl_cluster_list_create();

            let basic = zb::esp_zb_zcl_attr_list_create(zcl::CLUSTER_BASIC);
            add_attr(basic, zcl::CLUSTER_BASIC, zcl::ATTR_MANUFACTURER_NAME, &AttrValue::text(MANUFACTURER_NAME), ACCESS_READ_ONLY)?;
            add_attr(basic, zcl::CLUSTER_BASIC, zcl::ATTR_MODEL_IDENTIFIER, &AttrValue::text(desc.model_id), ACCESS_READ_ONLY)?;
            add_attr(basic, zcl::CLUSTER_BASIC, zcl::ATTR_POWER_SOURCE, &AttrValue::Enum8(zcl::POWER_SOURCE_BATTERY), ACCESS_READ_ONLY)?;
            add_attr(basic, zcl::CLUSTER_BASIC, zcl::ATTR_SW_BUILD_ID, &AttrValue::text(&cfg.sw_build_id()), ACCESS_READ_ONLY)?;
            check(zb::esp_zb_cluster_list_add_basic_cluster(clusters, basic, ROLE_SERVER))?;

            let power = zb::esp_zb_zcl_attr_list_create(zcl::CLUSTER_POWER_CONFIG);
            let unknown = AttrValue::U8(crate::sensors::battery::ATTR_UNKNOWN);
            add_attr(power, zcl::CLUSTER_POWER_CONFIG, zcl::ATTR_BATTERY_VOLTAGE, &unknown, ACCESS_READ_ONLY | ACCESS_REPORTING)?;
            add_attr(power, zcl::CLUSTER_POWER_CONFIG, zcl::ATTR_BATTERY_PERCENTAGE, &unknown, ACCESS_READ_ONLY | ACCESS_REPORTING)?;
            check(zb::esp_zb_cluster_list_add_power_config_cluster(clusters, power, ROLE_SERVER))?;

            let metering = zb::esp_zb_zcl_attr_list_create(zcl::CLUSTER_METERING);
            let metering_attrs = [
                (zcl::ATTR_CURRENT_SUMMATION_DELIVERED, AttrValue::U48(0), ACCESS_READ_ONLY | ACCESS_REPORTING),
                (zcl::ATTR_INSTANTANEOUS_DEMAND, AttrValue::S24(0), ACCESS_READ_ONLY | ACCESS_REPORTING),
                (zcl::ATTR_UNIT_OF_MEASURE, AttrValue::Enum8(desc.unit_of_measure), ACCESS_READ_ONLY),
                (zcl::ATTR_MULTIPLIER, AttrValue::U24(1), ACCESS_READ_ONLY),
                (zcl::ATTR_DIVISOR, AttrValue::U24(cfg.pulse.pulses_per_unit), ACCESS_READ_ONLY),
                (zcl::ATTR_SUMMATION_FORMATTING, AttrValue::Bitmap8(0), ACCESS_READ_ONLY),
                (zcl::ATTR_DEMAND_FORMATTING, AttrValue::Bitmap8(0), ACCESS_READ_ONLY),
                (zcl::ATTR_METERING_DEVICE_TYPE, AttrValue::Bitmap8(desc.device_type), ACCESS_READ_ONLY),
            ];
            for (attr, value, access) in &metering_attrs {
                add_attr(metering, zcl::CLUSTER_METERING, *attr, value, *access)?;
            }
            check(zb::esp_zb_cluster_list_add_metering_cluster(clusters, metering, ROLE_SERVER))?;

            let maintenance = zb::esp_zb_zcl_attr_list_create(zcl::CLUSTER_METER_MAINTENANCE);
            let mut reset = AttrValue::Bool(false).to_bytes();
            check(zb::esp_zb_custom_cluster_add_custom_attr(
                maintenance,
                zcl::ATTR_RESET_COUNTER,
                AttrValue::Bool(false).zcl_type(),
                ACCESS_WRITE_ONLY,
                reset.as_mut_ptr().cast(),
            ))?;
            check(zb::esp_zb_cluster_list_add_custom_cluster(clusters, maintenance, ROLE_SERVER))?;

            let mut ota_cfg: zb::esp_zb_ota_cluster_cfg_t = core::mem::zeroed();
            ota_cfg.ota_upgrade_file_version = OTA_FILE_VERSION;
            ota_cfg.ota_upgrade_downloaded_file_ver = OTA_FILE_VERSION;
            ota_cfg.ota_upgrade_manufacturer = OTA_MANUFACTURER_CODE;
            ota_cfg.ota_upgrade_image_type = OTA_IMAGE_TYPE;
            let ota = zb::esp_zb_ota_cluster_create(&mut ota_cfg);
            let mut client: zb::esp_zb_zcl_ota_upgrade_client_variable_t = core::mem::zeroed();
            client.timer_query = OTA_QUERY_INTERVAL_MIN;
            client.hw_version = OTA_HW_VERSION;
            client.max_data_size = OTA_MAX_DATA_SIZE;
            check(zb::esp_zb_ota_cluster_add_attr(
                ota,
                zb::ESP_ZB_ZCL_ATTR_OTA_UPGRADE_CLIENT_DATA_ID as u16,
                (&raw mut client).cast(),
            ))?;
            check(zb::esp_zb_cluster_list_add_ota_cluster(clusters, ota, ROLE_CLIENT))?;

            let endpoints = zb::esp_zb_ep_list_create();
            let ep_cfg = zb::esp_zb_endpoint_config_t {
                endpoint,
                app_profile_id: HA_PROFILE_ID,
                app_device_id: METER_INTERFACE_DEVICE_ID,
                app_device_version: 0,
            };
            check(zb::esp_zb_ep_list_add_ep(endpoints, clusters, ep_cfg))?;
            check(zb::esp_zb_device_register(endpoints))?;

            zb::esp_zb_core_action_handler_register(Some(action_handler));
            check(zb::esp_zb_ota_upgrade_client_query_interval_set(endpoint, OTA_QUERY_INTERVAL_MIN))?;
            zb::esp_zb_set_node_descriptor_power_source(false);

            check(zb::esp_zb_start(true))?;
        }
        info!("JOIN | stack started ep={} mask=0x{:08X}", endpoint, cfg.network.channel_mask);
        Ok(ZigbeeMesh { endpoint })
    }

    /// Run one pass of the stack scheduler. Waits until the stack has work
    /// or a stack timer is due; callbacks fire from here.
    pub fn main_loop_iteration() {
        // SAFETY: called only from the task that ran init().
        unsafe { zb::esp_zb_stack_main_loop_iteration() };
    }

    /// Arm EXT1 level wake (any input low) for the given GPIOs.
    pub fn arm_wake_sources(gpios: &[i32]) {
        let mask = gpios
            .iter()
            .filter(|&&g| crate::pins::is_wake_capable(g))
            .fold(0u64, |m, &g| m | (1u64 << g));
        if mask == 0 {
            warn!("SLEEP | no wake-capable inputs, EXT1 not armed");
            return;
        }
        // SAFETY: mask only contains RTC-capable GPIOs.
        let ret = unsafe { esp_sleep_enable_ext1_wakeup(mask, esp_sleep_ext1_wakeup_mode_t_ESP_EXT1_WAKEUP_ANY_LOW) };
        if ret == ESP_OK as esp_err_t {
            info!("SLEEP | EXT1 wake mask=0x{:X}", mask);
        } else {
            warn!("SLEEP | EXT1 wake mask=0x{:X} failed (rc={})", mask, ret);
        }
    }

    #[unsafe(no_mangle)]
    extern "C" fn esp_zb_app_signal_handler(signal_struct: *mut zb::esp_zb_app_signal_t) {
        if signal_struct.is_null() {
            return;
        }
        // SAFETY: the stack passes a valid signal for the duration of the call.
        let (sig_type, status) = unsafe {
            let s = &*signal_struct;
            if s.p_app_signal.is_null() {
                return;
            }
            (*s.p_app_signal, s.esp_err_status)
        };
        let joined = sig_type == signal::BDB_DEVICE_FIRST_START
            // SAFETY: stack query, valid inside a signal callback.
            && unsafe { zb::esp_zb_bdb_dev_joined() };
        queue_signal(classify_signal(sig_type, status, joined));
    }

    unsafe extern "C" fn action_handler(callback_id: zb::esp_zb_core_action_callback_id_t, message: *const c_void) -> esp_err_t {
        if message.is_null() {
            return ESP_OK as esp_err_t;
        }
        match callback_id as u32 {
            action::SET_ATTR_VALUE => {
                // SAFETY: the stack passes this message type for this id.
                let msg = unsafe { &*message.cast::<zb::esp_zb_zcl_set_attr_value_message_t>() };
                let data = &msg.attribute.data;
                let value = if data.value.is_null() || data.size == 0 {
                    None
                } else {
                    // SAFETY: value points at `size` bytes owned by the stack.
                    Some(unsafe { *data.value.cast::<u8>() })
                };
                if is_reset_write(msg.info.cluster, msg.attribute.id, value) {
                    queue_signal(MeshSignal::ResetCounterWritten);
                }
                ESP_OK as esp_err_t
            }
            action::OTA_UPGRADE_VALUE => {
                // SAFETY: the stack passes this message type for this id.
                let msg = unsafe { &*message.cast::<zb::esp_zb_zcl_ota_upgrade_value_message_t>() };
                if msg.info.status != 0 {
                    warn!("OTA | zcl status {}", msg.info.status);
                    return ESP_FAIL;
                }
                let payload: &[u8] = if msg.payload.is_null() || msg.payload_size == 0 {
                    &[]
                } else {
                    // SAFETY: payload points at payload_size bytes for this call.
                    unsafe { core::slice::from_raw_parts(msg.payload, usize::from(msg.payload_size)) }
                };
                let hdr = &msg.ota_header;
                match ota_message(msg.upgrade_status as u32, hdr.image_size, hdr.file_version, payload) {
                    Some(m) if !push_ota(m) => {
                        warn!("OTA | queue full, refusing block");
                        ESP_FAIL
                    }
                    _ => ESP_OK as esp_err_t,
                }
            }
            _ => ESP_OK as esp_err_t,
        }
    }

    unsafe extern "C" fn bind_cb(zdo_status: zb::esp_zb_zdp_status_t, user_ctx: *mut c_void) {
        queue_signal(MeshSignal::BindComplete {
            token: bind_token_from_ctx(user_ctx),
            status: zdo_status as i32,
        });
    }

    pub struct ZigbeeMesh {
        endpoint: u8,
    }

    impl MeshPort for ZigbeeMesh {
        fn start_steering(&mut self) -> Result<(), MeshError> {
            // SAFETY: stack call from the stack task.
            let ret = unsafe {
                zb::esp_zb_bdb_start_top_level_commissioning(zb::esp_zb_bdb_commissioning_mode_ESP_ZB_BDB_MODE_NETWORK_STEERING as u8)
            };
            if ret == ESP_OK as esp_err_t { Ok(()) } else { Err(MeshError(ret)) }
        }

        fn set_tx_power(&mut self, dbm: i8) {
            // SAFETY: stack call from the stack task.
            unsafe { zb::esp_zb_set_tx_power(dbm) };
        }

        fn set_attribute(&mut self, cluster: u16, attr: u16, value: &AttrValue) {
            let mut bytes = value.to_bytes();
            // SAFETY: the stack copies the value before returning.
            let status = unsafe {
                zb::esp_zb_zcl_set_attribute_val(self.endpoint, cluster, ROLE_SERVER, attr, bytes.as_mut_ptr().cast(), false)
            };
            if status != 0 {
                warn!("ZCL | set 0x{:04X}/0x{:04X} status {}", cluster, attr, status);
            }
        }

        fn configure_reporting(&mut self, cluster: u16, attr: u16, report: &ReportConfig) {
            // SAFETY: zeroed is a valid bit pattern for these plain C structs;
            // the stack copies the reporting entry.
            unsafe {
                let location = zb::esp_zb_zcl_attr_location_info_t {
                    endpoint_id: self.endpoint,
                    cluster_id: cluster,
                    cluster_role: ROLE_SERVER,
                    manuf_code: NON_MANUFACTURER_SPECIFIC,
                    attr_id: attr,
                };
                let start = zb::esp_zb_zcl_start_attr_reporting(location);

                let mut info: zb::esp_zb_zcl_reporting_info_t = core::mem::zeroed();
                info.direction = 0;
                info.ep = self.endpoint;
                info.cluster_id = cluster;
                info.cluster_role = ROLE_SERVER;
                info.attr_id = attr;
                info.manuf_code = NON_MANUFACTURER_SPECIFIC;
                info.dst.profile_id = HA_PROFILE_ID;
                info.u.send_info.min_interval = report.min_interval_s;
                info.u.send_info.max_interval = report.max_interval_s;
                info.u.send_info.def_min_interval = report.min_interval_s;
                info.u.send_info.def_max_interval = report.max_interval_s;
                info.u.send_info.delta.u32 = report.reportable_change;
                let update = zb::esp_zb_zcl_update_reporting_info(&mut info);

                let not_found = zb::ESP_ERR_NOT_FOUND as esp_err_t;
                let ok = |rc: esp_err_t| rc == ESP_OK as esp_err_t || rc == not_found;
                if ok(start) && ok(update) {
                    info!(
                        "ZCL | reporting 0x{:04X}/0x{:04X} min={}s max={}s change={}",
                        cluster, attr, report.min_interval_s, report.max_interval_s, report.reportable_change
                    );
                } else {
                    warn!("ZCL | reporting 0x{:04X}/0x{:04X} failed (start={} update={})", cluster, attr, start, update);
                }
            }
        }

        fn bind_request(&mut self, request: &BindRequest, token: u16) -> Result<(), MeshError> {
            // SAFETY: zeroed is valid for the request struct and the stack
            // copies it before returning.
            unsafe {
                let mut req: zb::esp_zb_zdo_bind_req_param_t = core::mem::zeroed();
                req.req_dst_addr = zb::esp_zb_get_short_address();
                req.src_endp = self.endpoint;
                req.dst_endp = request.dst_endpoint;
                req.cluster_id = request.cluster;
                req.dst_addr_mode = BIND_DST_ADDR_MODE_64_BIT;
                zb::esp_zb_get_long_address(req.src_address.as_mut_ptr());
                let ret = zb::esp_zb_ieee_address_by_short(request.dst_short, req.dst_address_u.addr_long.as_mut_ptr());
                if ret != ESP_OK as esp_err_t {
                    return Err(MeshError(ret));
                }
                zb::esp_zb_zdo_device_bind_req(&mut req, Some(bind_cb), bind_token_to_ctx(token));
            }
            Ok(())
        }

        fn factory_reset(&mut self) {
            // SAFETY: stack call from the stack task.
            unsafe { zb::esp_zb_factory_reset() };
        }

        fn sleep_now(&mut self) -> WakeInfo {
            let t0 = now_us();
            // SAFETY: stack call from the stack task, inside a CanSleep window.
            unsafe { zb::esp_zb_sleep_now() };
            let woke_at = now_us();
            // SAFETY: plain status queries.
            let cause = unsafe {
                match esp_sleep_get_wakeup_cause() {
                    c if c == esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT1 => WakeCause::Ext1 {
                        status: esp_sleep_get_ext1_wakeup_status(),
                    },
                    c if c == esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeCause::Timer,
                    c if c == esp_sleep_source_t_ESP_SLEEP_WAKEUP_GPIO => WakeCause::Gpio,
                    c if c == esp_sleep_source_t_ESP_SLEEP_WAKEUP_UNDEFINED => WakeCause::Undefined,
                    c => WakeCause::Other(c as u32),
                }
            };
            WakeInfo {
                cause,
                slept_us: woke_at.saturating_sub(t0),
                woke_at,
            }
        }
    }
}

// ── Host stand-in ─────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub use self::sim::SimMesh;

#[cfg(not(target_os = "espidf"))]
mod sim {
    use std::collections::{HashMap, VecDeque};

    use log::info;
    use crate::app::ports::{MeshError, MeshPort};
    use crate::config::ReportConfig;
    use crate::network::bind::BindRequest;
    use crate::network::zcl::AttrValue;
    use crate::power::{WakeCause, WakeInfo};

    /// Records every call and replays scripted results.
    #[derive(Debug, Default)]
    pub struct SimMesh {
        pub attributes: HashMap<(u16, u16), AttrValue>,
        pub reports: Vec<(u16, u16, ReportConfig)>,
        pub binds: Vec<(BindRequest, u16)>,
        pub steering_calls: u32,
        pub tx_power: Option<i8>,
        pub factory_resets: u32,
        pub sleeps: u32,
        /// Returned by the next `start_steering` calls, front first.
        pub steer_results: VecDeque<Result<(), MeshError>>,
        pub bind_result: Option<MeshError>,
        /// Returned by the next `sleep_now` calls, front first.
        pub wakes: VecDeque<WakeInfo>,
    }

    impl SimMesh {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn attribute(&self, cluster: u16, attr: u16) -> Option<&AttrValue> {
            self.attributes.get(&(cluster, attr))
        }
    }

    impl MeshPort for SimMesh {
        fn start_steering(&mut self) -> Result<(), MeshError> {
            self.steering_calls += 1;
            self.steer_results.pop_front().unwrap_or(Ok(()))
        }

        fn set_tx_power(&mut self, dbm: i8) {
            self.tx_power = Some(dbm);
        }

        fn set_attribute(&mut self, cluster: u16, attr: u16, value: &AttrValue) {
            self.attributes.insert((cluster, attr), value.clone());
        }

        fn configure_reporting(&mut self, cluster: u16, attr: u16, report: &ReportConfig) {
            self.reports.push((cluster, attr, *report));
        }

        fn bind_request(&mut self, request: &BindRequest, token: u16) -> Result<(), MeshError> {
            if let Some(e) = self.bind_result {
                return Err(e);
            }
            self.binds.push((*request, token));
            Ok(())
        }

        fn factory_reset(&mut self) {
            info!("JOIN | sim factory reset");
            self.factory_resets += 1;
        }

        fn sleep_now(&mut self) -> WakeInfo {
            self.sleeps += 1;
            self.wakes.pop_front().unwrap_or(WakeInfo {
                cause: WakeCause::Undefined,
                slept_us: 0,
                woke_at: 0,
            })
        }
    }
}
