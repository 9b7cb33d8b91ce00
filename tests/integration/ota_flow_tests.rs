//! Firmware transfer sessions end to end, fed the way the stack callback
//! feeds them.

use crate::mock_ports::Rig;

use pulsemeter::adapters::ota_partition::FailAt;
use pulsemeter::adapters::zigbee::{ota_message, ota_status};
use pulsemeter::app::events::AppEvent;
use pulsemeter::app::ports::{FirmwareStorageError, StoragePort};
use pulsemeter::app::service::{MeterService, KEY_PULSES};
use pulsemeter::config::MeterConfig;
use pulsemeter::error::Error;
use pulsemeter::events::{OtaMessage, OTA_BLOCK_MAX};
use pulsemeter::ota::{OtaError, OtaPhase};
use pulsemeter::sensors::pulse::PulseCounter;

const VERSION: u32 = 0x0000_0002;

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn msg(status: u32, image_size: u32, payload: &[u8]) -> OtaMessage {
    match ota_message(status, image_size, VERSION, payload) {
        Some(m) => m,
        None => panic!("status {status} produced no message"),
    }
}

/// Stream `bytes` in stack-sized blocks.
fn send_blocks(rig: &mut Rig, app: &mut MeterService<'_>, bytes: &[u8]) -> pulsemeter::error::Result<()> {
    for block in bytes.chunks(OTA_BLOCK_MAX) {
        rig.ota(app, msg(ota_status::RECEIVE, 0, block))?;
    }
    Ok(())
}

fn failures(rig: &Rig) -> usize {
    rig.sink.count(|e| matches!(e, AppEvent::OtaFailed(_)))
}

#[test]
fn raw_image_is_written_committed_and_booted() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.pulse(&pulses, 50);
    rig.tick(&mut app);
    assert!(app.is_dirty());

    let fw = image(600);
    assert!(rig.ota(&mut app, msg(ota_status::START, 600, &[])).is_ok());
    assert!(send_blocks(&mut rig, &mut app, &fw).is_ok());
    assert_eq!(
        rig.sink.count(|e| matches!(e, AppEvent::OtaProgress { .. })),
        3
    );
    assert!(rig.sink.contains(&AppEvent::OtaProgress {
        offset: 600,
        expected: 600
    }));

    assert!(rig.ota(&mut app, msg(ota_status::CHECK, 0, &[])).is_ok());
    assert_eq!(app.ota_phase(), OtaPhase::Checked);
    assert_eq!(rig.system.restarts, 0);
    assert!(rig.ota(&mut app, msg(ota_status::APPLY, 0, &[])).is_ok());
    assert!(rig.ota(&mut app, msg(ota_status::FINISH, 0, &[])).is_ok());

    assert_eq!(rig.firmware.image(), fw.as_slice());
    assert!(rig.firmware.is_boot_target());
    assert_eq!(rig.system.restarts, 1);
    assert!(rig.sink.contains(&AppEvent::OtaFinished { version: VERSION }));
    assert_eq!(rig.store.load_u64(KEY_PULSES), Ok(Some(1)));
}

#[test]
fn tag_wrapped_stream_strips_the_element_header() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    let fw = image(500);
    let mut stream = vec![0u8, 0];
    stream.extend_from_slice(&(fw.len() as u32).to_le_bytes());
    stream.extend_from_slice(&fw);

    assert!(rig
        .ota(&mut app, msg(ota_status::START, stream.len() as u32, &[]))
        .is_ok());
    assert!(send_blocks(&mut rig, &mut app, &stream).is_ok());
    assert!(rig.ota(&mut app, msg(ota_status::CHECK, 0, &[])).is_ok());
    assert!(rig.ota(&mut app, msg(ota_status::FINISH, 0, &[])).is_ok());

    assert_eq!(rig.firmware.image(), fw.as_slice());
    assert!(rig.firmware.is_boot_target());
}

#[test]
fn short_image_fails_check_without_restart() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    assert!(rig.ota(&mut app, msg(ota_status::START, 600, &[])).is_ok());
    assert!(send_blocks(&mut rig, &mut app, &image(512)).is_ok());

    let err = rig.ota(&mut app, msg(ota_status::CHECK, 0, &[]));

    assert_eq!(
        err,
        Err(Error::Transfer(OtaError::SizeMismatch {
            received: 512,
            expected: 600
        }))
    );
    assert_eq!(app.ota_phase(), OtaPhase::Failed);
    assert_eq!(rig.firmware.aborts(), 1);
    assert!(!rig.firmware.is_boot_target());
    assert_eq!(rig.system.restarts, 0);
    assert_eq!(failures(&rig), 1);
}

#[test]
fn oversized_block_fails_the_transfer() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    assert!(rig.ota(&mut app, msg(ota_status::START, 4096, &[])).is_ok());
    let block = image(OTA_BLOCK_MAX + 1);
    let oversized = msg(ota_status::RECEIVE, 0, &block);
    assert_eq!(oversized, OtaMessage::Oversized(OTA_BLOCK_MAX + 1));

    let err = rig.ota(&mut app, oversized);

    assert_eq!(err, Err(Error::Transfer(OtaError::Overflow)));
    assert_eq!(rig.firmware.aborts(), 1);
    assert!(rig.sink.contains(&AppEvent::OtaFailed(OtaError::Overflow)));

    // Later blocks of the dead session are refused.
    let err = rig.ota(&mut app, msg(ota_status::RECEIVE, 0, &[1, 2, 3]));
    assert_eq!(err, Err(Error::Transfer(OtaError::NotReceiving)));
}

#[test]
fn chunk_past_expected_size_overflows() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    assert!(rig.ota(&mut app, msg(ota_status::START, 300, &[])).is_ok());
    assert!(rig.ota(&mut app, msg(ota_status::RECEIVE, 0, &image(256))).is_ok());

    let err = rig.ota(&mut app, msg(ota_status::RECEIVE, 0, &image(64)));

    assert_eq!(err, Err(Error::Transfer(OtaError::Overflow)));
    assert_eq!(app.ota_phase(), OtaPhase::Failed);
    assert_eq!(rig.firmware.image().len(), 256);
    assert_eq!(rig.firmware.aborts(), 1);
}

#[test]
fn storage_refusing_begin_fails_start() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);
    rig.firmware.fail_at(Some(FailAt::Begin));

    let err = rig.ota(&mut app, msg(ota_status::START, 600, &[]));

    assert_eq!(
        err,
        Err(Error::Transfer(OtaError::Storage(
            FirmwareStorageError::BeginFailed
        )))
    );
    assert_eq!(app.ota_phase(), OtaPhase::Failed);
}

#[test]
fn abort_mid_transfer_discards_the_image() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    assert!(rig.ota(&mut app, msg(ota_status::START, 600, &[])).is_ok());
    assert!(rig.ota(&mut app, msg(ota_status::RECEIVE, 0, &image(256))).is_ok());

    assert!(rig.ota(&mut app, msg(ota_status::ERROR, 0, &[])).is_ok());

    assert_eq!(app.ota_phase(), OtaPhase::Idle);
    assert_eq!(rig.firmware.aborts(), 1);
    assert!(!rig.firmware.is_boot_target());
    assert_eq!(rig.system.restarts, 0);
    assert_eq!(failures(&rig), 0);
}

#[test]
fn new_start_replaces_an_active_session() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    assert!(rig.ota(&mut app, msg(ota_status::START, 600, &[])).is_ok());
    assert!(rig.ota(&mut app, msg(ota_status::RECEIVE, 0, &image(256))).is_ok());

    let fw = image(300);
    assert!(rig.ota(&mut app, msg(ota_status::START, 300, &[])).is_ok());
    assert_eq!(rig.firmware.aborts(), 1);
    assert!(send_blocks(&mut rig, &mut app, &fw).is_ok());
    assert!(rig.ota(&mut app, msg(ota_status::CHECK, 0, &[])).is_ok());
    assert!(rig.ota(&mut app, msg(ota_status::FINISH, 0, &[])).is_ok());

    assert_eq!(rig.firmware.image(), fw.as_slice());
    assert_eq!(rig.system.restarts, 1);
}

#[test]
fn finish_without_check_is_refused() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    let fw = image(100);
    assert!(rig.ota(&mut app, msg(ota_status::START, 100, &[])).is_ok());
    assert!(send_blocks(&mut rig, &mut app, &fw).is_ok());

    let err = rig.ota(&mut app, msg(ota_status::FINISH, 0, &[]));

    assert_eq!(err, Err(Error::Transfer(OtaError::NotChecked)));
    assert_eq!(app.ota_phase(), OtaPhase::Receiving);
    assert!(!rig.firmware.is_boot_target());
    assert_eq!(rig.system.restarts, 0);
}

#[test]
fn raw_stream_is_detected_from_first_chunk() {
    let config = MeterConfig::default();
    let pulses = PulseCounter::new();
    let mut rig = Rig::new(&config);
    let mut app = MeterService::new(config, &pulses, 0);
    rig.start(&mut app);

    // Looks like a tag header but the length does not match the image size.
    let mut fw = vec![0u8, 0, 10, 0, 0, 0];
    fw.extend_from_slice(&image(94));
    assert!(rig.ota(&mut app, msg(ota_status::START, 100, &[])).is_ok());
    assert!(send_blocks(&mut rig, &mut app, &fw).is_ok());
    assert!(rig.ota(&mut app, msg(ota_status::CHECK, 0, &[])).is_ok());
    assert_eq!(rig.firmware.image(), fw.as_slice());
}
