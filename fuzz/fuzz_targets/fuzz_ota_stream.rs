//! Fuzz target: `OtaSession` driven by an arbitrary step stream.
//!
//! The first four bytes are the advertised image size; the rest is read as
//! a sequence of (opcode, length) pairs, each followed by `length` payload
//! bytes when the opcode is a block. The session must never panic, never
//! write past the advertised size, and only reach `Finished` when every
//! expected byte landed in storage.
//!
//! cargo fuzz run fuzz_ota_stream

#![no_main]

use libfuzzer_sys::fuzz_target;
use pulsemeter::adapters::ota_partition::SimPartition;
use pulsemeter::ota::{OtaPhase, OtaSession};

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let image_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) % 8192;
    let mut rest = &data[4..];

    let mut storage = SimPartition::new();
    let mut session = OtaSession::new();
    let _ = session.start(image_size, 1, &mut storage);

    while let [op, len, tail @ ..] = rest {
        match op % 6 {
            0 => {
                let n = usize::from(*len).min(tail.len());
                let _ = session.receive(&tail[..n], &mut storage);
                rest = &tail[n..];
                continue;
            }
            1 => {
                let _ = session.check(&mut storage);
            }
            2 => {
                let _ = session.apply();
            }
            3 => {
                let _ = session.finish(&mut storage);
            }
            4 => session.abort(&mut storage),
            _ => {
                let _ = session.start(u32::from(*len) * 16, 2, &mut storage);
            }
        }
        rest = tail;

        assert!(session.received_offset() <= session.expected_size());
        assert!(storage.image().len() <= image_size.max(u32::from(u8::MAX) * 16) as usize);
    }

    if session.phase() == OtaPhase::Finished {
        assert!(storage.is_boot_target());
        assert_eq!(storage.image().len(), session.expected_size() as usize);
    }
});
