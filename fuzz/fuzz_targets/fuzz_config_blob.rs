//! Fuzz target: decoding a stored configuration blob.
//!
//! NVS may hold anything after a partial write or a firmware downgrade.
//! Decoding must fail cleanly, and whatever decodes must survive
//! `sanitize` + `validate` without panicking. A config that validates must
//! also render its build-id string.
//!
//! cargo fuzz run fuzz_config_blob

#![no_main]

use libfuzzer_sys::fuzz_target;
use pulsemeter::config::MeterConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(mut cfg) = postcard::from_bytes::<MeterConfig>(data) else {
        return;
    };
    cfg.sanitize();
    if cfg.validate().is_ok() {
        let id = cfg.sw_build_id();
        assert!(id.len() <= 15);

        let bytes = postcard::to_allocvec(&cfg).expect("re-encode");
        let again: MeterConfig = postcard::from_bytes(&bytes).expect("decode own bytes");
        assert_eq!(again, cfg);
    }
});
