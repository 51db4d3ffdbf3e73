//! Fuzz target for config.toml parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use zenc_core::config::ZencConfig;

fuzz_target!(|data: &str| {
    // Parse and validate should return errors, never panic
    if let Ok(config) = toml::from_str::<ZencConfig>(data) {
        let _ = config.validate();
    }
});
