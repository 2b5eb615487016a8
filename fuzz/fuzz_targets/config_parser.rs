#![no_main]

use libfuzzer_sys::fuzz_target;
use shadowstack::config::{ColorMode, DumpArea, ReactionMode, ShadowConfig};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Parsing must never panic; accepted files must validate
        if let Ok(config) = ShadowConfig::from_toml_str(input) {
            assert!(config.validate().is_ok());
        }
        let _ = input.parse::<ReactionMode>();
        let _ = input.parse::<DumpArea>();
        let _ = input.parse::<ColorMode>();
    }
});
