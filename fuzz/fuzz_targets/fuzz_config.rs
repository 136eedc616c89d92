#![no_main]

use figment::{Figment, providers::Serialized};
use handle_table::HandleTableConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 {
        return;
    }
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    // Must never panic; accepted configs must pass validation.
    let figment = Figment::new().merge(Serialized::defaults(value));
    if let Ok(cfg) = HandleTableConfig::from_figment(&figment) {
        assert!(cfg.validate().is_ok());
    }
});
