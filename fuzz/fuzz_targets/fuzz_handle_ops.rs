#![no_main]

use std::collections::HashMap;

use handle_table::{Handle, HandleTableManager};
use libfuzzer_sys::fuzz_target;

struct Object(u8);

// Each input byte pair is one operation against a single table, checked
// against a plain map model.
fuzz_target!(|data: &[u8]| {
    if data.len() > 4096 {
        return;
    }
    let manager = HandleTableManager::default();
    let Ok(table) = manager.table_for::<Object>() else {
        return;
    };
    let mut model: HashMap<Handle, u8> = HashMap::new();
    let mut issued: Vec<Handle> = Vec::new();

    for op in data.chunks(2) {
        let arg = op.get(1).copied().unwrap_or(0);
        let pick = |issued: &[Handle]| {
            if issued.is_empty() {
                Handle::from_raw(u64::from(arg))
            } else {
                issued[usize::from(arg) % issued.len()]
            }
        };
        match op[0] % 5 {
            0 => {
                let h = table.insert(Object(arg)).expect("insert while active");
                assert!(model.insert(h, arg).is_none(), "handle reused");
                issued.push(h);
            }
            1 => {
                let h = pick(&issued);
                let found = table.find(h).expect("find while active").map(|o| o.0);
                assert_eq!(found, model.get(&h).copied());
            }
            2 => {
                let h = pick(&issued);
                let removed = table.erase(h).expect("erase while active");
                assert_eq!(removed, model.remove(&h).is_some());
            }
            3 => {
                let forged = Handle::from_raw(u64::from(arg) << 40 | u64::from(arg));
                if !model.contains_key(&forged) {
                    assert!(table.find(forged).expect("find while active").is_none());
                }
            }
            _ => assert_eq!(table.len(), model.len()),
        }
    }

    let report = manager.run_teardown().expect("first teardown");
    assert_eq!(report.objects, model.len());
    assert!(table.find(Handle::INVALID).is_err());
});
