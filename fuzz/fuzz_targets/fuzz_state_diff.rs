#![no_main]

use libfuzzer_sys::fuzz_target;
use motionblinds_core::state::{ChangeSet, StateMap};

fuzz_target!(|data: &[u8]| {
    let Some(split) = data.iter().position(|&b| b == 0) else {
        return;
    };
    let old: StateMap = serde_json::from_slice(&data[..split]).unwrap_or_default();
    let new: StateMap = serde_json::from_slice(&data[split + 1..]).unwrap_or_default();

    let changes = ChangeSet::diff(&old, &new);
    for (field, change) in changes.iter() {
        assert_ne!(change.old, change.new);
        assert_eq!(change.new.as_ref(), new.get(field));
    }
    assert!(ChangeSet::diff(&new, &new).is_empty());
});
