#![no_main]

use engram_backend::HistoryRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);
    let Ok(record) = serde_json::from_str::<HistoryRecord>(&line) else {
        return;
    };
    let encoded = serde_json::to_string(&record).expect("parsed record re-encodes");
    let reparsed: HistoryRecord =
        serde_json::from_str(&encoded).expect("re-encoded record re-parses");
    assert_eq!(record, reparsed);
});
