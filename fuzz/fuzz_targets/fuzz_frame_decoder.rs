#![no_main]

use libfuzzer_sys::fuzz_target;
use pong_realtime_client::frame::decode_frame;
use pong_realtime_client::SyncEngine;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = std::str::from_utf8(data) else {
        return;
    };

    // Splitting and two-step decoding must never panic.
    let decoded = decode_frame(frame);

    // Neither may dispatching into the state machines.
    let mut engine = SyncEngine::new(1);
    let report = engine.handle_frame(frame);
    assert_eq!(report.documents.len(), decoded.len());
});
