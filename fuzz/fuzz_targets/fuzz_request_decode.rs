#![no_main]

use libfuzzer_sys::fuzz_target;
use motionblinds_core::message::Request;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = Request::decode(data) {
        let _ = request.expected_ack();
        let _ = request.encode();
    }
});
