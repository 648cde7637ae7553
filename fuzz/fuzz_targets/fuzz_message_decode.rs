#![no_main]

use libfuzzer_sys::fuzz_target;
use motionblinds_core::message::Message;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::decode(data) {
        let _ = message.state();
        let _ = message.device_list();
        let _ = message.number_of_devices();
        let _ = message.encode();
    }
});
