#![no_main]

use libfuzzer_sys::fuzz_target;
use raven_rs::msp::{MspSerial, MspTransport};

fuzz_target!(|data: &[u8]| {
    let mut serial = MspSerial::new();
    let mut payload = [0u8; 512];
    // Feed in odd-sized slices to exercise the partial-frame paths.
    for chunk in data.chunks(11) {
        serial.feed(chunk);
        while serial.read(&mut payload).is_some() {}
    }
});
