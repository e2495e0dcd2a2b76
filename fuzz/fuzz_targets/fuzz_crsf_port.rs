#![no_main]

use libfuzzer_sys::fuzz_target;
use raven_rs::CrsfPort;

fuzz_target!(|data: &[u8]| {
    let mut port = CrsfPort::new();
    for chunk in data.chunks(9) {
        for frame in port.feed(chunk) {
            // Typed accessors must not panic on arbitrary payloads.
            let _ = frame.as_channels();
            let _ = frame.as_gps();
            let _ = frame.as_battery_sensor();
            let _ = frame.as_attitude();
            let _ = frame.as_link_stats();
            let _ = frame.as_str();
        }
    }
});
