#![no_main]

use libfuzzer_sys::fuzz_target;
use raven_rs::msp::{MspTelemetry, MspTransport};

fuzz_target!(|data: &[u8]| {
    // Arbitrary chunks against both fragmenter roles.
    let mut input = MspTelemetry::input(6);
    let mut output = MspTelemetry::output(8);
    let mut decoded = [0u8; 512];
    for chunk in data.chunks(7) {
        let _ = input.push_request_chunk(chunk, 1_000);
        let _ = output.push_response_chunk(chunk);
        while input.read(&mut decoded).is_some() {}
        while output.read(&mut decoded).is_some() {}
    }
});
