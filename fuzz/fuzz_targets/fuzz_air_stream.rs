#![no_main]

use libfuzzer_sys::fuzz_target;
use raven_rs::air::stream::{AirStream, StreamRole};

fuzz_target!(|data: &[u8]| {
    // The decoder must survive arbitrary stream windows, with and
    // without sequence gaps.
    let mut stream = AirStream::new(StreamRole::Downlink);
    let mut seq = 0u8;
    for chunk in data.chunks(13) {
        seq = (seq + 1) & 0x0F;
        let _ = stream.feed_input(seq, chunk, 1_000);
    }

    // Same input with a deliberate gap in the middle.
    let mut stream = AirStream::new(StreamRole::Uplink);
    let mut seq = 0u8;
    for (i, chunk) in data.chunks(7).enumerate() {
        seq = (seq + if i == 3 { 2 } else { 1 }) & 0x0F;
        let _ = stream.feed_input(seq, chunk, 1_000);
    }
});
