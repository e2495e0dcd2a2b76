//! Byte-exact vectors for the wire formats, checked against values
//! captured from the protocol definitions.

use raven_rs::air::stream::{AirStream, StreamRole};
use raven_rs::air::AIR_DATA_START_STOP;
use raven_rs::msp::{MspDirection, MspTelemetry, MspTransport, MSP_RAW_IMU};
use raven_rs::protocols::crsf::{
    addr, pack_channels, CrsfFrame, CrsfFrameType, CRSF_CHANNEL_VALUE_MID, CRSF_NUM_CHANNELS,
};
use raven_rs::protocols::smartport::{SmartportMaster, SMARTPORT_START_STOP};
use raven_rs::rc::data::CHANNEL_CENTER_VALUE;
use raven_rs::util::{
    crc8_dvb_s2_bytes, crc8_dvb_s2_bytes_from, uvarint_decode32, uvarint_encode32,
};

/// DVB-S2 CRC-8 vectors derived from the 0xD5 polynomial, MSB first.
#[test]
fn test_crc8_dvb_s2_vectors() {
    assert_eq!(crc8_dvb_s2_bytes(&[0x00]), 0x00);
    assert_eq!(crc8_dvb_s2_bytes(&[0x01]), 0xD5);
    assert_eq!(crc8_dvb_s2_bytes(&[0xFF, 0xFF]), 0x81);
}

#[test]
fn test_crc8_dvb_s2_composability() {
    let data = [0x52, 0x56, 0x4E, 0x00, 0x01, 0x02];
    for split in 0..=data.len() {
        let (a, b) = data.split_at(split);
        assert_eq!(
            crc8_dvb_s2_bytes_from(crc8_dvb_s2_bytes_from(0, a), b),
            crc8_dvb_s2_bytes(&data)
        );
    }
}

#[test]
fn test_uvarint_reference_encoding() {
    let mut buf = [0u8; 5];
    let used = uvarint_encode32(&mut buf, 300).unwrap();
    assert_eq!(&buf[..used], &[0xAC, 0x02]);
    assert_eq!(uvarint_decode32(&[0xAC, 0x02]).unwrap(), (300, 2));
}

/// A CRSF channels frame with all sixteen channels at center packs into
/// a repeating pattern opening with 0xE0, and the CRC over type +
/// payload matches the emitted trailer.
#[test]
fn test_crsf_channels_frame_vector() {
    let channels = [CRSF_CHANNEL_VALUE_MID; CRSF_NUM_CHANNELS];
    let frame = CrsfFrame::new(
        addr::FLIGHT_CONTROLLER,
        CrsfFrameType::RcChannelsPacked,
        pack_channels(&channels).to_vec(),
    );
    let bytes = frame.to_bytes();
    assert_eq!(bytes[0], 0xC8);
    assert_eq!(bytes[1], 24);
    assert_eq!(bytes[2], 0x16);
    assert_eq!(bytes[3], 0xE0);
    let crc = crc8_dvb_s2_bytes(&bytes[2..bytes.len() - 1]);
    assert_eq!(*bytes.last().unwrap(), crc);

    let mut port = raven_rs::CrsfPort::new();
    let decoded = port.feed(&bytes);
    assert_eq!(decoded[0].as_channels().unwrap(), channels);
}

/// Channel 5 at center encodes as the single two-bit record 0xC5:
/// prefix 11, channel index 1, sub-value 01.
#[test]
fn test_air_stream_two_bit_channel_vector() {
    let mut stream = AirStream::new(StreamRole::Uplink);
    stream.feed_output_channel(5, CHANNEL_CENTER_VALUE);
    let mut out = Vec::new();
    while let Some(b) = stream.pop_output() {
        out.push(b);
    }
    assert_eq!(out, vec![AIR_DATA_START_STOP, 0xC5]);
}

/// With no sensors found, the first three S.Port polls walk the sensor
/// table in order: 0x00, 0xA1, 0x22.
#[test]
fn test_smartport_poll_cadence_vector() {
    let mut sp = SmartportMaster::new();
    assert_eq!(sp.update(0).unwrap(), vec![SMARTPORT_START_STOP, 0x00]);
    assert_eq!(sp.update(11_000).unwrap(), vec![SMARTPORT_START_STOP, 0xA1]);
    assert_eq!(sp.update(22_000).unwrap(), vec![SMARTPORT_START_STOP, 0x22]);
}

/// An empty RAW_IMU request at chunk size 6 yields one chunk:
/// `{seq=0, start=1, version=1}` then size, cmd and the XOR checksum.
#[test]
fn test_msp_telemetry_request_vector() {
    let mut output = MspTelemetry::output(6);
    output.write(MspDirection::ToFc, MSP_RAW_IMU, &[]).unwrap();
    let mut chunk = [0u8; 8];
    let n = output.pop_request_chunk(&mut chunk, 1);
    assert_eq!(n, 4);
    assert_eq!(&chunk[..4], &[0x30, 0x00, 0x66, 0x66]);
    assert_eq!(output.pop_request_chunk(&mut chunk, 2), 0);
}

/// The matching 18-byte response rehydrates into `(cmd=102, payload)`.
#[test]
fn test_msp_telemetry_response_vector() {
    let mut output = MspTelemetry::output(6);
    output.write(MspDirection::ToFc, MSP_RAW_IMU, &[]).unwrap();
    let mut chunk = [0u8; 8];
    assert!(output.pop_request_chunk(&mut chunk, 1) > 0);

    // Build the response chunks the way the FC side does.
    let mut fc = MspTelemetry::input(6);
    let payload: Vec<u8> = (0..18).collect();
    fc.write(MspDirection::FromFc, MSP_RAW_IMU, &payload).unwrap();
    let mut first = true;
    loop {
        let n = fc.pop_response_chunk(&mut chunk);
        if n == 0 {
            break;
        }
        if first {
            // seq 0, start bit set, error clear.
            assert_eq!(chunk[0], 0x10);
            first = false;
        }
        assert!(output.push_response_chunk(&chunk[..n]));
    }
    assert!(!first);
    let mut decoded = [0u8; 64];
    let packet = output.read(&mut decoded).unwrap();
    assert_eq!(packet.cmd, u16::from(102u8));
    assert_eq!(packet.payload, Ok(18));
    assert_eq!(&decoded[..18], payload.as_slice());
}
