use clap::{Parser, Subcommand};
use raven_rs::air::{AirAddr, AirBindPacket, AirKey, BindPacketType, Capabilities};
use raven_rs::msp::{MspSerial, MspTransport, MSP_MAX_PAYLOAD_SIZE};
use raven_rs::rc::telemetry::TelemetryId;
use raven_rs::{init_logger, log_info, CrsfPort};

#[derive(Parser)]
#[command(name = "raven-cli")]
#[command(about = "Inspection tools for the Raven RC link protocol")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode hex-encoded CRSF wire bytes.
    InspectCrsf { hex: String },
    /// Decode hex-encoded MSP v1 wire bytes.
    InspectMsp { hex: String },
    /// Build a bind packet for the given address (AA:BB:CC:DD:EE:FF).
    BindPacket {
        addr: String,
        #[arg(short, long)]
        key: Option<u32>,
    },
    /// Derived radio parameters for a pairing key.
    KeyInfo { key: u32 },
    /// List every telemetry slot.
    TelemetryIds,
}

fn parse_addr(s: &str) -> anyhow::Result<AirAddr> {
    let parts: Vec<&str> = s.split(':').collect();
    anyhow::ensure!(parts.len() == 6, "address must be six colon-separated bytes");
    let mut addr = [0u8; 6];
    for (slot, part) in addr.iter_mut().zip(parts) {
        *slot = u8::from_str_radix(part, 16)?;
    }
    Ok(AirAddr(addr))
}

fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    match cli.command {
        Commands::InspectCrsf { hex } => {
            let bytes = hex::decode(hex.trim())?;
            let mut port = CrsfPort::new();
            let frames = port.feed(&bytes);
            anyhow::ensure!(!frames.is_empty(), "no valid CRSF frames found");
            for frame in frames {
                log_info(&format!(
                    "frame addr=0x{:02X} type=0x{:02X} ext={:?} payload={}",
                    frame.addr,
                    frame.frame_type,
                    frame.ext,
                    hex::encode(&frame.payload)
                ));
                if let Some(channels) = frame.as_channels() {
                    log_info(&format!("  channels: {channels:?}"));
                }
            }
        }
        Commands::InspectMsp { hex } => {
            let bytes = hex::decode(hex.trim())?;
            let mut serial = MspSerial::new();
            serial.feed(&bytes);
            let mut payload = [0u8; MSP_MAX_PAYLOAD_SIZE];
            let mut found = false;
            while let Some(packet) = serial.read(&mut payload) {
                found = true;
                match packet.payload {
                    Ok(n) => log_info(&format!(
                        "{:?} cmd={} payload={}",
                        packet.direction,
                        packet.cmd,
                        hex::encode(&payload[..n])
                    )),
                    Err(e) => log_info(&format!(
                        "{:?} cmd={} error: {e}",
                        packet.direction, packet.cmd
                    )),
                }
            }
            anyhow::ensure!(found, "no complete MSP frames found");
        }
        Commands::BindPacket { addr, key } => {
            let addr = parse_addr(&addr)?;
            let key = match key {
                Some(k) => {
                    AirKey::new(k).ok_or_else(|| anyhow::anyhow!("key must be non-zero"))?
                }
                None => AirKey::generate(&mut rand::thread_rng()),
            };
            let packet = AirBindPacket::new(
                BindPacketType::Request,
                addr,
                key,
                Capabilities::FREQUENCY_433MHZ,
                raven_rs::constants::RC_CHANNELS_NUM as u8,
            );
            log_info(&format!("bind packet: {}", hex::encode(packet.pack())));
        }
        Commands::KeyInfo { key } => {
            let key =
                AirKey::new(key).ok_or_else(|| anyhow::anyhow!("key must be non-zero"))?;
            log_info(&format!("sync word: 0x{:02X}", key.sync_word()));
            log_info(&format!("crc seed: 0x{:02X}", key.crc_seed()));
        }
        Commands::TelemetryIds => {
            for id in TelemetryId::ALL {
                log_info(&format!(
                    "0x{:02X} {:<9} {:?} {}",
                    id.wire_id(),
                    if id.is_uplink() { "uplink" } else { "downlink" },
                    id.telemetry_type(),
                    id.name()
                ));
            }
        }
    }

    Ok(())
}
