use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use immergas_modbus::transport::{hex_dump, SerialLink, SerialPortLink};
use immergas_modbus_mock::{handle_request, parse_register_preset, FrameAssembler, RegisterBank};

/// Simulated Immergas Modbus RTU slave on a real serial port.
#[derive(Parser, Debug)]
#[command(name = "immergas-modbus-mock")]
#[command(about = "Answers Modbus RTU 0x03/0x10 requests from an in-memory register bank")]
#[command(version)]
struct Args {
    /// Serial device, e.g. /dev/ttyUSB1 or COM4
    #[arg(short, long)]
    port: String,

    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// Slave id to answer as (1-247)
    #[arg(short, long, default_value_t = 1)]
    slave: u8,

    /// Preset a register, ADDR=VALUE (repeatable, decimal or 0x hex)
    #[arg(short, long = "register", value_name = "ADDR=VALUE")]
    registers: Vec<String>,

    /// Answer "illegal data address" for registers that were never set
    #[arg(long)]
    strict: bool,

    /// Do not drive RTS as the RS-485 direction pin
    #[arg(long)]
    no_rts: bool,

    /// Silence after which buffered bytes are taken as one frame (ms)
    #[arg(long, default_value_t = 20)]
    frame_gap_ms: u64,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_level))
        .init();

    let mut bank = RegisterBank::new(args.slave);
    if args.strict {
        bank = bank.with_strict_addressing();
    }
    for preset in &args.registers {
        let (addr, value) = parse_register_preset(preset)?;
        bank.set(addr, value);
    }

    let mut link = SerialPortLink::open(&args.port, args.baud)
        .with_context(|| format!("Failed to open serial port {}", args.port))?;
    if args.no_rts {
        link = link.without_rts_direction();
    }
    info!(
        port = %args.port,
        baud = args.baud,
        slave = args.slave,
        presets = args.registers.len(),
        "mock slave listening"
    );

    let mut frames = FrameAssembler::new(Duration::from_millis(args.frame_gap_ms));
    loop {
        for _ in 0..link.available() {
            match link.read_byte() {
                Some(b) => frames.push(b, Instant::now()),
                None => break,
            }
        }

        let Some(frame) = frames.next_frame(Instant::now()) else {
            tokio::time::sleep(Duration::from_millis(1)).await;
            continue;
        };
        debug!(frame = %hex_dump(&frame), "request");
        match handle_request(&mut bank, &frame) {
            Some(response) => {
                debug!(frame = %hex_dump(&response), "response");
                if let Err(e) = send(&mut link, &response) {
                    warn!(error = %e, "failed to send response");
                }
            }
            None => debug!(frame = %hex_dump(&frame), "no answer"),
        }
    }
}

fn send(link: &mut SerialPortLink, frame: &[u8]) -> Result<()> {
    link.set_transmit(true)?;
    let written = link.write(frame).and_then(|()| link.flush());
    link.set_transmit(false)?;
    written?;
    Ok(())
}
