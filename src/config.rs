use crate::error::OtaError;
use crate::protocol::CHUNK_SIZE;
use crate::transport::{ATT_WRITE_OVERHEAD, DEFAULT_MTU};
use crate::transport_btleplug::PeripheralFilter;
use btleplug::api::BDAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Upload firmware to NimBLE OTA targets over BLE
#[derive(clap::Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Advertised name of the OTA target
    #[arg(short, long, default_value = "nimble-ble-ota")]
    pub name: String,

    /// BLE Address, accepted in addition to the name
    #[arg(short, long)]
    pub addr: Option<BDAddr>,

    /// Firmware binary path
    #[arg(short, long)]
    pub firmware: PathBuf,

    /// Bytes per data write
    #[arg(short, long, default_value_t = CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Seconds to scan before giving up
    #[arg(long, default_value_t = 10)]
    pub scan_timeout: u64,

    /// Seconds allowed for connecting and resolving the OTA service
    #[arg(long, default_value_t = 15)]
    pub connect_timeout: u64,

    /// Milliseconds before a single write is considered failed
    #[arg(long, default_value_t = 2000)]
    pub write_timeout: u64,

    /// Hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,

    /// More logging, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone)]
pub struct OtaConfig {
    pub filter: PeripheralFilter,
    pub firmware: PathBuf,
    pub chunk_size: usize,
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub quiet: bool,
}

impl OtaConfig {
    pub fn from_args(args: &Args) -> Result<Self, OtaError> {
        let max = DEFAULT_MTU - ATT_WRITE_OVERHEAD;
        if args.chunk_size == 0 || args.chunk_size > max {
            return Err(OtaError::InvalidChunkSize {
                chunk_size: args.chunk_size,
                max,
            });
        }
        Ok(OtaConfig {
            filter: PeripheralFilter {
                name: args.name.clone(),
                addr: args.addr,
            },
            firmware: args.firmware.clone(),
            chunk_size: args.chunk_size,
            scan_timeout: Duration::from_secs(args.scan_timeout),
            connect_timeout: Duration::from_secs(args.connect_timeout),
            write_timeout: Duration::from_millis(args.write_timeout),
            quiet: args.quiet,
        })
    }
}

/// Default log filter for a `-v` count, used when RUST_LOG is unset
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}
