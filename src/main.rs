mod config;
mod error;
mod firmware;
mod progress;
mod protocol;
mod transport;
mod transport_btleplug;

use clap::Parser;
use config::{Args, OtaConfig};
use error::OtaError;
use firmware::FirmwareImage;
use progress::BarReporter;
use std::process::ExitCode;
use transport_btleplug::BtleplugTransport;
use tracing_subscriber::EnvFilter;

/// Discover, connect and transfer. Ctrl-C is honoured in every phase and
/// still releases whatever link exists at that point.
async fn upload(config: &OtaConfig, image: &FirmwareImage) -> Result<(), OtaError> {
    let central = transport_btleplug::first_adapter().await?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let peripheral = tokio::select! {
        p = transport_btleplug::find_peripheral(&central, &config.filter, config.scan_timeout) => p?,
        _ = &mut ctrl_c => {
            transport_btleplug::stop_scan(&central).await;
            return Err(OtaError::Cancelled);
        }
    };

    let transport = tokio::select! {
        t = BtleplugTransport::connect(peripheral.clone(), config.connect_timeout, config.write_timeout) => t?,
        _ = &mut ctrl_c => {
            transport_btleplug::release(&peripheral).await;
            return Err(OtaError::Cancelled);
        }
    };

    let mut reporter = BarReporter::new(config.quiet);
    protocol::upload(&transport, image.as_bytes(), config.chunk_size, &mut reporter, ctrl_c).await
}

async fn run(args: &Args) -> Result<(), OtaError> {
    let config = OtaConfig::from_args(args)?;
    let image = FirmwareImage::from_file(&config.firmware)?;
    image.validate()?;
    tracing::info!("Firmware size = {} bytes", image.len());

    upload(&config, &image).await
}

/// Process status for a run. The single place a failure is logged.
fn report(result: Result<(), OtaError>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config::log_filter(args.verbose)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    ExitCode::from(report(run(&args).await))
}
