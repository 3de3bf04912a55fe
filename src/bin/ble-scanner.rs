use clap::Parser;
use log::{error, info};
use ble_scanner::cli::Args;
use ble_scanner::error::{AppRunError, ConfigError};
use ble_scanner::{init_logging, run};

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("BLE Scanner ", env!("CARGO_PKG_VERSION")));

    let args = Args::parse();

    match run(args).await {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
