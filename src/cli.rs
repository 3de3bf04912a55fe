use std::path::PathBuf;
use std::sync::Arc;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use log::{error, info};
use tokio::io::{stdin, stdout, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::spawn;
use tokio::sync::watch;

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::controller::{Controller, ControllerHandle, ControllerSettings, ControllerState};
use crate::device::btle::BtleplugAdapter;
use crate::device::connection::ConnectOutcome;
use crate::device::pairing::PairingPrompt;
use crate::device::permission::AlwaysGranted;
use crate::device::types::{Device, DeviceId};
use crate::error::{AppRunError, ControllerError};

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Scans for nearby Bluetooth LE devices and manages a connection to one of them", long_about = None)]
pub struct Args {
    /// Path to a JSON config file. Defaults to ble-scanner.json next to the executable, or the
    /// OS specific config directory.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stop scanning after this many milliseconds instead of the configured duration
    #[arg(long)]
    pub duration_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan for nearby devices and list them
    Scan,

    /// Scan until the given device shows up, connect to it and stay connected until Ctrl-C
    Connect {
        /// Device id as printed by `scan`
        id: String,
    },
}

/// Asks for pairing consent on the terminal.
struct TerminalPairingPrompt;

#[async_trait]
impl PairingPrompt for TerminalPairingPrompt {
    async fn confirm(&self, device: &Device) -> bool {
        let question = format!("Pair with {} ({})? [y/N] ", device.name, device.id);
        let mut out = stdout();
        if out.write_all(question.as_bytes()).await.is_err() || out.flush().await.is_err() {
            return false;
        }

        let mut answer = String::new();
        match BufReader::new(stdin()).read_line(&mut answer).await {
            Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
            Err(err) => {
                error!("Failed to read pairing answer: {:?}", err);
                false
            },
        }
    }
}

fn format_device(device: &Device) -> String {
    let bars: String = (0..4)
        .map(|bar| if bar < device.signal_bars() { '▮' } else { '▯' })
        .collect();

    format!("{}  {:<24} {} {} dBm", device.id, device.name, bars, device.signal_strength)
}

async fn load_config(args: &Args) -> Result<(ConfigIO, Config), AppRunError> {
    let config_io = match &args.config {
        Some(path) => ConfigIO::open_sync(path)?,
        None => ConfigIO::new_sync()?,
    };

    let mut config = match config_io.read().await {
        Ok(config) => config,
        Err(err) if err.is_file_not_found_error() => {
            info!("Config file not found, using defaults");
            Config::default()
        },
        Err(err) => return Err(err.into()),
    };

    if let Some(duration_ms) = args.duration_ms {
        config.scan_duration_ms = duration_ms;
    }

    Ok((config_io, config))
}

// prints connection state changes until the controller goes away
fn print_transitions(mut updates: watch::Receiver<ControllerState>) {
    spawn(async move {
        let mut previous = updates.borrow_and_update().clone();

        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();

            for (id, connection_state) in &state.connection_states {
                if previous.connection_state_of(id) != *connection_state {
                    println!("{}: {}", id, connection_state);
                }
            }
            if state.last_error != previous.last_error {
                if let Some(err) = &state.last_error {
                    println!("Error: {}", err);
                }
            }

            previous = state;
        }
    });
}

async fn scan(handle: &ControllerHandle) -> Result<(), AppRunError> {
    let mut updates = handle.subscribe();
    handle.start_scan().await?;
    println!("Scanning for devices...");

    let mut printed = 0;
    loop {
        let state = updates.borrow_and_update().clone();
        for device in state.devices.iter().skip(printed) {
            println!("{}", format_device(device));
        }
        printed = printed.max(state.devices.len());

        if !state.is_scanning || updates.changed().await.is_err() {
            break;
        }
    }

    let devices = handle.devices();
    println!();
    println!("Available Devices ({})", devices.len());
    for device in &devices {
        println!("{}", format_device(device));
    }
    Ok(())
}

async fn connect(handle: &ControllerHandle, id: DeviceId) -> Result<(), AppRunError> {
    handle.start_scan().await?;
    println!("Scanning for {}...", id);

    let state = handle.wait_for(|state| state.device(&id).is_some() || !state.is_scanning).await?;
    if state.device(&id).is_none() {
        return Err(ControllerError::UnknownDevice(id.to_string()).into());
    }

    print_transitions(handle.subscribe());

    match handle.connect(id.clone()).await? {
        ConnectOutcome::Declined => {
            println!("Pairing declined");
            return Ok(());
        },
        ConnectOutcome::Connected => {},
    }

    let name = handle
        .connected_device()
        .and_then(|device| device.name)
        .unwrap_or_else(|| "Unknown Device".to_string());
    println!("Connected to {}. Press Ctrl-C to disconnect.", name);

    tokio::signal::ctrl_c().await?;
    handle.disconnect().await?;
    println!("Disconnected");
    Ok(())
}

pub async fn run(args: Args) -> Result<(), AppRunError> {
    let (mut config_io, config) = load_config(&args).await?;

    // one session owns the radio at a time
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let adapter = Arc::new(BtleplugAdapter::new().await?);
    let pairing = config.pairing.policy(Arc::new(TerminalPairingPrompt));
    info!("Pairing policy: {:?}", pairing);

    let handle = Controller::spawn(
        adapter,
        Arc::new(AlwaysGranted),
        pairing,
        ControllerSettings::from(&config),
    );

    let result = match args.command {
        Command::Scan => scan(&handle).await,
        Command::Connect { id } => connect(&handle, DeviceId::new(id)).await,
    };

    handle.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_line_shows_signal_bars() {
        let device = Device {
            id: DeviceId::from("AA:BB"),
            name: "Thermo1".to_string(),
            signal_strength: -80,
            bonded: false,
        };

        let line = format_device(&device);
        assert!(line.starts_with("AA:BB  Thermo1"));
        assert!(line.contains("▮▮▯▯ -80 dBm"));
    }

    #[test]
    fn parses_connect_command() {
        let args = Args::try_parse_from(["ble-scanner", "--duration-ms", "5000", "connect", "AA:BB"]).unwrap();
        assert_eq!(args.duration_ms, Some(5000));
        assert!(matches!(args.command, Command::Connect { ref id } if id == "AA:BB"));
    }
}
