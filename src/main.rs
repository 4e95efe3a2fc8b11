//! hapticfixd
//!
//! Emulates continuous controller vibration for controllers that only
//! honor single haptic pulses, and exposes the emulator over D-Bus.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use hapticfixd::{
    config::{share_config, Config, EmulationConfig, MockDeviceConfig},
    dbus::{init_dbus_service, DBUS_NAME},
    device::{Characteristics, DeviceDescriptor, DeviceId},
    emulator::HapticEmulator,
    mock_host::MockHost,
};

/// hapticfixd - Continuous haptic emulation for pulse-only controllers
#[derive(Parser, Debug)]
#[command(name = "hapticfixd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/hapticfixd/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// List configured controllers and exit
    #[arg(long)]
    list_devices: bool,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("hapticfixd starting...");

    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    };
    let config = match loaded {
        Ok(config) => config,
        // Never overwrite a file we could not read
        Err(e) if args.write_config => return Err(e.into()),
        Err(e) => {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }
    };

    if args.list_devices {
        list_devices(&config.mock_devices, &config.emulation);
        return Ok(());
    }

    if args.write_config {
        config.save()?;
        if let Some(path) = &config.config_path {
            println!("Configuration written to {}", path.display());
        }
        return Ok(());
    }

    let host = Arc::new(MockHost::from_config(&config.mock_devices));
    let emulator = Arc::new(HapticEmulator::new(host, config.emulation.clone())?);
    emulator.start()?;

    let shared_config = share_config(config);

    // Keep the connection alive for the lifetime of the daemon
    let _dbus_connection = match init_dbus_service(shared_config, emulator.clone()).await {
        Ok(conn) => {
            info!("D-Bus service initialized successfully");
            conn
        }
        Err(e) => {
            error!("Failed to initialize D-Bus service {}: {}", DBUS_NAME, e);
            emulator.stop();
            return Err(e.into());
        }
    };

    info!("hapticfixd ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting...");

    emulator.stop();
    Ok(())
}

/// Print configured controllers with their role match and emulation verdict
fn list_devices(devices: &[MockDeviceConfig], emulation: &EmulationConfig) {
    if devices.is_empty() {
        println!("No controllers configured.");
        println!("\nAdd entries under \"mock_devices\" in config.json.");
        return;
    }

    println!("Found {} configured controller(s):\n", devices.len());

    for (i, device) in devices.iter().enumerate() {
        let descriptor = DeviceDescriptor::controller(
            DeviceId(i as u64 + 1),
            device.role,
            device.name.as_str(),
            device.manufacturer.as_str(),
            device.serial.as_str(),
        );
        let emulated = emulation.enabled && descriptor.matches_marker(&emulation.marker);
        let marker = if emulated { " [emulated]" } else { "" };

        println!("{}. {}{}", i + 1, descriptor.name, marker);
        println!("   Role:            {}", device.role);
        println!("   Manufacturer:    {}", descriptor.manufacturer);
        println!("   Serial:          {}", descriptor.serial);
        println!("   Characteristics: {}", describe(descriptor.characteristics));
        println!();
    }
}

fn describe(characteristics: Characteristics) -> String {
    format!("{} (0x{:03X})", characteristics, characteristics.bits())
}
