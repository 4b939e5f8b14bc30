//! usb-dispatchd
//!
//! USB driver-dispatch daemon: binds compiled-in drivers to matching
//! devices as they are attached.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use descriptor::UsbfsSource;
use host::config::{self, HostConfig};
use host::drivers::build_registry;
use host::listing;
use host::service::{self, Notifier};
use host::usb::{DeviceWatcher, Dispatcher, RusbEngine, WatcherHandle};
use std::io;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usb-dispatchd")]
#[command(
    author,
    version,
    about = "USB driver dispatch daemon - bind drivers to attached devices"
)]
#[command(long_about = "
Watches the USB bus and hands every attached device to the drivers
registered for its vendor/product IDs or its device and interface class
codes.

EXAMPLES:
    # Run with default config
    usb-dispatchd

    # Run with custom config
    usb-dispatchd --config /path/to/host.toml

    # Show how the attached devices would be dispatched
    usb-dispatchd --list-devices

    # Same, as JSON
    usb-dispatchd --list-devices --json

    # Run as a systemd notify service
    usb-dispatchd --service

    # Run with debug logging
    usb-dispatchd --log-level debug

CONFIGURATION:
    The daemon looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-dispatch/host.toml
    3. /etc/usb-dispatch/host.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Classify attached devices, print the matching drivers and exit
    #[arg(long)]
    list_devices: bool,

    /// Print --list-devices output as JSON
    #[arg(long, requires = "list_devices")]
    json: bool,

    /// Run as a systemd service (sends sd_notify readiness)
    #[arg(long)]
    service: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = HostConfig::default();
        let path = HostConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        HostConfig::load(Some(config::expand_path(path))).context("Failed to load configuration")?
    } else {
        HostConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.host.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-dispatchd v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let registry =
        Arc::new(build_registry(&config.drivers).context("Failed to build driver registry")?);
    let engine = RusbEngine::init(config.usb.engine_settings())
        .context("Failed to initialize USB subsystem")?;
    let source = Arc::new(UsbfsSource::new(config.usb.usbfs_root()));
    let dispatcher = Dispatcher::new(registry, source, config.dispatch);

    if args.list_devices {
        return list_devices_mode(&engine, &dispatcher, args.json);
    }

    let service_mode = args.service || config.host.service_mode;
    let notifier = Notifier::new(service_mode);
    if service_mode && service::is_systemd() {
        info!("Running under systemd");
    }

    let watcher = DeviceWatcher::new(engine, dispatcher)
        .start()
        .context("Failed to start device watcher")?;

    notifier.ready().context("Failed to notify systemd ready")?;
    notifier
        .status("Watching for USB devices")
        .context("Failed to send status to systemd")?;

    info!("Press Ctrl+C to shutdown");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        Err(e) => {
            error!("Error waiting for Ctrl+C: {}", e);
        }
    }

    notifier.stopping().context("Failed to notify systemd stopping")?;

    match watcher.bindings().await {
        Ok(bindings) => info!("Releasing {} driver bindings", bindings.len()),
        Err(e) => error!("Failed to query bindings: {}", e),
    }

    stop_watcher(watcher).await?;
    info!("Shutdown complete");
    Ok(())
}

/// Stop the watcher off the async runtime; joining blocks
async fn stop_watcher(watcher: WatcherHandle) -> Result<()> {
    tokio::task::spawn_blocking(move || watcher.stop())
        .await
        .context("Watcher shutdown task failed")?
        .context("Device watcher stopped with error")
}

/// Classify every attached device and print its matching drivers
fn list_devices_mode(engine: &RusbEngine, dispatcher: &Dispatcher, json: bool) -> Result<()> {
    info!("Listing USB devices...");

    let devices = engine.list_devices().context("Failed to enumerate USB devices")?;
    let listings = listing::collect_listings(devices, dispatcher);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        listing::write_json(&mut out, &listings)
    } else {
        listing::write_text(&mut out, &listings)
    }
}
