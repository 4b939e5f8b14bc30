//! One-shot device listing for `--list-devices`
//!
//! Output goes to the writer handed in; logs go to stderr, so the JSON form
//! stays parseable when stdout is redirected.

use crate::usb::Dispatcher;
use anyhow::{Context, Result};
use descriptor::{ClassificationKey, DeviceReference};
use serde::Serialize;
use std::io::Write;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct DeviceListing {
    pub device: String,
    pub complete: bool,
    pub keys: Vec<ClassificationKey>,
    pub drivers: Vec<ListedMatch>,
}

#[derive(Debug, Serialize)]
pub struct ListedMatch {
    pub key: ClassificationKey,
    pub driver: String,
    pub supported: bool,
}

/// Classify every device and collect its matching drivers
///
/// Devices whose descriptors cannot be read are logged and skipped. No
/// driver is constructed.
pub fn collect_listings(
    devices: impl IntoIterator<Item = DeviceReference>,
    dispatcher: &Dispatcher,
) -> Vec<DeviceListing> {
    let mut listings = Vec::new();

    for device in devices {
        let classification = match dispatcher.classify(&device) {
            Ok(classification) => classification,
            Err(e) => {
                error!("Failed to read descriptors of {}: {}", device, e);
                continue;
            }
        };

        let drivers = dispatcher
            .matches(&classification.keys)
            .into_iter()
            .map(|(key, factory)| ListedMatch {
                key,
                driver: factory.name(),
                supported: factory.is_supported(&device),
            })
            .collect();

        listings.push(DeviceListing {
            device: device.to_string(),
            complete: classification.complete,
            keys: classification.keys,
            drivers,
        });
    }

    listings
}

pub fn write_json<W: Write>(out: &mut W, listings: &[DeviceListing]) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, listings)
        .context("Failed to serialize device list")?;
    writeln!(out)?;
    Ok(())
}

pub fn write_text<W: Write>(out: &mut W, listings: &[DeviceListing]) -> Result<()> {
    if listings.is_empty() {
        writeln!(out, "No USB devices found.")?;
        return Ok(());
    }

    writeln!(out, "Found {} USB device(s):\n", listings.len())?;
    for listing in listings {
        writeln!(out, "  {}", listing.device)?;
        let keys: Vec<String> = listing.keys.iter().map(ToString::to_string).collect();
        writeln!(out, "      Keys: {}", keys.join(", "))?;
        if !listing.complete {
            writeln!(out, "      Descriptors truncated")?;
        }
        if listing.drivers.is_empty() {
            writeln!(out, "      No matching driver")?;
        }
        for matched in &listing.drivers {
            writeln!(
                out,
                "      {} via {}{}",
                matched.driver,
                matched.key,
                if matched.supported { "" } else { " (unsupported)" }
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}
