//! Descriptor sources
//!
//! A [`DescriptorSource`] opens a device and returns a [`DeviceHandle`]
//! holding the device's raw descriptor bytes. Closing is the handle's
//! `Drop`, so every exit path of a scan releases the device.

use crate::error::{DescriptorError, Result};
use crate::reader::DescriptorReader;
use crate::types::DeviceReference;
use bytes::Bytes;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Default usbfs mount point on Linux
pub const DEFAULT_USBFS_ROOT: &str = "/dev/bus/usb";

/// An opened device
pub trait DeviceHandle: Send {
    /// Reference this handle was opened for
    fn device(&self) -> &DeviceReference;

    /// Raw descriptor blob (device descriptor followed by configuration
    /// descriptors)
    fn descriptor_bytes(&self) -> &[u8];

    /// Walk the descriptor records of this device
    fn descriptors(&self) -> DescriptorReader<'_> {
        DescriptorReader::new(self.descriptor_bytes())
    }
}

/// Opens devices for descriptor reading
pub trait DescriptorSource: Send + Sync {
    fn open(&self, device: &DeviceReference) -> Result<Box<dyn DeviceHandle + '_>>;
}

/// Reads descriptors from usbfs device nodes
///
/// The kernel exposes, on read, the device descriptor followed by every
/// configuration descriptor (with its interfaces and endpoints) at
/// `<root>/<bus>/<address>`.
#[derive(Debug, Clone)]
pub struct UsbfsSource {
    root: PathBuf,
}

impl UsbfsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a device reference onto a node below this source's root
    pub fn node_path(&self, device: &DeviceReference) -> Result<PathBuf> {
        let (bus, address) = device
            .bus_address()
            .ok_or_else(|| DescriptorError::InvalidReference(device.to_string()))?;
        Ok(self
            .root
            .join(format!("{:03}", bus))
            .join(format!("{:03}", address)))
    }
}

impl Default for UsbfsSource {
    fn default() -> Self {
        Self::new(DEFAULT_USBFS_ROOT)
    }
}

impl DescriptorSource for UsbfsSource {
    fn open(&self, device: &DeviceReference) -> Result<Box<dyn DeviceHandle + '_>> {
        let path = self.node_path(device)?;

        let mut file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DescriptorError::NotFound(device.clone()),
            _ => DescriptorError::Open {
                device: device.clone(),
                source: e,
            },
        })?;

        let mut raw = Vec::with_capacity(256);
        file.read_to_end(&mut raw)
            .map_err(|e| DescriptorError::Open {
                device: device.clone(),
                source: e,
            })?;

        trace!("Opened {} ({} descriptor bytes)", path.display(), raw.len());

        Ok(Box::new(UsbfsHandle {
            device: device.clone(),
            _file: file,
            bytes: Bytes::from(raw),
        }))
    }
}

/// Open usbfs node; the file is closed when the handle drops
struct UsbfsHandle {
    device: DeviceReference,
    _file: File,
    bytes: Bytes,
}

impl DeviceHandle for UsbfsHandle {
    fn device(&self) -> &DeviceReference {
        &self.device
    }

    fn descriptor_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for UsbfsHandle {
    fn drop(&mut self) {
        trace!("Closed {}", self.device);
    }
}
