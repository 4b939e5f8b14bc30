//! Test utilities for usb-dispatch
//!
//! Provides synthetic descriptor blobs, an in-memory descriptor source and
//! async helpers shared by the unit and integration tests of all crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockDescriptorSource, create_mock_cdc_acm_blob, mock_device};
//! use descriptor::DescriptorSource;
//!
//! let source = MockDescriptorSource::new();
//! source.insert(mock_device(1), create_mock_cdc_acm_blob());
//!
//! let handle = source.open(&mock_device(1)).unwrap();
//! assert_eq!(handle.descriptors().count(), 5);
//! ```

use bytes::Bytes;
use descriptor::{DescriptorError, DescriptorSource, DeviceHandle, DeviceReference};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Device reference on bus 1 at the given address
pub fn mock_device(address: u8) -> DeviceReference {
    DeviceReference::from_bus_address(1, address)
}

/// Create a mock device descriptor
///
/// Returns a standard 18-byte device descriptor
pub fn create_mock_device_descriptor(
    vendor_id: u16,
    product_id: u16,
    class: u8,
    subclass: u8,
    protocol: u8,
) -> Vec<u8> {
    let [vid_lo, vid_hi] = vendor_id.to_le_bytes();
    let [pid_lo, pid_hi] = product_id.to_le_bytes();
    vec![
        0x12, // bLength
        0x01, // bDescriptorType (Device)
        0x00, 0x02, // bcdUSB (2.00)
        class, subclass, protocol,
        0x40, // bMaxPacketSize0 (64 bytes)
        vid_lo, vid_hi, pid_lo, pid_hi,
        0x00, 0x01, // bcdDevice (1.00)
        0x01, // iManufacturer
        0x02, // iProduct
        0x03, // iSerialNumber
        0x01, // bNumConfigurations
    ]
}

/// Create a mock interface descriptor
pub fn create_mock_interface_descriptor(
    number: u8,
    class: u8,
    subclass: u8,
    protocol: u8,
) -> Vec<u8> {
    vec![
        0x09, // bLength
        0x04, // bDescriptorType (Interface)
        number, // bInterfaceNumber
        0x00, // bAlternateSetting
        0x01, // bNumEndpoints
        class, subclass, protocol,
        0x00, // iInterface
    ]
}

/// Create a mock configuration descriptor
///
/// One interface per class triple, each followed by a single bulk IN
/// endpoint.
pub fn create_mock_config_descriptor(interfaces: &[(u8, u8, u8)]) -> Vec<u8> {
    let total = 9 + interfaces.len() * (9 + 7);
    let [total_lo, total_hi] = (total as u16).to_le_bytes();

    let mut blob = vec![
        0x09, // bLength
        0x02, // bDescriptorType (Configuration)
        total_lo, total_hi, // wTotalLength
        interfaces.len() as u8, // bNumInterfaces
        0x01, // bConfigurationValue
        0x00, // iConfiguration
        0x80, // bmAttributes (Bus-powered)
        0x32, // bMaxPower (100mA)
    ];

    for (number, &(class, subclass, protocol)) in interfaces.iter().enumerate() {
        blob.extend(create_mock_interface_descriptor(
            number as u8,
            class,
            subclass,
            protocol,
        ));
        blob.extend_from_slice(&[
            0x07, // bLength
            0x05, // bDescriptorType (Endpoint)
            0x81 + number as u8, // bEndpointAddress (IN)
            0x02, // bmAttributes (Bulk)
            0x00, 0x02, // wMaxPacketSize (512 bytes)
            0x00, // bInterval
        ]);
    }
    blob
}

/// Device descriptor followed by a configuration with the given interfaces
pub fn create_mock_device_blob(
    vendor_id: u16,
    product_id: u16,
    device_class: (u8, u8, u8),
    interfaces: &[(u8, u8, u8)],
) -> Vec<u8> {
    let (class, subclass, protocol) = device_class;
    let mut blob = create_mock_device_descriptor(vendor_id, product_id, class, subclass, protocol);
    blob.extend(create_mock_config_descriptor(interfaces));
    blob
}

/// CDC-ACM style device: VID 0x1234, PID 0x5678, device class 02/02/01 and
/// one interface 02/02/01
///
/// Records: device, configuration, interface, endpoint.
pub fn create_mock_cdc_acm_blob() -> Vec<u8> {
    let mut blob =
        create_mock_device_blob(0x1234, 0x5678, (0x02, 0x02, 0x01), &[(0x02, 0x02, 0x01)]);
    // Trailing CDC header functional descriptor, ignored by classification
    blob.extend_from_slice(&[0x05, 0x24, 0x00, 0x10, 0x01]);
    blob
}

/// In-memory descriptor source
///
/// Counts opens and closes so tests can check that every handle is
/// released.
#[derive(Clone, Default)]
pub struct MockDescriptorSource {
    devices: Arc<RwLock<HashMap<DeviceReference, Bytes>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MockDescriptorSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug a device in (or replace its descriptors)
    pub fn insert(&self, device: DeviceReference, blob: impl Into<Bytes>) {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device, blob.into());
    }

    /// Unplug a device
    pub fn remove(&self, device: &DeviceReference) {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device);
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DescriptorSource for MockDescriptorSource {
    fn open(
        &self,
        device: &DeviceReference,
    ) -> descriptor::Result<Box<dyn DeviceHandle + '_>> {
        let bytes = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device)
            .cloned()
            .ok_or_else(|| DescriptorError::NotFound(device.clone()))?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            device: device.clone(),
            bytes,
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct MockHandle {
    device: DeviceReference,
    bytes: Bytes,
    closed: Arc<AtomicUsize>,
}

impl DeviceHandle for MockHandle {
    fn device(&self) -> &DeviceReference {
        &self.device
    }

    fn descriptor_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Run a future with a timeout
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main]
/// # async fn main() {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
/// assert_eq!(result.unwrap(), 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Poll `condition` until it holds or `timeout` elapses (blocking)
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[cfg(test)]
mod tests {
    use super::*;
    use descriptor::{Descriptor, DescriptorReader};

    #[test]
    fn test_mock_config_total_length() {
        let blob = create_mock_config_descriptor(&[(2, 2, 1), (0x0a, 0, 0)]);
        let Some(Descriptor::Configuration(config)) = DescriptorReader::new(&blob).next() else {
            panic!("expected configuration descriptor");
        };
        assert_eq!(config.total_length as usize, blob.len());
        assert_eq!(config.num_interfaces, 2);
    }

    #[test]
    fn test_mock_cdc_acm_blob_walks_cleanly() {
        let blob = create_mock_cdc_acm_blob();
        let mut reader = DescriptorReader::new(&blob);
        assert_eq!(reader.by_ref().count(), 5);
        assert!(!reader.stopped_early());
    }

    #[test]
    fn test_mock_source_counts_open_close() {
        let source = MockDescriptorSource::new();
        source.insert(mock_device(3), create_mock_cdc_acm_blob());

        {
            let handle = source.open(&mock_device(3)).unwrap();
            assert_eq!(handle.device(), &mock_device(3));
            assert_eq!(source.open_count(), 1);
            assert_eq!(source.close_count(), 0);
        }
        assert_eq!(source.close_count(), 1);

        source.remove(&mock_device(3));
        assert!(source.open(&mock_device(3)).is_err());
        assert_eq!(source.open_count(), 1);
    }
}
