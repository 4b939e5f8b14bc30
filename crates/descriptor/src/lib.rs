//! Descriptor library for usb-dispatch
//!
//! This crate holds everything the dispatcher needs to know about USB
//! descriptor bytes: the classification keys a device can be matched by,
//! a lazy reader over a raw descriptor blob, and the source abstraction that
//! opens a device and hands out its descriptor bytes.
//!
//! # Example
//!
//! ```
//! use descriptor::{Descriptor, DescriptorReader};
//!
//! let blob = [
//!     0x12, 0x01, 0x00, 0x02, 0x02, 0x02, 0x01, 0x40,
//!     0x34, 0x12, 0x78, 0x56, 0x00, 0x01, 0x01, 0x02, 0x03, 0x01,
//! ];
//!
//! let mut reader = DescriptorReader::new(&blob);
//! match reader.next() {
//!     Some(Descriptor::Device(device)) => {
//!         assert_eq!(device.vendor_id, 0x1234);
//!         assert_eq!(device.product_id, 0x5678);
//!     }
//!     other => panic!("unexpected record: {:?}", other),
//! }
//! assert!(reader.next().is_none());
//! ```

pub mod error;
pub mod reader;
pub mod source;
pub mod types;

pub use error::{DescriptorError, Result};
pub use reader::{
    ConfigurationDescriptor, Descriptor, DescriptorReader, DescriptorType, DeviceDescriptor,
    InterfaceDescriptor,
};
pub use source::{DEFAULT_USBFS_ROOT, DescriptorSource, DeviceHandle, UsbfsSource};
pub use types::{
    ClassificationKey, DeviceClassKey, DeviceReference, InterfaceClassKey, KeyParseError,
    ProductKey, TableKind, class_codes,
};
