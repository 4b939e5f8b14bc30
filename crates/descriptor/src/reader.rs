//! Lazy reader over a raw descriptor blob
//!
//! A usbfs device node (and a GET_DESCRIPTOR response chain) is a sequence
//! of length-prefixed records:
//!
//! ```text
//! +---------+-----------------+------------------------+
//! | bLength | bDescriptorType | body (bLength - 2)     |
//! +---------+-----------------+------------------------+
//! ```
//!
//! Only the records classification needs are decoded (device, configuration
//! and interface); everything else is reported as [`Descriptor::Other`].
//! Multi-byte fields are little-endian (USB 2.0 §8.1).

use byteorder::{ByteOrder, LittleEndian};
use std::iter::FusedIterator;
use tracing::warn;

/// Standard descriptor type codes (USB 2.0 table 9-5, USB 3.x table 9-6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DescriptorType {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
    Otg = 9,
    Debug = 10,
    InterfaceAssociation = 11,
    Bos = 15,
    DeviceCapability = 16,
    ClassInterface = 0x24,
    ClassEndpoint = 0x25,
}

impl TryFrom<u8> for DescriptorType {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::Device),
            2 => Ok(Self::Configuration),
            3 => Ok(Self::String),
            4 => Ok(Self::Interface),
            5 => Ok(Self::Endpoint),
            6 => Ok(Self::DeviceQualifier),
            7 => Ok(Self::OtherSpeedConfiguration),
            8 => Ok(Self::InterfacePower),
            9 => Ok(Self::Otg),
            10 => Ok(Self::Debug),
            11 => Ok(Self::InterfaceAssociation),
            15 => Ok(Self::Bos),
            16 => Ok(Self::DeviceCapability),
            0x24 => Ok(Self::ClassInterface),
            0x25 => Ok(Self::ClassEndpoint),
            other => Err(other),
        }
    }
}

/// Fields of a standard device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub usb_version: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub const LENGTH: usize = 18;

    fn parse(record: &[u8]) -> Option<Self> {
        if record.len() < Self::LENGTH {
            return None;
        }
        Some(Self {
            usb_version: LittleEndian::read_u16(&record[2..4]),
            class: record[4],
            subclass: record[5],
            protocol: record[6],
            max_packet_size0: record[7],
            vendor_id: LittleEndian::read_u16(&record[8..10]),
            product_id: LittleEndian::read_u16(&record[10..12]),
            device_version: LittleEndian::read_u16(&record[12..14]),
            num_configurations: record[17],
        })
    }
}

/// Fields of a configuration descriptor header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub attributes: u8,
    pub max_power: u8,
}

impl ConfigurationDescriptor {
    pub const LENGTH: usize = 9;

    fn parse(record: &[u8]) -> Option<Self> {
        if record.len() < Self::LENGTH {
            return None;
        }
        Some(Self {
            total_length: LittleEndian::read_u16(&record[2..4]),
            num_interfaces: record[4],
            configuration_value: record[5],
            attributes: record[7],
            max_power: record[8],
        })
    }
}

/// Fields of an interface descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl InterfaceDescriptor {
    pub const LENGTH: usize = 9;

    fn parse(record: &[u8]) -> Option<Self> {
        if record.len() < Self::LENGTH {
            return None;
        }
        Some(Self {
            number: record[2],
            alternate_setting: record[3],
            num_endpoints: record[4],
            class: record[5],
            subclass: record[6],
            protocol: record[7],
        })
    }
}

/// One record yielded by [`DescriptorReader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    Device(DeviceDescriptor),
    Configuration(ConfigurationDescriptor),
    Interface(InterfaceDescriptor),
    /// Any record classification does not look at (endpoints, strings,
    /// class-specific descriptors, ...)
    Other { descriptor_type: u8, length: u8 },
}

/// Single-pass iterator over the records of a descriptor blob
///
/// The iterator ends at the end of the blob or at the first malformed
/// record, whichever comes first. It is fused: once it returned `None` it
/// keeps doing so. To scan again, open the device again.
#[derive(Debug, Clone)]
pub struct DescriptorReader<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
    stopped_early: bool,
}

impl<'a> DescriptorReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            done: false,
            stopped_early: false,
        }
    }

    /// Byte offset of the next record
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// True if the sequence ended on malformed data rather than at the end
    /// of the blob
    pub fn stopped_early(&self) -> bool {
        self.stopped_early
    }

    fn stop(&mut self, reason: &str) -> Option<Descriptor> {
        warn!(
            "Descriptor stream ends early at offset {} of {}: {}",
            self.pos,
            self.buf.len(),
            reason
        );
        self.done = true;
        self.stopped_early = true;
        None
    }
}

impl Iterator for DescriptorReader<'_> {
    type Item = Descriptor;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let remaining = &self.buf[self.pos..];
        if remaining.is_empty() {
            self.done = true;
            return None;
        }
        if remaining.len() < 2 {
            return self.stop("truncated record header");
        }

        let length = remaining[0] as usize;
        if length < 2 {
            return self.stop("record length below header size");
        }
        if length > remaining.len() {
            return self.stop("record runs past end of data");
        }

        let record = &remaining[..length];
        let descriptor_type = record[1];

        let parsed = match DescriptorType::try_from(descriptor_type) {
            Ok(DescriptorType::Device) => DeviceDescriptor::parse(record).map(Descriptor::Device),
            Ok(DescriptorType::Configuration) => {
                ConfigurationDescriptor::parse(record).map(Descriptor::Configuration)
            }
            Ok(DescriptorType::Interface) => {
                InterfaceDescriptor::parse(record).map(Descriptor::Interface)
            }
            _ => Some(Descriptor::Other {
                descriptor_type,
                length: record[0],
            }),
        };

        match parsed {
            Some(descriptor) => {
                self.pos += length;
                Some(descriptor)
            }
            None => self.stop("record shorter than its type requires"),
        }
    }
}

impl FusedIterator for DescriptorReader<'_> {}
