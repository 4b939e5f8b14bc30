//! Device identity and classification key types
//!
//! A device is matched against the driver tables by one of three keys:
//! its vendor/product pair, the class triple of its device descriptor, or
//! the class triple of one of its interfaces. All fields are the raw codes
//! found in the descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opaque device reference
///
/// Identifies a physical device to the enumeration engine, the descriptor
/// source and the drivers. In practice this is a usbfs node path such as
/// `/dev/bus/usb/001/004`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceReference(String);

impl DeviceReference {
    /// Wrap an arbitrary reference string
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Build the usbfs path for a bus number and device address
    pub fn from_bus_address(bus: u8, address: u8) -> Self {
        Self(format!("/dev/bus/usb/{:03}/{:03}", bus, address))
    }

    /// Recover (bus, address) from a usbfs style reference
    ///
    /// Only the last two path components are inspected, so references
    /// rooted somewhere other than `/dev/bus/usb` still parse.
    pub fn bus_address(&self) -> Option<(u8, u8)> {
        let mut parts = self.0.rsplit('/');
        let address = parts.next()?.parse().ok()?;
        let bus = parts.next()?.parse().ok()?;
        Some((bus, address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceReference {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DeviceReference {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for DeviceReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Vendor/product key (idVendor, idProduct)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductKey {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl ProductKey {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

/// Device class key (bDeviceClass, bDeviceSubClass, bDeviceProtocol)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceClassKey {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl DeviceClassKey {
    pub const fn new(class: u8, subclass: u8, protocol: u8) -> Self {
        Self {
            class,
            subclass,
            protocol,
        }
    }
}

/// Interface class key (bInterfaceClass, bInterfaceSubClass, bInterfaceProtocol)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceClassKey {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl InterfaceClassKey {
    pub const fn new(class: u8, subclass: u8, protocol: u8) -> Self {
        Self {
            class,
            subclass,
            protocol,
        }
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

impl fmt::Display for DeviceClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}/{:02x}/{:02x}",
            self.class, self.subclass, self.protocol
        )
    }
}

impl fmt::Display for InterfaceClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}/{:02x}/{:02x}",
            self.class, self.subclass, self.protocol
        )
    }
}

/// The three driver tables a key can live in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Product,
    DeviceClass,
    InterfaceClass,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableKind::Product => "product",
            TableKind::DeviceClass => "device-class",
            TableKind::InterfaceClass => "interface-class",
        };
        f.write_str(name)
    }
}

/// Any of the three classification keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum ClassificationKey {
    Product(ProductKey),
    DeviceClass(DeviceClassKey),
    InterfaceClass(InterfaceClassKey),
}

impl ClassificationKey {
    /// Table this key is looked up in
    pub fn table(&self) -> TableKind {
        match self {
            ClassificationKey::Product(_) => TableKind::Product,
            ClassificationKey::DeviceClass(_) => TableKind::DeviceClass,
            ClassificationKey::InterfaceClass(_) => TableKind::InterfaceClass,
        }
    }
}

impl fmt::Display for ClassificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationKey::Product(key) => write!(f, "product {}", key),
            ClassificationKey::DeviceClass(key) => write!(f, "device-class {}", key),
            ClassificationKey::InterfaceClass(key) => write!(f, "interface-class {}", key),
        }
    }
}

impl From<ProductKey> for ClassificationKey {
    fn from(key: ProductKey) -> Self {
        ClassificationKey::Product(key)
    }
}

impl From<DeviceClassKey> for ClassificationKey {
    fn from(key: DeviceClassKey) -> Self {
        ClassificationKey::DeviceClass(key)
    }
}

impl From<InterfaceClassKey> for ClassificationKey {
    fn from(key: InterfaceClassKey) -> Self {
        ClassificationKey::InterfaceClass(key)
    }
}

/// Error parsing a key from its textual form
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("Invalid key '{input}', expected {expected}")]
    Format {
        input: String,
        expected: &'static str,
    },

    #[error("Invalid {field} '{value}', must start with '0x' (e.g., '0x1234')")]
    MissingPrefix { field: &'static str, value: String },

    #[error("Invalid {field} '{value}', hex part must be 1-{max_digits} digits")]
    Width {
        field: &'static str,
        value: String,
        max_digits: usize,
    },

    #[error("Invalid {field} '{value}', not a valid hex number")]
    NotHex { field: &'static str, value: String },
}

fn parse_hex_u16(value: &str, field: &'static str) -> Result<u16, KeyParseError> {
    let digits = hex_digits(value, field, 4)?;
    u16::from_str_radix(digits, 16).map_err(|_| KeyParseError::NotHex {
        field,
        value: value.to_string(),
    })
}

fn parse_hex_u8(value: &str, field: &'static str) -> Result<u8, KeyParseError> {
    let digits = hex_digits(value, field, 2)?;
    u8::from_str_radix(digits, 16).map_err(|_| KeyParseError::NotHex {
        field,
        value: value.to_string(),
    })
}

fn hex_digits<'a>(
    value: &'a str,
    field: &'static str,
    max_digits: usize,
) -> Result<&'a str, KeyParseError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| KeyParseError::MissingPrefix {
            field,
            value: value.to_string(),
        })?;

    if digits.is_empty() || digits.len() > max_digits {
        return Err(KeyParseError::Width {
            field,
            value: value.to_string(),
            max_digits,
        });
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(KeyParseError::NotHex {
            field,
            value: value.to_string(),
        });
    }
    Ok(digits)
}

fn split_triple(s: &str) -> Result<[&str; 3], KeyParseError> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    match parts.as_slice() {
        [class, subclass, protocol] => Ok([class, subclass, protocol]),
        _ => Err(KeyParseError::Format {
            input: s.to_string(),
            expected: "CLASS:SUBCLASS:PROTOCOL (e.g., '0x02:0x02:0x01')",
        }),
    }
}

impl FromStr for ProductKey {
    type Err = KeyParseError;

    /// Parse `0xVID:0xPID`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        match parts.as_slice() {
            [vid, pid] => Ok(ProductKey::new(
                parse_hex_u16(vid, "VID")?,
                parse_hex_u16(pid, "PID")?,
            )),
            _ => Err(KeyParseError::Format {
                input: s.to_string(),
                expected: "VID:PID (e.g., '0x1234:0x5678')",
            }),
        }
    }
}

impl FromStr for DeviceClassKey {
    type Err = KeyParseError;

    /// Parse `0xCC:0xSS:0xPP`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [class, subclass, protocol] = split_triple(s)?;
        Ok(DeviceClassKey::new(
            parse_hex_u8(class, "class")?,
            parse_hex_u8(subclass, "subclass")?,
            parse_hex_u8(protocol, "protocol")?,
        ))
    }
}

impl FromStr for InterfaceClassKey {
    type Err = KeyParseError;

    /// Parse `0xCC:0xSS:0xPP`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let DeviceClassKey {
            class,
            subclass,
            protocol,
        } = s.parse()?;
        Ok(InterfaceClassKey::new(class, subclass, protocol))
    }
}

/// Well-known USB class codes (usb.org "Defined Class Codes")
pub mod class_codes {
    /// Class is defined per interface
    pub const PER_INTERFACE: u8 = 0x00;
    pub const AUDIO: u8 = 0x01;
    /// Communications and CDC control
    pub const CDC: u8 = 0x02;
    pub const HID: u8 = 0x03;
    pub const MASS_STORAGE: u8 = 0x08;
    pub const HUB: u8 = 0x09;
    pub const CDC_DATA: u8 = 0x0A;
    pub const VENDOR_SPECIFIC: u8 = 0xFF;

    /// CDC subclass: Abstract Control Model
    pub const CDC_SUBCLASS_ACM: u8 = 0x02;
    /// CDC protocol: none
    pub const CDC_PROTOCOL_NONE: u8 = 0x00;
    /// CDC protocol: AT commands (ITU-T V.250)
    pub const CDC_PROTOCOL_AT: u8 = 0x01;

    /// Vendor ID of the Linux Foundation (root hubs)
    pub const LINUX_FOUNDATION_VID: u16 = 0x1d6b;
}
