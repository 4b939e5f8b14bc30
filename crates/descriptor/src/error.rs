//! Descriptor error types

use crate::types::DeviceReference;
use thiserror::Error;

/// Errors raised while opening a device for descriptor reading
///
/// Parsing itself never fails: malformed data simply ends the record
/// sequence (see [`crate::DescriptorReader`]).
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The device node does not exist (usually unplugged mid-probe)
    #[error("Device not found: {0}")]
    NotFound(DeviceReference),

    /// Opening or reading the device node failed
    #[error("Failed to open device {device}: {source}")]
    Open {
        device: DeviceReference,
        #[source]
        source: std::io::Error,
    },

    /// The device reference cannot be mapped onto this source
    #[error("Invalid device reference: {0}")]
    InvalidReference(String),
}

/// Type alias for descriptor results
pub type Result<T> = std::result::Result<T, DescriptorError>;
