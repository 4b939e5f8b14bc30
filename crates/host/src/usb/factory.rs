//! Driver and driver factory capabilities
//!
//! A driver plugin provides a [`DriverFactory`]; the dispatcher asks the
//! factory whether it supports a device and, if so, lets it construct a
//! [`Driver`] bound to that device. Drivers whose construction needs no
//! state beyond the device reference implement [`ProbeDriver`] and use
//! [`DefaultFactory`].

use crate::usb::error::DriverError;
use descriptor::DeviceReference;
use std::fmt;
use std::marker::PhantomData;

/// A driver instance bound to one device
///
/// The driver owns the device for as long as it lives; dropping it releases
/// the device.
pub trait Driver: Send {
    /// Name of the driver implementation
    fn name(&self) -> &str;

    /// Device this instance is bound to
    fn device(&self) -> &DeviceReference;
}

/// Constructs drivers for matching devices
pub trait DriverFactory: Send + Sync {
    /// Human-readable driver name
    fn name(&self) -> String;

    /// Whether this driver can handle `device`
    fn is_supported(&self, device: &DeviceReference) -> bool;

    /// Bind a new driver instance to `device`
    fn create(&self, device: &DeviceReference) -> Result<Box<dyn Driver>, DriverError>;
}

impl fmt::Debug for dyn DriverFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverFactory")
            .field("name", &self.name())
            .finish()
    }
}

impl fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.name())
            .field("device", self.device())
            .finish()
    }
}

/// A driver that can be probed from the device reference alone
pub trait ProbeDriver: Driver + Sized + 'static {
    const NAME: &'static str;

    /// Applicability check; accepts every device unless overridden
    fn supports(_device: &DeviceReference) -> bool {
        true
    }

    fn probe(device: &DeviceReference) -> Result<Self, DriverError>;
}

/// Factory for a [`ProbeDriver`]
pub struct DefaultFactory<D> {
    _driver: PhantomData<fn() -> D>,
}

impl<D: ProbeDriver> DefaultFactory<D> {
    pub fn new() -> Self {
        Self {
            _driver: PhantomData,
        }
    }
}

impl<D: ProbeDriver> Default for DefaultFactory<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ProbeDriver> DriverFactory for DefaultFactory<D> {
    fn name(&self) -> String {
        D::NAME.to_string()
    }

    fn is_supported(&self, device: &DeviceReference) -> bool {
        D::supports(device)
    }

    fn create(&self, device: &DeviceReference) -> Result<Box<dyn Driver>, DriverError> {
        Ok(Box::new(D::probe(device)?))
    }
}
