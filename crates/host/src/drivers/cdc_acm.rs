//! CDC-ACM driver
//!
//! Claims the communications interface of USB serial modems. Only binding
//! is modelled here; the driver holds the device until it is dropped.

use crate::drivers::DriverEntry;
use crate::usb::{DefaultFactory, Driver, DriverError, DriverFactory, ProbeDriver};
use descriptor::class_codes::{CDC, CDC_PROTOCOL_AT, CDC_PROTOCOL_NONE, CDC_SUBCLASS_ACM};
use descriptor::{ClassificationKey, DeviceReference, InterfaceClassKey};
use std::sync::Arc;
use tracing::info;

pub const ENTRY: DriverEntry = DriverEntry {
    name: <CdcAcm as ProbeDriver>::NAME,
    description: "USB CDC abstract control model (serial modems)",
    build: factory,
    default_bindings: &[
        ClassificationKey::InterfaceClass(InterfaceClassKey::new(
            CDC,
            CDC_SUBCLASS_ACM,
            CDC_PROTOCOL_NONE,
        )),
        ClassificationKey::InterfaceClass(InterfaceClassKey::new(
            CDC,
            CDC_SUBCLASS_ACM,
            CDC_PROTOCOL_AT,
        )),
    ],
};

fn factory() -> Arc<dyn DriverFactory> {
    Arc::new(DefaultFactory::<CdcAcm>::new())
}

pub struct CdcAcm {
    device: DeviceReference,
}

impl Driver for CdcAcm {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn device(&self) -> &DeviceReference {
        &self.device
    }
}

impl ProbeDriver for CdcAcm {
    const NAME: &'static str = "cdc-acm";

    // Only usbfs nodes can be claimed
    fn supports(device: &DeviceReference) -> bool {
        device.bus_address().is_some()
    }

    fn probe(device: &DeviceReference) -> Result<Self, DriverError> {
        info!("cdc-acm: claimed {}", device);
        Ok(Self {
            device: device.clone(),
        })
    }
}

impl Drop for CdcAcm {
    fn drop(&mut self) {
        info!("cdc-acm: released {}", self.device);
    }
}
