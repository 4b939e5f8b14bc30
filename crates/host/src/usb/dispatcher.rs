//! Device classification and driver dispatch
//!
//! For an added device the dispatcher walks the raw descriptors once,
//! collects every classification key they yield, closes the device and only
//! then consults the registry. Every match is attempted; a device may end
//! up with a product driver, a device class driver and one driver per
//! interface at the same time.

use crate::usb::factory::{Driver, DriverFactory};
use crate::usb::registry::RegistryHandle;
use descriptor::{
    ClassificationKey, Descriptor, DescriptorSource, DeviceClassKey, DeviceReference,
    InterfaceClassKey, ProductKey,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Dispatch policy toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchPolicy {
    /// Ask `is_supported` before calling `create`
    pub check_supported: bool,
    /// Drop a device's drivers when the device is removed
    pub release_on_remove: bool,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            check_supported: true,
            release_on_remove: true,
        }
    }
}

/// Keys extracted from one device's descriptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub device: DeviceReference,
    /// Keys in descriptor order
    pub keys: Vec<ClassificationKey>,
    /// False when the descriptor walk stopped on malformed data
    pub complete: bool,
}

impl Classification {
    fn empty(device: &DeviceReference) -> Self {
        Self {
            device: device.clone(),
            keys: Vec::new(),
            complete: false,
        }
    }
}

/// A driver instance together with the match that produced it
#[derive(Debug)]
pub struct BoundDriver {
    pub key: ClassificationKey,
    pub factory: String,
    pub driver: Box<dyn Driver>,
}

/// A construction attempt that did not produce a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub key: ClassificationKey,
    pub factory: String,
    pub reason: String,
}

/// Outcome of one `try_driver` call
#[derive(Debug)]
pub enum Attempt {
    Bound(Box<dyn Driver>),
    Unsupported,
    Failed(String),
}

/// Result of dispatching one device
///
/// Owns the drivers that were bound; dropping the report releases them.
#[derive(Debug)]
pub struct DispatchReport {
    pub device: DeviceReference,
    pub keys: Vec<ClassificationKey>,
    /// Keys that had a registered factory
    pub matched: usize,
    /// Calls made to `create`
    pub attempts: usize,
    /// Factories that declined the device
    pub unsupported: Vec<String>,
    pub failures: Vec<DispatchFailure>,
    pub bound: Vec<BoundDriver>,
}

impl DispatchReport {
    fn new(classification: Classification) -> Self {
        Self {
            device: classification.device,
            keys: classification.keys,
            matched: 0,
            attempts: 0,
            unsupported: Vec::new(),
            failures: Vec::new(),
            bound: Vec::new(),
        }
    }
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} keys, {} matched, {} bound, {} unsupported, {} failed",
            self.device,
            self.keys.len(),
            self.matched,
            self.bound.len(),
            self.unsupported.len(),
            self.failures.len()
        )
    }
}

/// Classifies devices and binds drivers to them
pub struct Dispatcher {
    registry: RegistryHandle,
    source: Arc<dyn DescriptorSource>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        registry: RegistryHandle,
        source: Arc<dyn DescriptorSource>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            registry,
            source,
            policy,
        }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Read the device's descriptors and collect its classification keys
    ///
    /// The device handle is closed before this returns.
    pub fn classify(&self, device: &DeviceReference) -> descriptor::Result<Classification> {
        let handle = self.source.open(device)?;
        let mut reader = handle.descriptors();
        let mut keys: Vec<ClassificationKey> = Vec::new();

        for record in reader.by_ref() {
            match record {
                Descriptor::Device(desc) => {
                    keys.push(ProductKey::new(desc.vendor_id, desc.product_id).into());
                    keys.push(
                        DeviceClassKey::new(desc.class, desc.subclass, desc.protocol).into(),
                    );
                }
                Descriptor::Interface(desc) => {
                    keys.push(
                        InterfaceClassKey::new(desc.class, desc.subclass, desc.protocol).into(),
                    );
                }
                Descriptor::Configuration(_) | Descriptor::Other { .. } => {}
            }
        }

        let complete = !reader.stopped_early();
        drop(handle);

        Ok(Classification {
            device: device.clone(),
            keys,
            complete,
        })
    }

    /// Registered factories for each key, in key order
    pub fn matches(
        &self,
        keys: &[ClassificationKey],
    ) -> Vec<(ClassificationKey, Arc<dyn DriverFactory>)> {
        keys.iter()
            .filter_map(|key| match self.registry.lookup(key) {
                Some(factory) => Some((*key, factory)),
                None => {
                    debug!("No driver registered for {}", key);
                    None
                }
            })
            .collect()
    }

    /// Classify `device` and attempt construction for every matching factory
    pub fn find_driver(&self, device: &DeviceReference) -> DispatchReport {
        let classification = match self.classify(device) {
            Ok(classification) => classification,
            Err(e) => {
                warn!("Failed to read descriptors of {}: {}", device, e);
                return DispatchReport::new(Classification::empty(device));
            }
        };

        if !classification.complete {
            warn!(
                "Descriptors of {} are malformed, classifying with {} keys",
                device,
                classification.keys.len()
            );
        }

        let candidates = self.matches(&classification.keys);
        let mut report = DispatchReport::new(classification);
        report.matched = candidates.len();

        for (key, factory) in candidates {
            let name = factory.name();
            match self.try_driver(device, &key, factory.as_ref()) {
                Attempt::Bound(driver) => {
                    report.attempts += 1;
                    report.bound.push(BoundDriver {
                        key,
                        factory: name,
                        driver,
                    });
                }
                Attempt::Unsupported => report.unsupported.push(name),
                Attempt::Failed(reason) => {
                    report.attempts += 1;
                    report.failures.push(DispatchFailure {
                        key,
                        factory: name,
                        reason,
                    });
                }
            }
        }

        debug!("Dispatched {}", report);
        report
    }

    /// Attempt to bind one factory's driver to `device`
    ///
    /// Construction errors and panics are contained here.
    pub fn try_driver(
        &self,
        device: &DeviceReference,
        key: &ClassificationKey,
        factory: &dyn DriverFactory,
    ) -> Attempt {
        let name = factory.name();
        info!("Trying driver {} for {} ({})", name, device, key);

        if self.policy.check_supported && !factory.is_supported(device) {
            debug!("Driver {} does not support {}", name, device);
            return Attempt::Unsupported;
        }

        match catch_unwind(AssertUnwindSafe(|| factory.create(device))) {
            Ok(Ok(driver)) => {
                info!("Driver {} bound to {}", name, device);
                Attempt::Bound(driver)
            }
            Ok(Err(e)) => {
                warn!("Driver {} failed to bind {}: {}", name, device, e);
                Attempt::Failed(e.to_string())
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!("Panic in driver {} while binding {}: {}", name, device, reason);
                Attempt::Failed(format!("panicked: {}", reason))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::registry::DriverRegistry;
    use common::test_utils::{MockDescriptorSource, create_mock_device_blob, mock_device};

    #[test]
    fn test_policy_defaults() {
        let policy = DispatchPolicy::default();
        assert!(policy.check_supported);
        assert!(policy.release_on_remove);

        let policy: DispatchPolicy = toml::from_str("release_on_remove = false").unwrap();
        assert!(policy.check_supported);
        assert!(!policy.release_on_remove);
    }

    #[test]
    fn test_classify_composite_device() {
        let source = MockDescriptorSource::new();
        source.insert(
            mock_device(2),
            create_mock_device_blob(0x2341, 0x0043, (0xef, 0x02, 0x01), &[(2, 2, 1), (0x0a, 0, 0)]),
        );
        let dispatcher = Dispatcher::new(
            Arc::new(DriverRegistry::new()),
            Arc::new(source.clone()),
            DispatchPolicy::default(),
        );

        let classification = dispatcher.classify(&mock_device(2)).unwrap();
        assert!(classification.complete);
        assert_eq!(
            classification.keys,
            vec![
                ClassificationKey::from(ProductKey::new(0x2341, 0x0043)),
                ClassificationKey::from(DeviceClassKey::new(0xef, 0x02, 0x01)),
                ClassificationKey::from(InterfaceClassKey::new(2, 2, 1)),
                ClassificationKey::from(InterfaceClassKey::new(0x0a, 0, 0)),
            ]
        );
        assert_eq!(source.close_count(), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
