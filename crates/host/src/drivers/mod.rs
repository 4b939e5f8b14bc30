//! Compiled-in driver catalog
//!
//! Every driver the host ships is listed in [`BUILTIN_DRIVERS`]. Bootstrap
//! builds one factory per enabled driver, registers its default bindings and
//! then the extra bindings from configuration.

pub mod cdc_acm;

use crate::config::DriverSettings;
use crate::usb::{DriverFactory, DriverRegistry};
use anyhow::{Result, anyhow};
use descriptor::ClassificationKey;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One entry of the driver catalog
pub struct DriverEntry {
    pub name: &'static str,
    pub description: &'static str,
    /// Builds the driver's factory
    pub build: fn() -> Arc<dyn DriverFactory>,
    /// Keys the driver is bound to unless configuration says otherwise
    pub default_bindings: &'static [ClassificationKey],
}

pub const BUILTIN_DRIVERS: &[DriverEntry] = &[cdc_acm::ENTRY];

pub fn find_driver_entry(name: &str) -> Option<&'static DriverEntry> {
    BUILTIN_DRIVERS.iter().find(|entry| entry.name == name)
}

/// Names of all compiled-in drivers
pub fn builtin_driver_names() -> Vec<String> {
    BUILTIN_DRIVERS
        .iter()
        .map(|entry| entry.name.to_string())
        .collect()
}

/// Build the registry from the catalog and the driver settings
pub fn build_registry(settings: &DriverSettings) -> Result<DriverRegistry> {
    let registry = DriverRegistry::new();
    let mut factories: BTreeMap<&str, Arc<dyn DriverFactory>> = BTreeMap::new();

    for name in &settings.enabled {
        let entry = find_driver_entry(name).ok_or_else(|| anyhow!("Unknown driver '{}'", name))?;
        if factories.contains_key(entry.name) {
            continue;
        }

        let factory = (entry.build)();
        for key in entry.default_bindings {
            registry.register(*key, Arc::clone(&factory));
        }
        debug!("Enabled driver {}: {}", entry.name, entry.description);
        factories.insert(entry.name, factory);
    }

    for binding in &settings.bindings {
        let key = binding.key()?;
        let factory = factories.get(binding.driver.as_str()).ok_or_else(|| {
            anyhow!(
                "Binding {} refers to driver '{}', which is not enabled",
                key,
                binding.driver
            )
        })?;
        registry.register(key, Arc::clone(factory));
    }

    info!(
        "Driver registry ready: {} drivers, {} bindings",
        factories.len(),
        registry.len()
    );
    Ok(registry)
}
