//! Driver registry
//!
//! Three independent tables map a classification key to the factory of the
//! driver that handles it:
//! - product table: (vendor, product)
//! - device class table: (class, subclass, protocol) of the device descriptor
//! - interface class table: (class, subclass, protocol) of an interface
//!
//! Each table sits behind its own `RwLock`, held only for the map access.
//! Lookups hand out a clone of the factory's `Arc`, so driver construction
//! never runs under a registry lock. Registration is last-write-wins.

use crate::usb::factory::DriverFactory;
use descriptor::{ClassificationKey, DeviceClassKey, InterfaceClassKey, ProductKey, TableKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Shared registry handle, built once at bootstrap
pub type RegistryHandle = Arc<DriverRegistry>;

/// Witness returned by every registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    pub table: TableKind,
    pub key: ClassificationKey,
    /// Name of the registered driver
    pub driver: String,
    /// Name of the driver previously bound to the same key, if any
    pub replaced: Option<String>,
}

/// One row of a table snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    pub key: ClassificationKey,
    pub driver: String,
}

struct Table<K> {
    entries: RwLock<BTreeMap<K, Arc<dyn DriverFactory>>>,
}

impl<K> Table<K>
where
    K: Ord + Copy + Into<ClassificationKey>,
{
    fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn insert(&self, key: K, factory: Arc<dyn DriverFactory>) -> Option<Arc<dyn DriverFactory>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, factory)
    }

    fn get(&self, key: &K) -> Option<Arc<dyn DriverFactory>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn snapshot(&self) -> Vec<(K, Arc<dyn DriverFactory>)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, factory)| (*key, Arc::clone(factory)))
            .collect()
    }
}

/// The three driver tables
pub struct DriverRegistry {
    products: Table<ProductKey>,
    device_classes: Table<DeviceClassKey>,
    interface_classes: Table<InterfaceClassKey>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            products: Table::new(),
            device_classes: Table::new(),
            interface_classes: Table::new(),
        }
    }

    /// Bind `factory` to `key`, replacing any earlier binding
    pub fn register(&self, key: ClassificationKey, factory: Arc<dyn DriverFactory>) -> Registered {
        let driver = factory.name();

        let previous = match key {
            ClassificationKey::Product(k) => self.products.insert(k, factory),
            ClassificationKey::DeviceClass(k) => self.device_classes.insert(k, factory),
            ClassificationKey::InterfaceClass(k) => self.interface_classes.insert(k, factory),
        };
        let replaced = previous.map(|old| old.name());

        match &replaced {
            Some(old) => warn!("Driver {} replaces {} for {}", driver, old, key),
            None => info!("Registered driver {} for {}", driver, key),
        }

        Registered {
            table: key.table(),
            key,
            driver,
            replaced,
        }
    }

    pub fn register_product(
        &self,
        factory: Arc<dyn DriverFactory>,
        vendor_id: u16,
        product_id: u16,
    ) -> Registered {
        self.register(ProductKey::new(vendor_id, product_id).into(), factory)
    }

    pub fn register_device_class(
        &self,
        factory: Arc<dyn DriverFactory>,
        class: u8,
        subclass: u8,
        protocol: u8,
    ) -> Registered {
        self.register(DeviceClassKey::new(class, subclass, protocol).into(), factory)
    }

    pub fn register_interface_class(
        &self,
        factory: Arc<dyn DriverFactory>,
        class: u8,
        subclass: u8,
        protocol: u8,
    ) -> Registered {
        self.register(
            InterfaceClassKey::new(class, subclass, protocol).into(),
            factory,
        )
    }

    /// Factory bound to `key`, if any
    pub fn lookup(&self, key: &ClassificationKey) -> Option<Arc<dyn DriverFactory>> {
        match key {
            ClassificationKey::Product(k) => self.lookup_product(k),
            ClassificationKey::DeviceClass(k) => self.lookup_device_class(k),
            ClassificationKey::InterfaceClass(k) => self.lookup_interface_class(k),
        }
    }

    pub fn lookup_product(&self, key: &ProductKey) -> Option<Arc<dyn DriverFactory>> {
        self.products.get(key)
    }

    pub fn lookup_device_class(&self, key: &DeviceClassKey) -> Option<Arc<dyn DriverFactory>> {
        self.device_classes.get(key)
    }

    pub fn lookup_interface_class(
        &self,
        key: &InterfaceClassKey,
    ) -> Option<Arc<dyn DriverFactory>> {
        self.interface_classes.get(key)
    }

    /// Number of bindings in one table
    pub fn table_len(&self, table: TableKind) -> usize {
        match table {
            TableKind::Product => self.products.len(),
            TableKind::DeviceClass => self.device_classes.len(),
            TableKind::InterfaceClass => self.interface_classes.len(),
        }
    }

    /// Number of bindings across all tables
    pub fn len(&self) -> usize {
        self.products.len() + self.device_classes.len() + self.interface_classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every binding, product table first, each table in key order
    pub fn bindings(&self) -> Vec<RegistryEntry> {
        fn rows<K: Into<ClassificationKey>>(
            snapshot: Vec<(K, Arc<dyn DriverFactory>)>,
        ) -> impl Iterator<Item = RegistryEntry> {
            snapshot.into_iter().map(|(key, factory)| RegistryEntry {
                key: key.into(),
                driver: factory.name(),
            })
        }

        rows(self.products.snapshot())
            .chain(rows(self.device_classes.snapshot()))
            .chain(rows(self.interface_classes.snapshot()))
            .collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
