//! usb-dispatch host
//!
//! Watches the USB bus, classifies every attached device by product and
//! class codes and binds the drivers registered for them.
//!
//! Bootstrap order:
//! 1. [`drivers::build_registry`] from the driver catalog and configuration
//! 2. [`usb::RusbEngine::init`] (fatal on failure)
//! 3. [`usb::Dispatcher`] over the registry and a descriptor source
//! 4. [`usb::DeviceWatcher::start`], keeping the returned handle until exit

pub mod config;
pub mod drivers;
pub mod listing;
pub mod service;
pub mod usb;
