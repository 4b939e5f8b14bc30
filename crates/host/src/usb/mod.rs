//! USB dispatch core
//!
//! - Driver registry keyed by product and class codes
//! - Device classification from raw descriptors and driver construction
//! - Enumeration engine abstraction with a libusb implementation
//! - Device watcher running the engine and the dispatch loop on dedicated
//!   threads

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod factory;
pub mod registry;
pub mod watcher;

pub use dispatcher::{
    Attempt, BoundDriver, Classification, DispatchFailure, DispatchPolicy, DispatchReport,
    Dispatcher,
};
pub use engine::{
    DeviceTracker, EngineCallbacks, EngineSettings, EnumerationEngine, RusbEngine, diff_devices,
};
pub use error::{DriverError, EngineError, WatcherError};
pub use factory::{DefaultFactory, Driver, DriverFactory, ProbeDriver};
pub use registry::{DriverRegistry, Registered, RegistryEntry, RegistryHandle};
pub use watcher::{DeviceWatcher, WatcherHandle, WatcherState};
