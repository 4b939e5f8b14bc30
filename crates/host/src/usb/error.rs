//! Error types of the dispatch core

use descriptor::DeviceReference;
use thiserror::Error;

/// Errors a driver factory may report from `create`
///
/// These never leave the dispatch thread: the dispatcher logs them and moves
/// on to the next candidate.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Device disappeared while the driver was probing it
    #[error("Device gone: {0}")]
    DeviceGone(DeviceReference),

    /// Device is held by someone else
    #[error("Device busy: {0}")]
    Busy(DeviceReference),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors of the enumeration engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be brought up; fatal at startup
    #[error("Failed to initialize USB context: {0}")]
    Init(#[source] rusb::Error),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Enumeration engine error: {0}")]
    Other(String),
}

/// Errors reported when starting or stopping the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Enumeration engine failed: {0}")]
    Engine(#[from] EngineError),

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}
