//! Common utilities for usb-dispatch
//!
//! This crate provides what the host crate and its tests share: error
//! handling, logging setup, the channel bridge between the enumeration
//! thread and the dispatch thread, and test fixtures.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{
    BindingInfo, DispatchBridge, DispatchCommand, DispatchWorker, WatcherEvent,
    create_dispatch_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
