//! Channel bridge between the enumeration thread and the dispatch thread
//!
//! The enumeration engine calls back on its own thread; those callbacks only
//! translate into [`WatcherEvent`]s pushed onto this channel. The dispatch
//! thread owns all classification and driver state, so nothing behind the
//! callbacks needs a lock.

use async_channel::{Receiver, Sender, bounded};
use descriptor::{ClassificationKey, DeviceReference};
use serde::Serialize;

/// Capacity of the dispatch command channel
pub const DISPATCH_CHANNEL_CAPACITY: usize = 256;

/// Events reported by the enumeration engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// Device appeared on the bus
    DeviceAdded(DeviceReference),
    /// Device disappeared from the bus
    DeviceRemoved(DeviceReference),
    /// One full discovery pass finished
    DiscoveryDone,
}

/// A driver currently bound to a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingInfo {
    /// Device the driver owns
    pub device: DeviceReference,
    /// Factory name of the driver
    pub driver: String,
    /// Key the device matched
    pub key: ClassificationKey,
}

/// Commands consumed by the dispatch thread
#[derive(Debug)]
pub enum DispatchCommand {
    /// Forwarded engine event
    Event(WatcherEvent),

    /// Snapshot of current device/driver bindings
    ListBindings {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<Vec<BindingInfo>>,
    },

    /// Release every driver and exit the dispatch loop
    Shutdown,
}

/// Sending side, held by the engine adapter and the watcher handle
#[derive(Clone)]
pub struct DispatchBridge {
    cmd_tx: Sender<DispatchCommand>,
}

impl DispatchBridge {
    /// Send a command from an async context
    pub async fn send_command(&self, cmd: DispatchCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command from a blocking thread (the enumeration thread)
    pub fn send_blocking(&self, cmd: DispatchCommand) -> crate::Result<()> {
        self.cmd_tx
            .send_blocking(cmd)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Forward an engine event (blocking)
    pub fn forward_event(&self, event: WatcherEvent) -> crate::Result<()> {
        self.send_blocking(DispatchCommand::Event(event))
    }

    /// Ask the dispatch thread for its current bindings
    pub async fn list_bindings(&self) -> crate::Result<Vec<BindingInfo>> {
        let (response, rx) = tokio::sync::oneshot::channel();
        self.send_command(DispatchCommand::ListBindings { response })
            .await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// True once the dispatch thread dropped its receiver
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Receiving side, owned by the dispatch thread
pub struct DispatchWorker {
    cmd_rx: Receiver<DispatchCommand>,
}

impl DispatchWorker {
    /// Receive a command (blocking)
    pub fn recv_command(&self) -> crate::Result<DispatchCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<DispatchCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Number of commands waiting
    pub fn pending(&self) -> usize {
        self.cmd_rx.len()
    }
}

/// Create the channel bridge between the enumeration and dispatch threads
///
/// Returns (DispatchBridge for senders, DispatchWorker for the dispatch thread)
pub fn create_dispatch_bridge() -> (DispatchBridge, DispatchWorker) {
    let (cmd_tx, cmd_rx) = bounded(DISPATCH_CHANNEL_CAPACITY);
    (DispatchBridge { cmd_tx }, DispatchWorker { cmd_rx })
}
