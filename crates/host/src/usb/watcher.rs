//! Device watcher
//!
//! Runs the enumeration engine on the `usb-enumeration` thread and all
//! classification and driver construction on the `usb-dispatch` thread.
//! Engine callbacks only translate into [`WatcherEvent`]s sent over the
//! dispatch bridge; the dispatch thread exclusively owns the drivers.
//!
//! Lifecycle: `Created` → `Running` → `StopRequested` → `Stopped`.
//! Cancellation is cooperative: `request_stop` sets a flag that the engine
//! observes at its next callback or idle checkpoint.

use crate::usb::dispatcher::{BoundDriver, Dispatcher};
use crate::usb::engine::{EngineCallbacks, EnumerationEngine};
use crate::usb::error::WatcherError;
use common::{
    BindingInfo, DispatchBridge, DispatchCommand, DispatchWorker, WatcherEvent,
    create_dispatch_bridge,
};
use descriptor::DeviceReference;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const ENGINE_THREAD: &str = "usb-enumeration";
const DISPATCH_THREAD: &str = "usb-dispatch";

/// Watcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Created,
    Running,
    StopRequested,
    Stopped,
}

struct WatcherShared {
    stop: AtomicBool,
    state: Mutex<WatcherState>,
}

impl WatcherShared {
    fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            state: Mutex::new(WatcherState::Created),
        }
    }

    fn state(&self) -> WatcherState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WatcherState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == WatcherState::Running {
            *state = WatcherState::StopRequested;
        }
    }
}

/// A watcher that has not been started yet
pub struct DeviceWatcher<E> {
    engine: E,
    dispatcher: Dispatcher,
    shared: Arc<WatcherShared>,
}

impl<E: EnumerationEngine> DeviceWatcher<E> {
    pub fn new(engine: E, dispatcher: Dispatcher) -> Self {
        Self {
            engine,
            dispatcher,
            shared: Arc::new(WatcherShared::new()),
        }
    }

    pub fn state(&self) -> WatcherState {
        self.shared.state()
    }

    /// Spawn the dispatch and enumeration threads
    pub fn start(self) -> Result<WatcherHandle, WatcherError> {
        let (bridge, worker) = create_dispatch_bridge();
        let dispatch = DispatchLoop::new(self.dispatcher, worker);

        let dispatch_thread = thread::Builder::new()
            .name(DISPATCH_THREAD.to_string())
            .spawn(move || dispatch.run())
            .map_err(|source| WatcherError::Spawn {
                name: DISPATCH_THREAD,
                source,
            })?;

        self.shared.set_state(WatcherState::Running);

        let forwarder = EventForwarder {
            bridge: bridge.clone(),
            shared: Arc::clone(&self.shared),
        };
        let engine = self.engine;
        let engine_thread = thread::Builder::new()
            .name(ENGINE_THREAD.to_string())
            .spawn(move || run_engine(engine, forwarder));

        let engine_thread = match engine_thread {
            Ok(handle) => handle,
            Err(source) => {
                self.shared.set_state(WatcherState::Stopped);
                let _ = bridge.send_blocking(DispatchCommand::Shutdown);
                let _ = dispatch_thread.join();
                return Err(WatcherError::Spawn {
                    name: ENGINE_THREAD,
                    source,
                });
            }
        };

        info!("Device watcher started");
        Ok(WatcherHandle {
            shared: self.shared,
            bridge,
            engine_thread: Some(engine_thread),
            dispatch_thread: Some(dispatch_thread),
        })
    }
}

/// Handle to a running watcher
///
/// Dropping the handle stops the watcher.
pub struct WatcherHandle {
    shared: Arc<WatcherShared>,
    bridge: DispatchBridge,
    engine_thread: Option<JoinHandle<Result<(), WatcherError>>>,
    dispatch_thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    pub fn state(&self) -> WatcherState {
        self.shared.state()
    }

    /// Ask the engine to stop; does not wait
    pub fn request_stop(&self) {
        if !self.shared.stop_requested() {
            info!("Device watcher stop requested");
        }
        self.shared.request_stop();
    }

    /// Current device to driver bindings
    pub async fn bindings(&self) -> common::Result<Vec<BindingInfo>> {
        self.bridge.list_bindings().await
    }

    /// Stop the engine, then release every driver and join both threads
    pub fn stop(mut self) -> Result<(), WatcherError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), WatcherError> {
        self.request_stop();
        let mut result = Ok(());

        if let Some(engine) = self.engine_thread.take() {
            result = match engine.join() {
                Ok(result) => result,
                Err(_) => Err(WatcherError::Panicked(ENGINE_THREAD)),
            };
        }

        if let Some(dispatch) = self.dispatch_thread.take() {
            if let Err(e) = self.bridge.send_blocking(DispatchCommand::Shutdown) {
                debug!("Dispatch thread already gone: {}", e);
            }
            if dispatch.join().is_err() && result.is_ok() {
                result = Err(WatcherError::Panicked(DISPATCH_THREAD));
            }
        }

        self.shared.set_state(WatcherState::Stopped);
        result
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        if self.engine_thread.is_none() && self.dispatch_thread.is_none() {
            return;
        }
        if let Err(e) = self.shutdown() {
            error!("Device watcher stopped with error: {}", e);
        }
    }
}

/// Engine-side callback adapter
struct EventForwarder {
    bridge: DispatchBridge,
    shared: Arc<WatcherShared>,
}

impl EventForwarder {
    fn forward(&self, event: WatcherEvent) -> ControlFlow<()> {
        if let Err(e) = self.bridge.forward_event(event) {
            warn!("Dispatch thread is gone, stopping enumeration: {}", e);
            return ControlFlow::Break(());
        }
        self.flag()
    }

    fn flag(&self) -> ControlFlow<()> {
        if self.shared.stop_requested() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

impl EngineCallbacks for EventForwarder {
    fn device_added(&mut self, device: &DeviceReference) -> ControlFlow<()> {
        self.flag()?;
        info!("Device added: {}", device);
        self.forward(WatcherEvent::DeviceAdded(device.clone()))
    }

    fn device_removed(&mut self, device: &DeviceReference) -> ControlFlow<()> {
        self.flag()?;
        info!("Device removed: {}", device);
        self.forward(WatcherEvent::DeviceRemoved(device.clone()))
    }

    fn discovery_done(&mut self) -> ControlFlow<()> {
        self.flag()?;
        debug!("Discovery pass complete");
        self.forward(WatcherEvent::DiscoveryDone)
    }

    fn stop_requested(&self) -> bool {
        self.shared.stop_requested()
    }
}

/// Body of the enumeration thread
///
/// The engine is dropped here, before the state becomes `Stopped`.
fn run_engine<E: EnumerationEngine>(
    mut engine: E,
    mut forwarder: EventForwarder,
) -> Result<(), WatcherError> {
    debug!("Enumeration thread started");

    let result = catch_unwind(AssertUnwindSafe(|| engine.run(&mut forwarder)));
    drop(engine);

    let shared = Arc::clone(&forwarder.shared);
    drop(forwarder);
    shared.set_state(WatcherState::Stopped);

    match result {
        Ok(Ok(())) => {
            debug!("Enumeration thread stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Enumeration engine failed: {}", e);
            Err(e.into())
        }
        Err(_) => {
            error!("Panic in enumeration engine");
            Err(WatcherError::Panicked(ENGINE_THREAD))
        }
    }
}

/// Body of the dispatch thread; owns every bound driver
struct DispatchLoop {
    dispatcher: Dispatcher,
    worker: DispatchWorker,
    devices: BTreeMap<DeviceReference, Vec<BoundDriver>>,
}

impl DispatchLoop {
    fn new(dispatcher: Dispatcher, worker: DispatchWorker) -> Self {
        Self {
            dispatcher,
            worker,
            devices: BTreeMap::new(),
        }
    }

    fn run(mut self) {
        debug!("Dispatch thread started");

        loop {
            match self.worker.recv_command() {
                Ok(DispatchCommand::Shutdown) => break,
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    debug!("Dispatch channel closed: {}", e);
                    break;
                }
            }
        }

        self.release_all();
        debug!("Dispatch thread stopped");
    }

    fn handle_command(&mut self, cmd: DispatchCommand) {
        let result = catch_unwind(AssertUnwindSafe(|| self.handle_command_inner(cmd)));
        if let Err(e) = result {
            error!("Panic in dispatch command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: DispatchCommand) {
        match cmd {
            DispatchCommand::Event(WatcherEvent::DeviceAdded(device)) => self.device_added(device),
            DispatchCommand::Event(WatcherEvent::DeviceRemoved(device)) => {
                self.device_removed(&device)
            }
            DispatchCommand::Event(WatcherEvent::DiscoveryDone) => {
                debug!("{} devices with bound drivers", self.devices.len());
            }
            DispatchCommand::ListBindings { response } => {
                let _ = response.send(self.bindings());
            }
            DispatchCommand::Shutdown => {}
        }
    }

    fn device_added(&mut self, device: DeviceReference) {
        if let Some(stale) = self.devices.remove(&device) {
            warn!(
                "{} re-added while {} drivers are still bound; releasing them",
                device,
                stale.len()
            );
        }

        let report = self.dispatcher.find_driver(&device);
        if report.bound.is_empty() {
            debug!("No driver bound to {}", device);
            return;
        }

        info!("{} drivers bound to {}", report.bound.len(), device);
        self.devices.insert(device, report.bound);
    }

    fn device_removed(&mut self, device: &DeviceReference) {
        if !self.dispatcher.policy().release_on_remove {
            debug!("Keeping drivers of removed device {}", device);
            return;
        }
        if let Some(drivers) = self.devices.remove(device) {
            info!("Releasing {} drivers of {}", drivers.len(), device);
        }
    }

    fn bindings(&self) -> Vec<BindingInfo> {
        self.devices
            .iter()
            .flat_map(|(device, drivers)| {
                drivers.iter().map(move |bound| BindingInfo {
                    device: device.clone(),
                    driver: bound.factory.clone(),
                    key: bound.key,
                })
            })
            .collect()
    }

    fn release_all(&mut self) {
        let count: usize = self.devices.values().map(Vec::len).sum();
        if count > 0 {
            info!("Releasing {} drivers on shutdown", count);
        }
        self.devices.clear();
    }
}
