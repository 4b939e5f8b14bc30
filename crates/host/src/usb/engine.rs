//! Enumeration engine
//!
//! The engine performs bus enumeration and hot-plug detection and reports
//! what it finds through [`EngineCallbacks`]. `run` blocks for as long as the
//! engine is active; it returns once a callback answers
//! `ControlFlow::Break` or `stop_requested()` holds at an idle checkpoint.
//! Initialization happens in the engine's constructor and cleanup in its
//! `Drop`.
//!
//! [`RusbEngine`] is the libusb-backed engine. With hot-plug support it
//! registers a `rusb` hotplug callback and services libusb events with a
//! bounded timeout; otherwise it rescans the bus every poll interval and
//! diffs the result against the devices it already reported.

use crate::usb::error::EngineError;
use descriptor::DeviceReference;
use descriptor::class_codes::{HUB, LINUX_FOUNDATION_VID};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Hooks the engine invokes while running
pub trait EngineCallbacks {
    fn device_added(&mut self, device: &DeviceReference) -> ControlFlow<()>;

    fn device_removed(&mut self, device: &DeviceReference) -> ControlFlow<()>;

    /// A discovery pass over the bus has completed
    fn discovery_done(&mut self) -> ControlFlow<()>;

    /// Checked by the engine whenever it is idle
    fn stop_requested(&self) -> bool;
}

/// A source of device add/remove events
pub trait EnumerationEngine: Send + 'static {
    fn run(&mut self, callbacks: &mut dyn EngineCallbacks) -> Result<(), EngineError>;
}

/// Settings for [`RusbEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Use libusb hot-plug notifications when the platform supports them
    pub hotplug: bool,
    /// Upper bound on every idle wait
    pub poll_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hotplug: true,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Devices that appeared and disappeared between two scans
pub fn diff_devices(
    known: &BTreeSet<DeviceReference>,
    current: &BTreeSet<DeviceReference>,
) -> (Vec<DeviceReference>, Vec<DeviceReference>) {
    let added = current.difference(known).cloned().collect();
    let removed = known.difference(current).cloned().collect();
    (added, removed)
}

/// Root hubs are part of the host controller, not something to dispatch
fn is_root_hub<T: UsbContext>(device: &Device<T>) -> bool {
    match device.device_descriptor() {
        Ok(desc) => desc.vendor_id() == LINUX_FOUNDATION_VID && desc.class_code() == HUB,
        Err(e) => {
            debug!(
                "Failed to read device descriptor (bus={}, addr={}): {}",
                device.bus_number(),
                device.address(),
                e
            );
            false
        }
    }
}

fn reference<T: UsbContext>(device: &Device<T>) -> DeviceReference {
    DeviceReference::from_bus_address(device.bus_number(), device.address())
}

#[derive(Debug)]
enum HotplugEvent {
    Arrived(DeviceReference),
    Left(DeviceReference),
}

/// Queues hot-plug notifications for the engine loop
///
/// libusb invokes the callback from inside `handle_events`, so the event is
/// only recorded here and reported once `handle_events` has returned.
struct HotplugForwarder {
    events: async_channel::Sender<HotplugEvent>,
}

impl<T: UsbContext> Hotplug<T> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<T>) {
        if is_root_hub(&device) {
            return;
        }
        let device = reference(&device);
        trace!("Hot-plug: {} arrived", device);
        let _ = self.events.try_send(HotplugEvent::Arrived(device));
    }

    fn device_left(&mut self, device: Device<T>) {
        let device = reference(&device);
        trace!("Hot-plug: {} left", device);
        let _ = self.events.try_send(HotplugEvent::Left(device));
    }
}

/// Devices already reported to the callbacks
///
/// Both the initial scan and hot-plug may see the same device; only the
/// first sighting is reported.
#[derive(Debug, Default)]
pub struct DeviceTracker {
    known: BTreeSet<DeviceReference>,
}

impl DeviceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn contains(&self, device: &DeviceReference) -> bool {
        self.known.contains(device)
    }

    /// Report `device` as added unless it is already known
    pub fn add(
        &mut self,
        device: DeviceReference,
        callbacks: &mut dyn EngineCallbacks,
    ) -> ControlFlow<()> {
        if !self.known.insert(device.clone()) {
            trace!("{} already reported", device);
            return ControlFlow::Continue(());
        }
        callbacks.device_added(&device)
    }

    /// Report `device` as removed if it is known
    pub fn remove(
        &mut self,
        device: DeviceReference,
        callbacks: &mut dyn EngineCallbacks,
    ) -> ControlFlow<()> {
        if !self.known.remove(&device) {
            return ControlFlow::Continue(());
        }
        callbacks.device_removed(&device)
    }

    /// Apply one full scan, removals first; returns whether anything changed
    pub fn apply_scan(
        &mut self,
        current: BTreeSet<DeviceReference>,
        callbacks: &mut dyn EngineCallbacks,
    ) -> ControlFlow<(), bool> {
        let (added, removed) = diff_devices(&self.known, &current);
        let changed = !added.is_empty() || !removed.is_empty();

        for device in removed {
            self.remove(device, callbacks)?;
        }
        for device in added {
            self.add(device, callbacks)?;
        }
        ControlFlow::Continue(changed)
    }

    /// Apply a periodic rescan; a pass that changed something ends with
    /// `discovery_done`
    pub fn apply_rescan(
        &mut self,
        current: BTreeSet<DeviceReference>,
        callbacks: &mut dyn EngineCallbacks,
    ) -> ControlFlow<()> {
        if self.apply_scan(current, callbacks)? {
            callbacks.discovery_done()?;
        }
        ControlFlow::Continue(())
    }
}

/// libusb-backed enumeration engine
pub struct RusbEngine {
    context: Context,
    settings: EngineSettings,
    tracker: DeviceTracker,
}

impl RusbEngine {
    /// Bring up a libusb context
    pub fn init(settings: EngineSettings) -> Result<Self, EngineError> {
        let context = Context::new().map_err(EngineError::Init)?;
        info!(
            "USB context initialized (hotplug {})",
            if settings.hotplug && rusb::has_hotplug() {
                "enabled"
            } else {
                "disabled"
            }
        );

        Ok(Self {
            context,
            settings,
            tracker: DeviceTracker::new(),
        })
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Devices currently on the bus, root hubs excluded
    pub fn list_devices(&self) -> Result<Vec<DeviceReference>, EngineError> {
        Ok(self.scan()?.into_iter().collect())
    }

    fn scan(&self) -> Result<BTreeSet<DeviceReference>, EngineError> {
        let devices = self.context.devices()?;
        Ok(devices
            .iter()
            .filter(|device| !is_root_hub(device))
            .map(|device| reference(&device))
            .collect())
    }

    fn run_hotplug(
        &mut self,
        callbacks: &mut dyn EngineCallbacks,
        events: async_channel::Receiver<HotplugEvent>,
    ) -> ControlFlow<()> {
        while !callbacks.stop_requested() {
            match self.context.handle_events(Some(self.settings.poll_interval)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(self.settings.poll_interval);
                }
            }

            while let Ok(event) = events.try_recv() {
                match event {
                    HotplugEvent::Arrived(device) => self.tracker.add(device, callbacks)?,
                    HotplugEvent::Left(device) => self.tracker.remove(device, callbacks)?,
                }
            }
        }
        ControlFlow::Break(())
    }

    fn run_polling(&mut self, callbacks: &mut dyn EngineCallbacks) -> ControlFlow<()> {
        while !callbacks.stop_requested() {
            std::thread::sleep(self.settings.poll_interval);

            let current = match self.scan() {
                Ok(current) => current,
                Err(e) => {
                    warn!("Failed to rescan USB bus: {}", e);
                    continue;
                }
            };

            self.tracker.apply_rescan(current, callbacks)?;
        }
        ControlFlow::Break(())
    }
}

impl EnumerationEngine for RusbEngine {
    fn run(&mut self, callbacks: &mut dyn EngineCallbacks) -> Result<(), EngineError> {
        // Register before the initial scan so nothing plugged in between is
        // missed; duplicates are filtered against the known set.
        let (tx, rx) = async_channel::unbounded();
        let registration = if self.settings.hotplug && rusb::has_hotplug() {
            let forwarder = HotplugForwarder { events: tx };
            let registration: Registration<Context> = HotplugBuilder::new()
                .enumerate(false)
                .register(&self.context, Box::new(forwarder))?;
            debug!("Hot-plug callbacks registered");
            Some(registration)
        } else {
            debug!(
                "Polling for devices every {:?}",
                self.settings.poll_interval
            );
            None
        };

        let initial = self.scan()?;
        debug!("Initial scan found {} devices", initial.len());
        if self.tracker.apply_scan(initial, callbacks).is_break()
            || callbacks.discovery_done().is_break()
        {
            return Ok(());
        }

        let _ = if registration.is_some() {
            self.run_hotplug(callbacks, rx)
        } else {
            self.run_polling(callbacks)
        };
        drop(registration);

        debug!(
            "Enumeration engine stopping with {} known devices",
            self.tracker.len()
        );
        Ok(())
    }
}

impl Drop for RusbEngine {
    fn drop(&mut self) {
        debug!("USB context released");
    }
}
