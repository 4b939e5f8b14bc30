//! Shared fixtures for the host integration tests
//!
//! - `RecordingFactory`: a driver factory that counts what is asked of it
//! - `ScriptedEngine`: an enumeration engine replaying a fixed script

#![allow(dead_code)]

use descriptor::DeviceReference;
use host::usb::{
    Driver, DriverError, DriverFactory, EngineCallbacks, EngineError, EnumerationEngine,
};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

// ============================================================================
// Driver factory
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Bind,
    Fail,
    Panic,
}

/// Counters shared between a factory, its drivers and the test
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub supported_checks: Arc<AtomicUsize>,
    pub attempts: Arc<AtomicUsize>,
    /// Drivers created and not yet dropped
    pub live: Arc<AtomicUsize>,
}

impl Counters {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn supported_checks(&self) -> usize {
        self.supported_checks.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

pub struct RecordingFactory {
    name: String,
    supported: bool,
    behavior: Behavior,
    counters: Counters,
}

impl RecordingFactory {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            supported: true,
            behavior: Behavior::Bind,
            counters: Counters::default(),
        }
    }

    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn counters(&self) -> Counters {
        self.counters.clone()
    }

    pub fn into_arc(self) -> Arc<dyn DriverFactory> {
        Arc::new(self)
    }
}

impl DriverFactory for RecordingFactory {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_supported(&self, _device: &DeviceReference) -> bool {
        self.counters.supported_checks.fetch_add(1, Ordering::SeqCst);
        self.supported
    }

    fn create(&self, device: &DeviceReference) -> Result<Box<dyn Driver>, DriverError> {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Bind => {
                self.counters.live.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(RecordingDriver {
                    name: self.name.clone(),
                    device: device.clone(),
                    live: Arc::clone(&self.counters.live),
                }))
            }
            Behavior::Fail => Err(DriverError::DeviceGone(device.clone())),
            Behavior::Panic => panic!("{} exploded", self.name),
        }
    }
}

struct RecordingDriver {
    name: String,
    device: DeviceReference,
    live: Arc<AtomicUsize>,
}

impl Driver for RecordingDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &DeviceReference {
        &self.device
    }
}

impl Drop for RecordingDriver {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Enumeration engine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Add(DeviceReference),
    Remove(DeviceReference),
    DiscoveryDone,
}

/// What the test can observe about a running `ScriptedEngine`
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    /// Callbacks invoked
    pub calls: Arc<AtomicUsize>,
    /// Callbacks invoked after stop had been requested
    pub calls_after_stop: Arc<AtomicUsize>,
    /// Set once the script has been played through
    pub script_done: Arc<AtomicBool>,
    pub dropped: Arc<AtomicBool>,
}

impl EngineProbe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_after_stop(&self) -> usize {
        self.calls_after_stop.load(Ordering::SeqCst)
    }

    pub fn script_done(&self) -> bool {
        self.script_done.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Play the script once, then idle until stopped
    Once,
    /// Replay the script until a callback breaks
    Repeat,
    /// Fail immediately
    Fail,
    /// Panic immediately
    Panic,
}

pub struct ScriptedEngine {
    steps: Vec<Step>,
    mode: EngineMode,
    probe: EngineProbe,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<Step>, mode: EngineMode) -> Self {
        Self {
            steps,
            mode,
            probe: EngineProbe::default(),
        }
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }

    fn play(&self, callbacks: &mut dyn EngineCallbacks) -> ControlFlow<()> {
        for step in &self.steps {
            if callbacks.stop_requested() {
                self.probe.calls_after_stop.fetch_add(1, Ordering::SeqCst);
            }
            self.probe.calls.fetch_add(1, Ordering::SeqCst);
            match step {
                Step::Add(device) => callbacks.device_added(device)?,
                Step::Remove(device) => callbacks.device_removed(device)?,
                Step::DiscoveryDone => callbacks.discovery_done()?,
            }
        }
        ControlFlow::Continue(())
    }
}

impl EnumerationEngine for ScriptedEngine {
    fn run(&mut self, callbacks: &mut dyn EngineCallbacks) -> Result<(), EngineError> {
        match self.mode {
            EngineMode::Fail => return Err(EngineError::Other("scripted failure".to_string())),
            EngineMode::Panic => panic!("scripted engine panic"),
            EngineMode::Once => {
                if self.play(callbacks).is_break() {
                    return Ok(());
                }
                self.probe.script_done.store(true, Ordering::SeqCst);
            }
            EngineMode::Repeat => loop {
                if self.play(callbacks).is_break() {
                    return Ok(());
                }
                self.probe.script_done.store(true, Ordering::SeqCst);
            },
        }

        while !callbacks.stop_requested() {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.probe.dropped.store(true, Ordering::SeqCst);
    }
}
