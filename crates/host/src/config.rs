//! Host configuration management

use crate::drivers::{builtin_driver_names, find_driver_entry};
use crate::usb::{DispatchPolicy, EngineSettings};
use anyhow::{Context, Result, anyhow};
use descriptor::{
    ClassificationKey, DEFAULT_USBFS_ROOT, DeviceClassKey, InterfaceClassKey, ProductKey,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub dispatch: DispatchPolicy,
    #[serde(default)]
    pub drivers: DriverSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub log_level: String,
    /// Send sd_notify readiness and stopping notifications
    pub service_mode: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            service_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Use hot-plug notifications when libusb supports them
    #[serde(default = "UsbSettings::default_hotplug")]
    pub hotplug: bool,
    /// Rescan period without hot-plug, and the bound on every idle wait
    #[serde(default = "UsbSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Directory holding the usbfs device nodes
    #[serde(default = "UsbSettings::default_usbfs_root")]
    pub usbfs_root: String,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            hotplug: Self::default_hotplug(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            usbfs_root: Self::default_usbfs_root(),
        }
    }
}

impl UsbSettings {
    fn default_hotplug() -> bool {
        true
    }

    fn default_poll_interval_ms() -> u64 {
        100
    }

    fn default_usbfs_root() -> String {
        DEFAULT_USBFS_ROOT.to_string()
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            hotplug: self.hotplug,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// usbfs root with `~` expanded
    pub fn usbfs_root(&self) -> PathBuf {
        expand_path(&self.usbfs_root)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Drivers from the built-in catalog to enable
    #[serde(default = "builtin_driver_names")]
    pub enabled: Vec<String>,
    /// Bindings registered on top of the drivers' defaults
    #[serde(default)]
    pub bindings: Vec<BindingSpec>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            enabled: builtin_driver_names(),
            bindings: Vec::new(),
        }
    }
}

/// Extra binding of a driver to one key
///
/// # Example Configuration
/// ```toml
/// [[drivers.bindings]]
/// driver = "cdc-acm"
/// product = "0x2341:0x0043"
///
/// [[drivers.bindings]]
/// driver = "cdc-acm"
/// interface_class = "0x02:0x02:0xff"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSpec {
    pub driver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_class: Option<String>,
}

impl BindingSpec {
    /// The key this binding names; exactly one key field must be set
    pub fn key(&self) -> Result<ClassificationKey> {
        let key = match (&self.product, &self.device_class, &self.interface_class) {
            (Some(product), None, None) => product
                .parse::<ProductKey>()
                .map(ClassificationKey::from)
                .map_err(|e| anyhow!("Invalid product '{}': {}", product, e))?,
            (None, Some(class), None) => class
                .parse::<DeviceClassKey>()
                .map(ClassificationKey::from)
                .map_err(|e| anyhow!("Invalid device_class '{}': {}", class, e))?,
            (None, None, Some(class)) => class
                .parse::<InterfaceClassKey>()
                .map(ClassificationKey::from)
                .map_err(|e| anyhow!("Invalid interface_class '{}': {}", class, e))?,
            _ => {
                return Err(anyhow!(
                    "Binding for driver '{}' must set exactly one of product, device_class, interface_class",
                    self.driver
                ));
            }
        };
        Ok(key)
    }
}

impl HostConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-dispatch/host.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-dispatch").join("host.toml")
        } else {
            PathBuf::from(".config/usb-dispatch/host.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.host.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.host.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.usb.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than 0"));
        }

        for name in &self.drivers.enabled {
            if find_driver_entry(name).is_none() {
                return Err(anyhow!(
                    "Unknown driver '{}', available drivers: {}",
                    name,
                    builtin_driver_names().join(", ")
                ));
            }
        }

        for binding in &self.drivers.bindings {
            binding.key()?;
            if !self.drivers.enabled.contains(&binding.driver) {
                return Err(anyhow!(
                    "Binding refers to driver '{}', which is not enabled",
                    binding.driver
                ));
            }
        }

        Ok(())
    }
}

/// Expand `~` in a user-supplied path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}
