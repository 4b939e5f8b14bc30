//! Integration tests for configuration parsing
//!
//! Tests host configuration parsing, including:
//! - Minimal and full configuration files
//! - Driver binding sections
//! - Invalid configuration handling
//! - Save and reload

use descriptor::{DeviceClassKey, InterfaceClassKey, ProductKey};
use host::config::HostConfig;
use host::drivers::build_registry;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const MINIMAL_CONFIG: &str = r#"
[host]
log_level = "info"
"#;

const FULL_CONFIG: &str = r#"
[host]
log_level = "debug"
service_mode = true

[usb]
hotplug = false
poll_interval_ms = 250
usbfs_root = "/run/usbfs"

[dispatch]
check_supported = false
release_on_remove = false

[drivers]
enabled = ["cdc-acm"]

[[drivers.bindings]]
driver = "cdc-acm"
product = "0x2341:0x0043"

[[drivers.bindings]]
driver = "cdc-acm"
device_class = "0x02:0x00:0x00"

[[drivers.bindings]]
driver = "cdc-acm"
interface_class = "0x02:0x02:0xff"
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

fn load(content: &str) -> anyhow::Result<HostConfig> {
    let file = write_config(content);
    HostConfig::load(Some(file.path().to_path_buf()))
}

#[test]
fn test_minimal_config_uses_defaults() {
    let config = load(MINIMAL_CONFIG).expect("Failed to load minimal config");

    assert_eq!(config.host.log_level, "info");
    assert!(!config.host.service_mode);
    assert!(config.usb.hotplug);
    assert_eq!(config.usb.poll_interval_ms, 100);
    assert!(config.dispatch.check_supported);
    assert!(config.dispatch.release_on_remove);
    assert_eq!(config.drivers.enabled, vec!["cdc-acm".to_string()]);
    assert!(config.drivers.bindings.is_empty());
}

#[test]
fn test_full_config() {
    let config = load(FULL_CONFIG).expect("Failed to load full config");

    assert_eq!(config.host.log_level, "debug");
    assert!(config.host.service_mode);

    let engine = config.usb.engine_settings();
    assert!(!engine.hotplug);
    assert_eq!(engine.poll_interval, Duration::from_millis(250));
    assert_eq!(config.usb.usbfs_root(), std::path::PathBuf::from("/run/usbfs"));

    assert!(!config.dispatch.check_supported);
    assert!(!config.dispatch.release_on_remove);

    assert_eq!(config.drivers.bindings.len(), 3);
    let registry = build_registry(&config.drivers).expect("Failed to build registry");
    assert!(
        registry
            .lookup_product(&ProductKey::new(0x2341, 0x0043))
            .is_some()
    );
    assert!(
        registry
            .lookup_device_class(&DeviceClassKey::new(2, 0, 0))
            .is_some()
    );
    assert!(
        registry
            .lookup_interface_class(&InterfaceClassKey::new(2, 2, 0xff))
            .is_some()
    );
    // Two defaults plus three configured bindings
    assert_eq!(registry.len(), 5);
}

#[test]
fn test_empty_file_is_default() {
    let config = load("").expect("Failed to load empty config");
    assert_eq!(config.host.log_level, "info");
    assert!(config.usb.hotplug);
}

#[test]
fn test_invalid_configs_rejected() {
    let cases = [
        ("bad log level", "[host]\nlog_level = \"loud\"\n"),
        ("zero poll interval", "[usb]\npoll_interval_ms = 0\n"),
        ("unknown driver", "[drivers]\nenabled = [\"ftdi\"]\n"),
        (
            "binding without key",
            "[[drivers.bindings]]\ndriver = \"cdc-acm\"\n",
        ),
        (
            "binding with two keys",
            "[[drivers.bindings]]\ndriver = \"cdc-acm\"\nproduct = \"0x1234:0x5678\"\ninterface_class = \"0x02:0x02:0x01\"\n",
        ),
        (
            "binding with bad hex",
            "[[drivers.bindings]]\ndriver = \"cdc-acm\"\nproduct = \"0x12345:0x5678\"\n",
        ),
        (
            "binding to disabled driver",
            "[drivers]\nenabled = []\n\n[[drivers.bindings]]\ndriver = \"cdc-acm\"\nproduct = \"0x1234:0x5678\"\n",
        ),
        ("malformed toml", "[host\nlog_level = \"info\"\n"),
    ];

    for (name, content) in cases {
        assert!(load(content).is_err(), "{} should be rejected", name);
    }
}

#[test]
fn test_missing_file_is_error() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let result = HostConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}

#[test]
fn test_save_and_reload() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("nested").join("host.toml");

    let mut config = load(FULL_CONFIG).expect("Failed to load full config");
    config.usb.poll_interval_ms = 500;
    config.save(&path).expect("Failed to save config");

    let reloaded = HostConfig::load(Some(path)).expect("Failed to reload config");
    assert_eq!(reloaded.usb.poll_interval_ms, 500);
    assert_eq!(reloaded.host.log_level, "debug");
    assert_eq!(reloaded.dispatch, config.dispatch);
    assert_eq!(reloaded.drivers.bindings, config.drivers.bindings);
}
