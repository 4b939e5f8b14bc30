//! Dispatcher Integration Tests
//!
//! Drives `find_driver` against an in-memory descriptor source.
//!
//! # Test Scenarios
//! - Every matching table is attempted, no short-circuit
//! - No match means no construction attempt
//! - `is_supported` gate and its policy toggle
//! - Construction failures and panics are contained
//! - The device handle is closed on every path
//! - Truncated descriptors classify with what was read
//!
//! Run with: `cargo test -p host --test dispatch_tests`

mod support;

use common::test_utils::{
    MockDescriptorSource, create_mock_cdc_acm_blob, create_mock_device_blob, mock_device,
};
use descriptor::{ClassificationKey, DeviceClassKey, InterfaceClassKey, ProductKey};
use host::usb::{DispatchPolicy, Dispatcher, DriverRegistry};
use std::sync::Arc;
use support::{Behavior, RecordingFactory};

fn dispatcher(
    registry: DriverRegistry,
    source: &MockDescriptorSource,
    policy: DispatchPolicy,
) -> Dispatcher {
    Dispatcher::new(Arc::new(registry), Arc::new(source.clone()), policy)
}

fn cdc_source() -> MockDescriptorSource {
    let source = MockDescriptorSource::new();
    source.insert(mock_device(4), create_mock_cdc_acm_blob());
    source
}

// ============================================================================
// Matching
// ============================================================================

#[test]
fn test_all_three_tables_attempted() {
    let source = cdc_source();
    let registry = DriverRegistry::new();

    let product = RecordingFactory::new("product");
    let device = RecordingFactory::new("device-class");
    let iface = RecordingFactory::new("interface-class");
    let counters = [product.counters(), device.counters(), iface.counters()];

    registry.register_product(product.into_arc(), 0x1234, 0x5678);
    registry.register_device_class(device.into_arc(), 2, 2, 1);
    registry.register_interface_class(iface.into_arc(), 2, 2, 1);

    let report =
        dispatcher(registry, &source, DispatchPolicy::default()).find_driver(&mock_device(4));

    assert_eq!(report.keys.len(), 3);
    assert_eq!(report.matched, 3);
    assert_eq!(report.attempts, 3);
    assert_eq!(report.bound.len(), 3);
    for counter in &counters {
        assert_eq!(counter.attempts(), 1);
        assert_eq!(counter.live(), 1);
    }

    let mut factories: Vec<_> = report.bound.iter().map(|b| b.factory.as_str()).collect();
    factories.sort_unstable();
    assert_eq!(factories, ["device-class", "interface-class", "product"]);

    drop(report);
    for counter in &counters {
        assert_eq!(counter.live(), 0);
    }
}

#[test]
fn test_no_match_no_attempt() {
    let source = cdc_source();
    let registry = DriverRegistry::new();
    let other = RecordingFactory::new("other");
    let counters = other.counters();
    registry.register_product(other.into_arc(), 0xdead, 0xbeef);

    let report =
        dispatcher(registry, &source, DispatchPolicy::default()).find_driver(&mock_device(4));

    assert_eq!(report.keys.len(), 3);
    assert_eq!(report.matched, 0);
    assert_eq!(report.attempts, 0);
    assert!(report.failures.is_empty());
    assert!(report.bound.is_empty());
    assert_eq!(counters.attempts(), 0);
    assert_eq!(counters.supported_checks(), 0);
}

#[test]
fn test_one_attempt_per_interface_record() {
    let source = MockDescriptorSource::new();
    source.insert(
        mock_device(5),
        create_mock_device_blob(
            0x2341,
            0x0043,
            (0xef, 0x02, 0x01),
            &[(2, 2, 1), (0x0a, 0, 0), (2, 2, 1)],
        ),
    );
    let registry = DriverRegistry::new();
    let acm = RecordingFactory::new("acm");
    let counters = acm.counters();
    registry.register_interface_class(acm.into_arc(), 2, 2, 1);

    let report =
        dispatcher(registry, &source, DispatchPolicy::default()).find_driver(&mock_device(5));

    assert_eq!(report.matched, 2);
    assert_eq!(counters.attempts(), 2);
    assert_eq!(report.bound.len(), 2);
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_unsupported_device_is_skipped() {
    let source = cdc_source();
    let registry = DriverRegistry::new();
    let picky = RecordingFactory::new("picky").unsupported();
    let counters = picky.counters();
    registry.register_interface_class(picky.into_arc(), 2, 2, 1);

    let report =
        dispatcher(registry, &source, DispatchPolicy::default()).find_driver(&mock_device(4));

    assert_eq!(report.matched, 1);
    assert_eq!(report.attempts, 0);
    assert_eq!(report.unsupported, vec!["picky".to_string()]);
    assert_eq!(counters.supported_checks(), 1);
    assert_eq!(counters.attempts(), 0);
}

#[test]
fn test_supported_check_can_be_disabled() {
    let source = cdc_source();
    let registry = DriverRegistry::new();
    let picky = RecordingFactory::new("picky").unsupported();
    let counters = picky.counters();
    registry.register_interface_class(picky.into_arc(), 2, 2, 1);

    let policy = DispatchPolicy {
        check_supported: false,
        ..DispatchPolicy::default()
    };
    let report = dispatcher(registry, &source, policy).find_driver(&mock_device(4));

    assert_eq!(counters.supported_checks(), 0);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.bound.len(), 1);
}

#[test]
fn test_failure_does_not_stop_dispatch() {
    let source = cdc_source();
    let registry = DriverRegistry::new();
    registry.register_product(
        RecordingFactory::new("broken")
            .with_behavior(Behavior::Fail)
            .into_arc(),
        0x1234,
        0x5678,
    );
    registry.register_interface_class(RecordingFactory::new("acm").into_arc(), 2, 2, 1);

    let report =
        dispatcher(registry, &source, DispatchPolicy::default()).find_driver(&mock_device(4));

    assert_eq!(report.attempts, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].factory, "broken");
    assert_eq!(
        report.failures[0].key,
        ClassificationKey::from(ProductKey::new(0x1234, 0x5678))
    );
    assert_eq!(report.bound.len(), 1);
    assert_eq!(report.bound[0].factory, "acm");
}

#[test]
fn test_panicking_factory_is_contained() {
    let source = cdc_source();
    let registry = DriverRegistry::new();
    registry.register_device_class(
        RecordingFactory::new("volatile")
            .with_behavior(Behavior::Panic)
            .into_arc(),
        2,
        2,
        1,
    );
    registry.register_interface_class(RecordingFactory::new("acm").into_arc(), 2, 2, 1);

    let report =
        dispatcher(registry, &source, DispatchPolicy::default()).find_driver(&mock_device(4));

    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].reason.contains("volatile exploded"));
    assert_eq!(
        report.failures[0].key,
        ClassificationKey::from(DeviceClassKey::new(2, 2, 1))
    );
    assert_eq!(report.bound.len(), 1);
}

// ============================================================================
// Device handle and descriptor edge cases
// ============================================================================

#[test]
fn test_handle_closed_on_every_path() {
    let source = cdc_source();
    let mut truncated = create_mock_cdc_acm_blob();
    truncated.truncate(18 + 9 + 4);
    source.insert(mock_device(6), truncated);

    let registry = DriverRegistry::new();
    registry.register_interface_class(
        RecordingFactory::new("broken")
            .with_behavior(Behavior::Fail)
            .into_arc(),
        2,
        2,
        1,
    );
    let dispatcher = dispatcher(registry, &source, DispatchPolicy::default());

    dispatcher.find_driver(&mock_device(4));
    dispatcher.find_driver(&mock_device(6));
    let missing = dispatcher.find_driver(&mock_device(9));

    assert!(missing.keys.is_empty());
    assert_eq!(missing.attempts, 0);
    assert_eq!(source.open_count(), 2);
    assert_eq!(source.close_count(), 2);
}

#[test]
fn test_truncated_interface_is_not_classified() {
    let source = MockDescriptorSource::new();
    let mut blob = create_mock_cdc_acm_blob();
    // Device and configuration intact, interface cut after 5 bytes
    blob.truncate(18 + 9 + 5);
    source.insert(mock_device(7), blob);

    let registry = DriverRegistry::new();
    let product = RecordingFactory::new("product");
    let iface = RecordingFactory::new("iface");
    let (product_counters, iface_counters) = (product.counters(), iface.counters());
    registry.register_product(product.into_arc(), 0x1234, 0x5678);
    registry.register_interface_class(iface.into_arc(), 2, 2, 1);

    let dispatcher = dispatcher(registry, &source, DispatchPolicy::default());
    let classification = dispatcher.classify(&mock_device(7)).unwrap();
    assert!(!classification.complete);
    assert!(
        !classification
            .keys
            .contains(&ClassificationKey::from(InterfaceClassKey::new(2, 2, 1)))
    );

    let report = dispatcher.find_driver(&mock_device(7));
    assert_eq!(report.keys.len(), 2);
    assert_eq!(product_counters.attempts(), 1);
    assert_eq!(iface_counters.attempts(), 0);
}

#[test]
fn test_registration_after_dispatcher_creation_is_seen() {
    let source = cdc_source();
    let registry = Arc::new(DriverRegistry::new());
    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        Arc::new(source.clone()),
        DispatchPolicy::default(),
    );

    assert_eq!(dispatcher.find_driver(&mock_device(4)).matched, 0);

    registry.register_interface_class(RecordingFactory::new("late").into_arc(), 2, 2, 1);
    let report = dispatcher.find_driver(&mock_device(4));
    assert_eq!(report.bound.len(), 1);
}
