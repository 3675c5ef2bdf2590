use std::sync::Arc;
use std::thread;

use threshold_monitor::config::{MonitorConfig, TransitionRequest, CRITICAL_THRESHOLD_INTERFACE};
use threshold_monitor::monitor::{
    self, MemoryEnvelope, MonitorPipeline, Outcome, SignalFilter, Subscription, WatchRegistry,
    WatchedEntity,
};
use threshold_monitor::transport::memory::{memory_bus, RecordingController};
use threshold_monitor::{ActionError, MonitorError, PropertyValue, TransportError};

const TEMP1: &str = "/xyz/openbmc_project/sensors/temperature/Temp1";
const TEMP2: &str = "/xyz/openbmc_project/sensors/temperature/Temp2";

fn alarm(path: &str, property: &str, value: bool) -> MemoryEnvelope {
    MemoryEnvelope::new(CRITICAL_THRESHOLD_INTERFACE, path).with_property(property, value)
}

#[test]
fn loop_dispatches_and_exits_on_transport_failure() {
    let (publisher, mut transport) = memory_bus(64);
    let controller = Arc::new(RecordingController::new());
    let pipeline = MonitorPipeline::from_config(&MonitorConfig::default(), Arc::clone(&controller));

    publisher.publish(alarm(TEMP1, "CriticalAlarmHigh", false)).unwrap();
    publisher.publish(alarm(TEMP1, "CriticalAlarmLow", true)).unwrap();
    publisher.publish(alarm(TEMP2, "CriticalAlarmLow", true)).unwrap();
    publisher.publish(alarm(TEMP2, "CriticalAlarmHigh", true)).unwrap();
    publisher.fail("bus connection lost").unwrap();

    let err = monitor::run(&mut transport, &pipeline);
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        MonitorError::TransportProcess(TransportError::Process { .. })
    ));

    assert_eq!(
        controller.requests(),
        vec![TransitionRequest::chassis_power_off(); 2]
    );
    let stats = pipeline.stats();
    assert_eq!(stats.envelopes, 4);
    assert_eq!(stats.assertions, 2);

    // Dropping the subscription unregistered the match.
    assert_eq!(transport.match_count(), 0);
}

#[test]
fn repeated_assertion_is_reissued() {
    let (publisher, mut transport) = memory_bus(8);
    let controller = Arc::new(RecordingController::new());
    let pipeline = MonitorPipeline::from_config(&MonitorConfig::default(), Arc::clone(&controller));

    publisher.publish(alarm(TEMP1, "CriticalAlarmHigh", true)).unwrap();
    publisher.publish(alarm(TEMP1, "CriticalAlarmHigh", true)).unwrap();
    drop(publisher);

    let err = monitor::run(&mut transport, &pipeline);
    assert!(matches!(err, MonitorError::TransportProcess(TransportError::Closed)));
    assert_eq!(controller.attempts(), 2);
    assert_eq!(controller.requests().len(), 2);
}

#[test]
fn malformed_envelope_does_not_stop_the_loop() {
    let (publisher, mut transport) = memory_bus(8);
    let pipeline = MonitorPipeline::from_config(&MonitorConfig::default(), RecordingController::new());

    let mut sub = Subscription::new(
        &mut transport,
        &SignalFilter::properties_changed(CRITICAL_THRESHOLD_INTERFACE),
    )
    .unwrap();

    publisher
        .publish(
            MemoryEnvelope::new(CRITICAL_THRESHOLD_INTERFACE, TEMP1)
                .with_property("CriticalAlarmHigh", false)
                .with_property("CriticalAlarmLow", true)
                .truncated_after(1),
        )
        .unwrap();
    publisher.publish(alarm(TEMP1, "CriticalAlarmLow", true)).unwrap();
    drop(publisher);

    let mut outcomes = Vec::new();
    let err = sub.run(|env| outcomes.push(pipeline.handle(env)));
    assert_eq!(err, TransportError::Closed);

    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[0], Outcome::Malformed(_)));
    let Outcome::Dispatched(event) = &outcomes[1] else {
        panic!("expected dispatch, got {:?}", outcomes[1]);
    };
    assert_eq!(event.property_name, "CriticalAlarmLow");
}

#[test]
fn controller_rejection_does_not_stop_the_loop() {
    let (publisher, mut transport) = memory_bus(8);
    let controller = Arc::new(RecordingController::new());
    controller.reject_with(ActionError::Rejected {
        name: "xyz.openbmc_project.Common.Error.NotAllowed".to_string(),
        message: "transition not allowed".to_string(),
    });
    let pipeline = MonitorPipeline::from_config(&MonitorConfig::default(), Arc::clone(&controller));

    publisher.publish(alarm(TEMP1, "CriticalAlarmHigh", true)).unwrap();
    publisher.publish(alarm(TEMP2, "CriticalAlarmHigh", true)).unwrap();
    drop(publisher);

    let err = monitor::run(&mut transport, &pipeline);
    assert!(matches!(err, MonitorError::TransportProcess(_)));

    // Both envelopes reached the controller; nothing was retried.
    assert_eq!(controller.attempts(), 2);
    assert!(controller.requests().is_empty());
    let stats = pipeline.stats();
    assert_eq!(stats.actions_issued, 2);
    assert_eq!(stats.action_failures, 2);
}

#[test]
fn custom_registry_and_unwatched_interfaces() {
    let registry = WatchRegistry::new(vec![
        "/xyz/openbmc_project/sensors/voltage/P12V=low".parse::<WatchedEntity>().unwrap(),
    ])
    .unwrap();
    let config = MonitorConfig {
        registry,
        ..MonitorConfig::default()
    };

    let (publisher, mut transport) = memory_bus(8);
    let controller = Arc::new(RecordingController::new());
    let pipeline = MonitorPipeline::from_config(&config, Arc::clone(&controller));

    // Warning thresholds never reach the loop: the match filter drops them.
    publisher
        .publish(
            MemoryEnvelope::new("xyz.openbmc_project.Sensor.Threshold.Warning", "/xyz/openbmc_project/sensors/voltage/P12V")
                .with_property("WarningAlarmLow", true),
        )
        .unwrap();
    // The default sensors are no longer watched.
    publisher.publish(alarm(TEMP1, "CriticalAlarmHigh", true)).unwrap();
    publisher
        .publish(
            MemoryEnvelope::new(CRITICAL_THRESHOLD_INTERFACE, "/xyz/openbmc_project/sensors/voltage/P12V")
                .with_property("CriticalAlarmHigh", PropertyValue::String("n/a".to_string()))
                .with_property("CriticalAlarmLow", true),
        )
        .unwrap();
    drop(publisher);

    let _ = monitor::run(&mut transport, &pipeline);

    assert_eq!(transport.unmatched(), 1);
    assert_eq!(pipeline.stats().envelopes, 2);
    assert_eq!(controller.requests().len(), 1);
}

#[test]
fn publisher_on_another_thread() {
    let (publisher, mut transport) = memory_bus(1);
    let controller = Arc::new(RecordingController::new());
    let pipeline = MonitorPipeline::from_config(&MonitorConfig::default(), Arc::clone(&controller));

    let producer = thread::spawn(move || {
        for i in 0..16 {
            let asserted = i % 4 == 0;
            publisher
                .publish(alarm(TEMP1, "CriticalAlarmHigh", asserted))
                .unwrap();
        }
        publisher.fail("shutdown").unwrap();
    });

    let err = monitor::run(&mut transport, &pipeline);
    producer.join().unwrap();

    assert!(matches!(err, MonitorError::TransportProcess(TransportError::Process { .. })));
    assert_eq!(pipeline.stats().envelopes, 16);
    assert_eq!(controller.requests().len(), 4);
}
