//! End-to-end behaviour of route + apply against an in-memory publisher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kelvin_core::{
    CommandField, CommandInput, ConfigError, DecodeError, DeviceConfig, DispatchError, Dispatcher, PublishError,
    Publisher, Registry, RouteOutcome, TopicRouter, ValidationError, CONTROL_TOPIC, TELEMETRY_WILDCARD,
};

#[derive(Default)]
struct FakeBroker {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl Publisher for FakeBroker {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.published.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}

fn device(id: &str, max_temperature: f64, max_rate: f64) -> DeviceConfig {
    DeviceConfig {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        max_temperature,
        max_rate,
    }
}

struct Bridge {
    registry: Arc<Registry>,
    router: TopicRouter,
    dispatcher: Dispatcher,
    broker: Arc<FakeBroker>,
}

fn bridge() -> Bridge {
    let registry = Arc::new(Registry::load(vec![device("pump1", 30.0, 5.0), device("pump2", 30.0, 5.0)]).unwrap());
    let mut router = TopicRouter::new(registry.clone());
    router.subscribe(TELEMETRY_WILDCARD).unwrap();
    let broker = Arc::new(FakeBroker::default());
    let dispatcher = Dispatcher::new(registry.clone(), broker.clone(), CONTROL_TOPIC);
    Bridge { registry, router, dispatcher, broker }
}

fn inputs(pairs: &[(&str, &str, &str)]) -> HashMap<String, CommandInput> {
    pairs.iter().map(|(id, t, r)| (id.to_string(), CommandInput::new(*t, *r))).collect()
}

#[test]
fn duplicate_config_registers_nothing() {
    let err = Registry::load(vec![device("pump1", 1.0, 1.0), device("pump1", 2.0, 2.0)]).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateId(_)));
}

#[test]
fn telemetry_is_overwritten_not_merged() {
    let b = bridge();
    b.router
        .route("ald/temperature/pump1", br#"{"tsp":20.0,"wsp":20.0,"power":5.0,"temperature":19.8}"#)
        .unwrap();
    let first = b.registry.latest("pump1").unwrap();
    assert_eq!(
        (first.setpoint_temperature, first.working_setpoint, first.power_percent, first.measured_temperature),
        (20.0, 20.0, 5.0, 19.8)
    );

    b.router
        .route("ald/temperature/pump1", br#"{"tsp":25.0,"wsp":22.5,"power":80.0,"temperature":21.0}"#)
        .unwrap();
    let second = b.registry.latest("pump1").unwrap();
    assert_eq!(
        (second.setpoint_temperature, second.working_setpoint, second.power_percent, second.measured_temperature),
        (25.0, 22.5, 80.0, 21.0)
    );
    assert!(b.registry.latest("pump2").is_none());
}

#[test]
fn malformed_telemetry_keeps_previous_sample() {
    let b = bridge();
    b.router
        .route("ald/temperature/pump1", br#"{"tsp":20.0,"wsp":20.0,"power":5.0,"temperature":19.8}"#)
        .unwrap();
    let before = b.registry.latest("pump1");

    let err = b
        .router
        .route("ald/temperature/pump1", br#"{"tsp":99.0,"wsp":99.0,"temperature":99.0}"#)
        .unwrap_err();
    assert!(matches!(err, DecodeError::MissingField("power")));
    assert_eq!(b.registry.latest("pump1"), before);
}

#[test]
fn unknown_device_is_a_silent_no_op() {
    let b = bridge();
    let out = b
        .router
        .route("ald/temperature/unknownDevice", br#"{"tsp":1,"wsp":1,"power":1,"temperature":1}"#)
        .unwrap();
    assert_eq!(out, RouteOutcome::UnknownDevice("unknownDevice".into()));
    assert_eq!(b.registry.len(), 2);
    assert!(b.registry.snapshot().iter().all(|(_, s)| s.is_none()));
}

#[test]
fn apply_publishes_one_ordered_batch() {
    let b = bridge();
    b.dispatcher
        .apply(&inputs(&[("pump2", "10.0", "1.0"), ("pump1", "25.0", "3.0")]))
        .unwrap();

    let published = b.broker.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, CONTROL_TOPIC);
    assert_eq!(
        std::str::from_utf8(&published[0].1).unwrap(),
        r#"{"pump1":{"T":25.0,"rate":3.0},"pump2":{"T":10.0,"rate":1.0}}"#
    );
}

#[test]
fn out_of_bounds_temperature_blocks_publish() {
    let b = bridge();
    let err = b
        .dispatcher
        .apply(&inputs(&[("pump1", "50.0", "3.0"), ("pump2", "10.0", "1.0")]))
        .unwrap_err();

    let v = match err {
        DispatchError::Validation(v) => v,
        other => panic!("expected validation error, got {other:?}"),
    };
    assert_eq!(v.device_id(), "pump1");
    assert_eq!(v.field(), Some(CommandField::Temperature));
    assert_eq!(v.reason(), "out of bounds");
    assert_eq!(v.bound(), Some(30.0));
    assert!(b.broker.published.lock().unwrap().is_empty());
}

#[test]
fn incomplete_batch_blocks_publish() {
    let b = bridge();
    let err = b.dispatcher.apply(&inputs(&[("pump1", "25.0", "3.0")])).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Validation(ValidationError::MissingDevice { ref device_id }) if device_id == "pump2"
    ));
    assert!(b.broker.published.lock().unwrap().is_empty());
}

#[test]
fn telemetry_and_apply_run_concurrently() {
    let b = bridge();
    let router = b.router.clone();
    let writer = std::thread::spawn(move || {
        for i in 0..200 {
            let payload = format!(r#"{{"tsp":{i},"wsp":{i},"power":50,"temperature":{i}}}"#);
            router.route("ald/temperature/pump2", payload.as_bytes()).unwrap();
        }
    });
    for _ in 0..50 {
        b.dispatcher
            .apply(&inputs(&[("pump1", "1", "1"), ("pump2", "2", "2")]))
            .unwrap();
        let _ = b.registry.snapshot();
    }
    writer.join().unwrap();

    assert_eq!(b.registry.latest("pump2").unwrap().setpoint_temperature, 199.0);
    assert_eq!(b.broker.published.lock().unwrap().len(), 50);
}
