use std::sync::Arc;

use par_driver::protocol::ParameterError;
use par_driver::publish::{DriverEvent, Publication, RecordingPublisher};
use par_driver::transport::simulator::SimulatedMode;
use par_driver::transport::{SimulatedPar, SimulatorOptions};
use par_driver::{DriverBuilder, DriverConfig, DriverError, DriverHandle, Parameter};
use serde_json::{json, Value};

async fn command_mode() -> (DriverHandle, SimulatedPar, RecordingPublisher) {
    let sim = SimulatedPar::new(SimulatorOptions { initial_mode: SimulatedMode::Command, ..Default::default() });
    let publisher = RecordingPublisher::new();
    let config = DriverConfig { response_timeout_ms: 500, probe_timeout_ms: 100, ..Default::default() };
    let handle = DriverBuilder::new(Arc::new(sim.clone()), Arc::new(publisher.clone()))
        .with_config(config)
        .build();
    handle.configure(json!({"addr": "localhost", "port": 4001})).await.unwrap();
    handle.connect().await.unwrap();
    handle.discover_state().await.unwrap();
    sim.clear_sent();
    publisher.take();
    (handle, sim, publisher)
}

#[tokio::test]
async fn test_get_all_parameters() {
    let (handle, sim, _publisher) = command_mode().await;
    let values = handle.cmd_dvr("get_resource", Some(json!(["DRIVER_PARAMETER_ALL"]))).await.unwrap();
    assert_eq!(values, json!({"TELBAUD": 19200, "MAXRATE": 1}));
    assert_eq!(sim.sent(), vec![b"show telbaud\n".to_vec(), b"show maxrate\n".to_vec()]);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_set_maxrate_then_read_back() {
    let (handle, sim, publisher) = command_mode().await;
    let reply = handle.cmd_dvr("set_resource", Some(json!({"MAXRATE": 10}))).await.unwrap();
    assert_eq!(reply, json!({"MAXRATE": 10}));
    assert_eq!(sim.saved_value(Parameter::Maxrate), json!(10.0));

    let values = handle.cmd_dvr("get_resource", Some(json!(["MAXRATE"]))).await.unwrap();
    assert_eq!(values, json!({"MAXRATE": 10}));

    let changes: Vec<_> = publisher
        .take()
        .into_iter()
        .filter(|p| matches!(p, Publication::Event(DriverEvent::ConfigChange { .. })))
        .collect();
    assert_eq!(changes.len(), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_fractional_rate() {
    let (handle, sim, _publisher) = command_mode().await;
    handle.cmd_dvr("set_resource", Some(json!({"MAXRATE": 0.5}))).await.unwrap();
    assert_eq!(sim.sent()[0], b"set maxrate 0.5\n".to_vec());
    let values = handle.get_resource(vec!["MAXRATE".to_string()]).await.unwrap();
    assert_eq!(Value::Object(values), json!({"MAXRATE": 0.5}));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_empty_requests_touch_nothing() {
    let (handle, sim, publisher) = command_mode().await;
    assert_eq!(handle.cmd_dvr("get_resource", Some(json!([]))).await.unwrap(), json!({}));
    assert_eq!(handle.cmd_dvr("set_resource", Some(json!({}))).await.unwrap(), json!({}));
    assert!(sim.sent().is_empty());
    assert_eq!(publisher.count(), 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_unknown_and_invalid_values() {
    let (handle, sim, _publisher) = command_mode().await;

    let err = handle.cmd_dvr("get_resource", Some(json!(["MAXRATE", "bogus_param"]))).await.unwrap_err();
    assert!(matches!(err, DriverError::Parameter(ParameterError::Unknown(_))));

    let err = handle.cmd_dvr("set_resource", Some(json!({"MAXRATE": 7}))).await.unwrap_err();
    assert!(matches!(err, DriverError::Parameter(ParameterError::InvalidValue { .. })));

    let err = handle.cmd_dvr("set_resource", Some(json!({"TELBAUD": "fast"}))).await.unwrap_err();
    assert!(matches!(err, DriverError::Parameter(ParameterError::InvalidValue { .. })));

    assert!(sim.sent().is_empty());
    assert_eq!(sim.saved_value(Parameter::Maxrate), json!(1.0));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_restore_config_writes_snapshot() {
    let (handle, sim, _publisher) = command_mode().await;
    handle.set_resource(json!({"TELBAUD": 9600}).as_object().cloned().unwrap()).await.unwrap();
    let snapshot = handle.get_config().await.unwrap();

    handle.set_resource(json!({"TELBAUD": 38400}).as_object().cloned().unwrap()).await.unwrap();
    assert_eq!(sim.saved_value(Parameter::Telbaud), json!(38400));

    handle.restore_config(snapshot).await.unwrap();
    assert_eq!(sim.saved_value(Parameter::Telbaud), json!(9600));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_get_resource_requires_a_list() {
    let (handle, sim, _publisher) = command_mode().await;
    let err = handle.cmd_dvr("get_resource", Some(json!("MAXRATE"))).await.unwrap_err();
    assert!(matches!(err, DriverError::Parameter(ParameterError::Malformed(_))));

    let all = handle.cmd_dvr("get_resource", Some(json!("DRIVER_PARAMETER_ALL"))).await.unwrap();
    assert_eq!(all, json!({"TELBAUD": 19200, "MAXRATE": 1}));
    assert_eq!(sim.sent(), vec![b"show telbaud\n".to_vec(), b"show maxrate\n".to_vec()]);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_all_with_unknown_name_fails_whole_call() {
    let (handle, sim, _publisher) = command_mode().await;
    let err = handle
        .cmd_dvr("get_resource", Some(json!(["DRIVER_PARAMETER_ALL", "bogus_param"])))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::Parameter(ParameterError::Unknown(_))));
    assert!(sim.sent().is_empty());

    let values = handle.cmd_dvr("get_resource", Some(json!(["MAXRATE", "DRIVER_PARAMETER_ALL"]))).await.unwrap();
    assert_eq!(values, json!({"TELBAUD": 19200, "MAXRATE": 1}));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_integral_float_baud_accepted() {
    let (handle, sim, _publisher) = command_mode().await;
    let reply = handle.cmd_dvr("set_resource", Some(json!({"TELBAUD": 9600.0}))).await.unwrap();
    assert_eq!(reply, json!({"TELBAUD": 9600}));
    assert_eq!(sim.sent()[0], b"set telbaud 9600\n".to_vec());
    handle.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_requests_do_not_interleave() {
    let (handle, sim, _publisher) = command_mode().await;
    let other = handle.clone();
    let entries = json!({"TELBAUD": 4800, "MAXRATE": 2}).as_object().cloned().unwrap();

    let (set, get) = tokio::join!(handle.set_resource(entries), other.get_config());
    set.unwrap();
    let values = Value::Object(get.unwrap());

    let set_bytes = vec![b"set telbaud 4800\n".to_vec(), b"set maxrate 2\n".to_vec(), b"save\n".to_vec()];
    let get_bytes = vec![b"show telbaud\n".to_vec(), b"show maxrate\n".to_vec()];
    let sent = sim.sent();
    if sent[0] == set_bytes[0] {
        assert_eq!(sent, [set_bytes, get_bytes].concat());
        assert_eq!(values, json!({"TELBAUD": 4800, "MAXRATE": 2}));
    } else {
        assert_eq!(sent, [get_bytes, set_bytes].concat());
        assert_eq!(values, json!({"TELBAUD": 19200, "MAXRATE": 1}));
    }
    handle.shutdown().await;
}
