//! Integration tests for the connector lifecycle state machine
//!
//! Runs against the in-process loopback binding, so no broker is needed.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use machine_connector::transport::MemoryBus;
use machine_connector::{
    AdapterPipeline, ChannelConnector, ConnectionState, ConnectorError,
    ConnectorParameterBuilder, FnCallback, JsonSerializer, KeystoreDescriptor,
    SerializerRegistry, SimpleChannelAdapter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    value: i64,
}

fn connector(bus: &MemoryBus) -> ChannelConnector<Reading, Reading> {
    let registry = Arc::new(SerializerRegistry::new());
    registry.register(JsonSerializer::<Reading>::new());
    let pipeline = AdapterPipeline::single(
        registry,
        Arc::new(SimpleChannelAdapter::<Reading, Reading>::new("data", "data")),
    )
    .expect("pipeline");
    ChannelConnector::new(Arc::new(bus.binding()), pipeline)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within bounded wait");
}

#[tokio::test]
async fn test_connect_and_disconnect_transitions() {
    let bus = MemoryBus::new();
    let mut c = connector(&bus);
    assert_eq!(c.state(), ConnectionState::Disconnected);

    c.connect(ConnectorParameterBuilder::new("local", 1).build())
        .await
        .expect("connect");
    assert_eq!(c.state(), ConnectionState::Connected);

    c.disconnect().await.expect("disconnect");
    assert_eq!(c.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let bus = MemoryBus::new();
    let mut c = connector(&bus);

    // never connected
    c.disconnect().await.expect("no-op disconnect");

    c.connect(ConnectorParameterBuilder::new("local", 1).build())
        .await
        .unwrap();
    c.disconnect().await.expect("first disconnect");
    c.disconnect().await.expect("second disconnect");
    c.disconnect().await.expect("third disconnect");
    assert_eq!(c.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_invalid_parameters_keep_the_connector_disconnected() {
    let bus = MemoryBus::new();
    let mut c = connector(&bus);
    let result = c
        .connect(ConnectorParameterBuilder::new("", 0).build())
        .await;
    assert!(matches!(
        result,
        Err(ConnectorError::InvalidConfiguration(_))
    ));
    assert_eq!(c.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_after_failed_attempt() {
    let bus = MemoryBus::new();
    let mut c = connector(&bus);
    let _ = c
        .connect(ConnectorParameterBuilder::new("", 0).build())
        .await;
    c.connect(ConnectorParameterBuilder::new("local", 1).build())
        .await
        .expect("retry after failure");
    assert_eq!(c.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_send_requires_connected_state() {
    let bus = MemoryBus::new();
    let c = connector(&bus);
    let result = c.sync_send(Reading { value: 1 }).await;
    assert!(matches!(result, Err(ConnectorError::Transport(_))));
}

#[tokio::test]
async fn test_tls_soft_failure_still_connects_unencrypted() {
    let bus = MemoryBus::new();
    let mut c = connector(&bus);
    let params = ConnectorParameterBuilder::new("local", 1)
        .keystore(KeystoreDescriptor::new("/nonexistent/ca.pem"))
        .build();

    c.connect(params).await.expect("soft TLS failure");
    assert_eq!(c.state(), ConnectionState::Connected);
    assert!(c.enabled_encryption().is_empty());
    assert!(c.supported_encryption().contains(&"TLSv1.2".to_string()));
}

#[tokio::test]
async fn test_dropped_payloads_are_counted_not_fatal() {
    let bus = MemoryBus::new();
    let mut receiver = connector(&bus);
    let mut sender = connector(&bus);

    // no callback registered on the receiver
    receiver
        .connect(ConnectorParameterBuilder::new("local", 1).build())
        .await
        .unwrap();
    sender
        .connect(ConnectorParameterBuilder::new("local", 1).build())
        .await
        .unwrap();

    sender.sync_send(Reading { value: 42 }).await.unwrap();
    wait_until(|| receiver.metrics().snapshot().dropped_no_callback == 1).await;
    assert_eq!(receiver.metrics().snapshot().messages_received, 0);
    assert_eq!(receiver.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_detach_reception_callback_stops_dispatch() {
    let bus = MemoryBus::new();
    let mut receiver = connector(&bus);
    let mut sender = connector(&bus);

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    receiver.set_reception_callback(
        "data",
        Arc::new(FnCallback(move |r: Reading| {
            sink.lock().unwrap().push(r.value)
        })),
    );

    receiver
        .connect(ConnectorParameterBuilder::new("local", 1).build())
        .await
        .unwrap();
    sender
        .connect(ConnectorParameterBuilder::new("local", 1).build())
        .await
        .unwrap();

    sender.sync_send(Reading { value: 1 }).await.unwrap();
    wait_until(|| seen.lock().unwrap().len() == 1).await;

    receiver.detach_reception_callback("data");
    sender.sync_send(Reading { value: 2 }).await.unwrap();
    wait_until(|| receiver.metrics().snapshot().dropped_no_callback == 1).await;
    assert_eq!(*seen.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn test_metrics_track_both_directions() {
    let bus = MemoryBus::new();
    let mut receiver = connector(&bus);
    let mut sender = connector(&bus);

    receiver.set_reception_callback("data", Arc::new(FnCallback(|_: Reading| {})));
    receiver
        .connect(ConnectorParameterBuilder::new("local", 1).build())
        .await
        .unwrap();
    sender
        .connect(ConnectorParameterBuilder::new("local", 1).build())
        .await
        .unwrap();

    for value in 0..5 {
        sender.sync_send(Reading { value }).await.unwrap();
    }
    wait_until(|| receiver.metrics().snapshot().messages_received == 5).await;
    assert_eq!(sender.metrics().snapshot().messages_sent, 5);
    assert_eq!(sender.metrics().snapshot().send_errors, 0);
}
