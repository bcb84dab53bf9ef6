//! # Machine Connector
//!
//! Uniform, typed data exchange between an industrial platform and external
//! machines or brokers over heterogeneous wire protocols.
//!
//! ## Features
//! - **Lifecycle**: explicit connect/disconnect state machine with bounded
//!   handshakes and idempotent teardown
//! - **Adapters**: channel-based translation between protocol payloads and
//!   typed application data, with deterministic multi-adapter selection
//! - **Serialization**: pluggable per-type serializers (JSON, bincode) behind
//!   a thread-safe registry
//! - **QoS**: at-most-once / at-least-once / exactly-once with delivery
//!   tokens backed by protocol acknowledgments
//! - **Bindings**: MQTT v3/v5 (`rumqttc`), AMQP (`lapin`), serial
//!   (`tokio-serial`), REST-style polling, and an in-process loopback bus
//!
//! ## Quick Example
//! ```no_run
//! use std::sync::Arc;
//! use machine_connector::{
//!     AdapterPipeline, ChannelConnector, ConnectorParameterBuilder, FnCallback,
//!     JsonSerializer, SerializerRegistry, SimpleChannelAdapter,
//! };
//! use machine_connector::transport::MemoryBus;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Reading { sensor: String, value: f64 }
//!
//! #[tokio::main]
//! async fn main() -> machine_connector::Result<()> {
//!     let registry = Arc::new(SerializerRegistry::new());
//!     registry.register(JsonSerializer::<Reading>::new());
//!
//!     let pipeline = AdapterPipeline::single(
//!         registry,
//!         Arc::new(SimpleChannelAdapter::<Reading, Reading>::new("data", "cmd")),
//!     )?;
//!     let bus = MemoryBus::new();
//!     let mut connector = ChannelConnector::new(Arc::new(bus.binding()), pipeline);
//!     connector.set_reception_callback(
//!         "data",
//!         Arc::new(FnCallback(|r: Reading| println!("{} = {}", r.sensor, r.value))),
//!     );
//!     connector
//!         .connect(ConnectorParameterBuilder::new("localhost", 1883).build())
//!         .await?;
//!     connector.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod transport;
pub mod utils;

pub use crate::config::{
    CloseAction, ConnectorParameter, ConnectorParameterBuilder, KeystoreDescriptor, QoS,
    SettingValue,
};
pub use crate::core::{
    AdapterPipeline, BincodeSerializer, ChannelAdapterSelector, ChannelConnector,
    ChannelProtocolAdapter, ConnectionState, ConnectorSender, FnCallback, FnSelector,
    JsonSerializer, ReceptionCallback, Serializer, SerializerRegistry, SimpleChannelAdapter,
};
pub use crate::error::{ConnectorError, Result};
pub use crate::transport::{DeliveryMode, DeliveryToken, TransportBinding};
pub use crate::utils::metrics::{ConnectorMetrics, MetricsSnapshot};
