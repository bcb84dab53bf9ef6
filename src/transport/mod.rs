//! Protocol bindings. The broker-backed ones are feature-gated so consumers
//! only pull the protocol libraries they deploy with.

pub mod binding;
pub mod memory;
pub mod polling;
pub mod tls;

#[cfg(feature = "amqp")]
pub mod amqp;
#[cfg(feature = "mqtt")]
pub mod mqtt;
#[cfg(feature = "mqtt")]
pub mod mqttv5;
#[cfg(feature = "serial")]
pub mod serial;

pub use binding::{DeliveryMode, DeliveryToken, InboundReceiver, InboundSender, TransportBinding};
pub use memory::{MemoryBinding, MemoryBus};
pub use polling::{PollSource, PollingBinding};

#[cfg(feature = "amqp")]
pub use amqp::AmqpBinding;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttBinding;
#[cfg(feature = "mqtt")]
pub use mqttv5::MqttV5Binding;
#[cfg(feature = "serial")]
pub use serial::SerialBinding;
