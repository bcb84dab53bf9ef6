//! Protocol-independent connector core: serializers, adapters and the
//! lifecycle state machine.

pub mod adapter;
pub mod connector;
pub mod serialization;

pub use adapter::{
    AdapterPipeline, ChannelAdapterSelector, ChannelProtocolAdapter, FnSelector,
    SimpleChannelAdapter,
};
pub use connector::{
    ChannelConnector, ConnectionState, ConnectorSender, FnCallback, ReceptionCallback,
};
pub use serialization::{BincodeSerializer, JsonSerializer, Serializer, SerializerRegistry};
