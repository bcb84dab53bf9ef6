//! # Protocol Adapters and the Adapter Pipeline
//!
//! An adapter translates between wire payloads and the connector's domain
//! types for one or more named channels; the pipeline hides the channel
//! topology from the connector core.
//!
//! Type parameters follow the connector convention: `CO` is the connector
//! output (data flowing from the external peer into the platform), `CI` the
//! connector input (data flowing from the platform to the peer).
//!
//! Selection is index-based and deterministic: a
//! [`ChannelAdapterSelector`] maps an inbound channel name or an outbound
//! value to an index into the configured adapter slice, in O(1) or
//! O(#adapters), with no reflection involved, so it is testable in isolation
//! from any protocol binding.

use crate::core::serialization::SerializerRegistry;
use crate::error::{constants, ConnectorError, Result};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Translator between wire payloads and domain types for named channels.
pub trait ChannelProtocolAdapter<CO, CI>: Send + Sync {
    /// Channels this adapter decodes (peer to platform).
    fn output_channels(&self) -> &[String];

    /// Channels this adapter encodes to (platform to peer).
    fn input_channels(&self) -> &[String];

    /// Decodes an inbound payload received on `channel` into a domain value.
    fn adapt_output(
        &self,
        channel: &str,
        payload: &[u8],
        registry: &SerializerRegistry,
    ) -> Result<CO>;

    /// Encodes an outbound domain value, returning the destination channel
    /// and the wire payload.
    fn adapt_input(&self, data: CI, registry: &SerializerRegistry) -> Result<(String, Vec<u8>)>;
}

/// Decides which adapter applies, by inbound channel or by outbound value.
/// Implementations return an index into the adapter slice the pipeline was
/// constructed with; `None` falls back to the channel map (output) or is an
/// error (input).
pub trait ChannelAdapterSelector<CO, CI>: Send + Sync {
    /// Selects the adapter decoding `channel`.
    fn select_output(&self, channel: &str) -> Option<usize>;

    /// Selects the adapter encoding `data`.
    fn select_input(&self, data: &CI) -> Option<usize>;
}

/// Default selector: always the first (single) adapter.
struct FirstAdapterSelector;

impl<CO, CI> ChannelAdapterSelector<CO, CI> for FirstAdapterSelector {
    fn select_output(&self, _channel: &str) -> Option<usize> {
        Some(0)
    }

    fn select_input(&self, _data: &CI) -> Option<usize> {
        Some(0)
    }
}

/// Selector backed by plain functions, convenient for generated wiring.
pub struct FnSelector<CI> {
    output: Box<dyn Fn(&str) -> Option<usize> + Send + Sync>,
    input: Box<dyn Fn(&CI) -> Option<usize> + Send + Sync>,
}

impl<CI> FnSelector<CI> {
    pub fn new(
        output: impl Fn(&str) -> Option<usize> + Send + Sync + 'static,
        input: impl Fn(&CI) -> Option<usize> + Send + Sync + 'static,
    ) -> Self {
        Self {
            output: Box::new(output),
            input: Box::new(input),
        }
    }
}

impl<CO, CI> ChannelAdapterSelector<CO, CI> for FnSelector<CI> {
    fn select_output(&self, channel: &str) -> Option<usize> {
        (self.output)(channel)
    }

    fn select_input(&self, data: &CI) -> Option<usize> {
        (self.input)(data)
    }
}

/// Adapter pipeline: the configured adapters plus the selection strategy.
///
/// Construction fails fast with [`ConnectorError::InvalidConfiguration`] when
/// no adapter is given, when more than one adapter is supplied without a
/// selector, or when two adapters claim the same output channel.
pub struct AdapterPipeline<CO, CI> {
    adapters: Vec<Arc<dyn ChannelProtocolAdapter<CO, CI>>>,
    selector: Box<dyn ChannelAdapterSelector<CO, CI>>,
    /// Structural fast path: output channel name to adapter index.
    channel_map: HashMap<String, usize>,
    registry: Arc<SerializerRegistry>,
}

impl<CO, CI> AdapterPipeline<CO, CI> {
    /// Creates a pipeline from `adapters` and an optional `selector`.
    pub fn new(
        registry: Arc<SerializerRegistry>,
        adapters: Vec<Arc<dyn ChannelProtocolAdapter<CO, CI>>>,
        selector: Option<Box<dyn ChannelAdapterSelector<CO, CI>>>,
    ) -> Result<Self> {
        if adapters.is_empty() {
            return Err(ConnectorError::InvalidConfiguration(
                constants::ERR_NO_ADAPTER.to_string(),
            ));
        }
        let selector = match selector {
            Some(s) => s,
            None if adapters.len() == 1 => Box::new(FirstAdapterSelector),
            None => {
                return Err(ConnectorError::InvalidConfiguration(
                    constants::ERR_AMBIGUOUS_ADAPTER.to_string(),
                ))
            }
        };

        let mut channel_map = HashMap::new();
        for (index, adapter) in adapters.iter().enumerate() {
            for channel in adapter.output_channels() {
                if channel_map.insert(channel.clone(), index).is_some() {
                    return Err(ConnectorError::InvalidConfiguration(format!(
                        "output channel '{channel}' is claimed by more than one adapter"
                    )));
                }
            }
        }

        Ok(Self {
            adapters,
            selector,
            channel_map,
            registry,
        })
    }

    /// Convenience constructor for the single-adapter case.
    pub fn single(
        registry: Arc<SerializerRegistry>,
        adapter: Arc<dyn ChannelProtocolAdapter<CO, CI>>,
    ) -> Result<Self> {
        Self::new(registry, vec![adapter], None)
    }

    /// Union of all output channels (peer to platform), subscribed on connect.
    pub fn output_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channel_map.keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Union of all input channels (platform to peer).
    pub fn input_channels(&self) -> Vec<String> {
        let mut channels = Vec::new();
        for adapter in &self.adapters {
            for channel in adapter.input_channels() {
                if !channels.contains(channel) {
                    channels.push(channel.clone());
                }
            }
        }
        channels
    }

    /// The registry this pipeline serializes through.
    pub fn registry(&self) -> &SerializerRegistry {
        &self.registry
    }

    /// Decodes an inbound payload by selecting the adapter for `channel`.
    pub fn decode(&self, channel: &str, payload: &[u8]) -> Result<CO> {
        let index = self
            .selector
            .select_output(channel)
            .or_else(|| self.channel_map.get(channel).copied())
            .ok_or_else(|| {
                ConnectorError::Deserialize(format!("no adapter decodes channel '{channel}'"))
            })?;
        let adapter = self.adapters.get(index).ok_or_else(|| {
            ConnectorError::InvalidConfiguration(format!(
                "selector returned adapter index {index} out of range"
            ))
        })?;
        adapter.adapt_output(channel, payload, &self.registry)
    }

    /// Encodes an outbound value by selecting the adapter for its runtime
    /// shape, returning the destination channel and payload.
    pub fn encode(&self, data: CI) -> Result<(String, Vec<u8>)> {
        let index = self.selector.select_input(&data).ok_or_else(|| {
            ConnectorError::Serialize("no adapter encodes the given value".to_string())
        })?;
        let adapter = self.adapters.get(index).ok_or_else(|| {
            ConnectorError::InvalidConfiguration(format!(
                "selector returned adapter index {index} out of range"
            ))
        })?;
        adapter.adapt_input(data, &self.registry)
    }
}

/// The common generated-adapter shape: one output channel decoded into `CO`,
/// one input channel encoded from `CI`, both through the registry.
pub struct SimpleChannelAdapter<CO, CI> {
    output_channels: Vec<String>,
    input_channels: Vec<String>,
    _marker: PhantomData<fn(CI) -> CO>,
}

impl<CO, CI> SimpleChannelAdapter<CO, CI> {
    pub fn new<S: Into<String>>(output_channel: S, input_channel: S) -> Self {
        Self {
            output_channels: vec![output_channel.into()],
            input_channels: vec![input_channel.into()],
            _marker: PhantomData,
        }
    }
}

impl<CO, CI> ChannelProtocolAdapter<CO, CI> for SimpleChannelAdapter<CO, CI>
where
    CO: Send + Sync + 'static,
    CI: Send + Sync + 'static,
{
    fn output_channels(&self) -> &[String] {
        &self.output_channels
    }

    fn input_channels(&self) -> &[String] {
        &self.input_channels
    }

    fn adapt_output(
        &self,
        _channel: &str,
        payload: &[u8],
        registry: &SerializerRegistry,
    ) -> Result<CO> {
        registry.get::<CO>()?.from_bytes(payload)
    }

    fn adapt_input(&self, data: CI, registry: &SerializerRegistry) -> Result<(String, Vec<u8>)> {
        let payload = registry.get::<CI>()?.to_bytes(&data)?;
        Ok((self.input_channels[0].clone(), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::serialization::JsonSerializer;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u32,
    }

    fn registry() -> Arc<SerializerRegistry> {
        let r = SerializerRegistry::new();
        r.register(JsonSerializer::<Sample>::new());
        Arc::new(r)
    }

    #[test]
    fn empty_adapter_list_is_rejected() {
        let result: Result<AdapterPipeline<Sample, Sample>> =
            AdapterPipeline::new(registry(), Vec::new(), None);
        assert!(matches!(
            result,
            Err(ConnectorError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn multiple_adapters_without_selector_are_rejected() {
        let adapters: Vec<Arc<dyn ChannelProtocolAdapter<Sample, Sample>>> = vec![
            Arc::new(SimpleChannelAdapter::new("a-out", "a-in")),
            Arc::new(SimpleChannelAdapter::new("b-out", "b-in")),
        ];
        let result = AdapterPipeline::new(registry(), adapters, None);
        assert!(matches!(
            result,
            Err(ConnectorError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn duplicate_output_channels_are_rejected() {
        let adapters: Vec<Arc<dyn ChannelProtocolAdapter<Sample, Sample>>> = vec![
            Arc::new(SimpleChannelAdapter::new("out", "a-in")),
            Arc::new(SimpleChannelAdapter::new("out", "b-in")),
        ];
        let selector = FnSelector::new(|_| Some(0), |_: &Sample| Some(0));
        let result = AdapterPipeline::new(registry(), adapters, Some(Box::new(selector)));
        assert!(matches!(
            result,
            Err(ConnectorError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn single_adapter_encodes_and_decodes() {
        let pipeline: AdapterPipeline<Sample, Sample> = AdapterPipeline::single(
            registry(),
            Arc::new(SimpleChannelAdapter::new("out", "in")),
        )
        .unwrap();

        let (channel, payload) = pipeline.encode(Sample { id: 7 }).unwrap();
        assert_eq!(channel, "in");

        let decoded = pipeline.decode("out", &payload).unwrap();
        assert_eq!(decoded, Sample { id: 7 });
    }

    #[test]
    fn unknown_channel_is_a_decode_error() {
        let adapters: Vec<Arc<dyn ChannelProtocolAdapter<Sample, Sample>>> = vec![
            Arc::new(SimpleChannelAdapter::new("a-out", "a-in")),
            Arc::new(SimpleChannelAdapter::new("b-out", "b-in")),
        ];
        let selector = FnSelector::new(|_: &str| None, |_: &Sample| Some(0));
        let pipeline =
            AdapterPipeline::new(registry(), adapters, Some(Box::new(selector))).unwrap();

        // selector declined, channel map does not know the name either
        assert!(pipeline.decode("c-out", b"{}").is_err());
        // channel map fallback still resolves known channels
        let (_, payload) = pipeline.encode(Sample { id: 1 }).unwrap();
        assert!(pipeline.decode("b-out", &payload).is_ok());
    }

    #[test]
    fn output_channels_are_the_union() {
        let adapters: Vec<Arc<dyn ChannelProtocolAdapter<Sample, Sample>>> = vec![
            Arc::new(SimpleChannelAdapter::new("a-out", "a-in")),
            Arc::new(SimpleChannelAdapter::new("b-out", "b-in")),
        ];
        let selector = FnSelector::new(|_| Some(0), |_: &Sample| Some(0));
        let pipeline =
            AdapterPipeline::new(registry(), adapters, Some(Box::new(selector))).unwrap();
        assert_eq!(pipeline.output_channels(), vec!["a-out", "b-out"]);
        assert_eq!(pipeline.input_channels(), vec!["a-in", "b-in"]);
    }
}
