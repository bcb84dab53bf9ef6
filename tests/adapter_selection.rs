//! Integration tests for deterministic adapter selection

#![allow(clippy::expect_used, clippy::unwrap_used)]

use machine_connector::{
    AdapterPipeline, ChannelProtocolAdapter, ConnectorError, FnSelector, JsonSerializer,
    SerializerRegistry, SimpleChannelAdapter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Telegram {
    kind: u8,
    body: String,
}

fn registry() -> Arc<SerializerRegistry> {
    let r = SerializerRegistry::new();
    r.register(JsonSerializer::<Telegram>::new());
    Arc::new(r)
}

fn two_adapters() -> Vec<Arc<dyn ChannelProtocolAdapter<Telegram, Telegram>>> {
    vec![
        Arc::new(SimpleChannelAdapter::new("status-out", "status-in")),
        Arc::new(SimpleChannelAdapter::new("alarm-out", "alarm-in")),
    ]
}

/// Routes by the telegram kind: even to adapter 0, odd to adapter 1.
fn kind_selector() -> FnSelector<Telegram> {
    FnSelector::new(
        |channel| match channel {
            "status-out" => Some(0),
            "alarm-out" => Some(1),
            _ => None,
        },
        |t: &Telegram| Some(usize::from(t.kind % 2)),
    )
}

#[test]
fn test_two_adapters_without_selector_fail_construction() {
    let result = AdapterPipeline::new(registry(), two_adapters(), None);
    match result {
        Err(ConnectorError::InvalidConfiguration(msg)) => {
            assert!(msg.contains("selector"));
        }
        _ => panic!("ambiguous configuration must be rejected"),
    }
}

#[test]
fn test_outbound_selection_is_deterministic() {
    let pipeline =
        AdapterPipeline::new(registry(), two_adapters(), Some(Box::new(kind_selector())))
            .unwrap();

    // repeated encodes of the same value always pick the same channel
    for _ in 0..100 {
        let (channel, _) = pipeline
            .encode(Telegram {
                kind: 2,
                body: "running".into(),
            })
            .unwrap();
        assert_eq!(channel, "status-in");

        let (channel, _) = pipeline
            .encode(Telegram {
                kind: 3,
                body: "overtemp".into(),
            })
            .unwrap();
        assert_eq!(channel, "alarm-in");
    }
}

#[test]
fn test_inbound_selection_routes_by_channel() {
    let pipeline =
        AdapterPipeline::new(registry(), two_adapters(), Some(Box::new(kind_selector())))
            .unwrap();

    let telegram = Telegram {
        kind: 1,
        body: "alarm".into(),
    };
    let payload = serde_json::to_vec(&telegram).unwrap();

    assert_eq!(pipeline.decode("alarm-out", &payload).unwrap(), telegram);
    assert_eq!(pipeline.decode("status-out", &payload).unwrap(), telegram);
    assert!(pipeline.decode("unknown-out", &payload).is_err());
}

#[test]
fn test_channel_union_spans_all_adapters() {
    let pipeline =
        AdapterPipeline::new(registry(), two_adapters(), Some(Box::new(kind_selector())))
            .unwrap();
    assert_eq!(pipeline.output_channels(), vec!["alarm-out", "status-out"]);
    assert_eq!(pipeline.input_channels(), vec!["status-in", "alarm-in"]);
}

#[test]
fn test_selector_index_out_of_range_is_reported() {
    let selector = FnSelector::new(|_| Some(9), |_: &Telegram| Some(9));
    let pipeline =
        AdapterPipeline::new(registry(), two_adapters(), Some(Box::new(selector))).unwrap();

    assert!(matches!(
        pipeline.encode(Telegram {
            kind: 0,
            body: String::new()
        }),
        Err(ConnectorError::InvalidConfiguration(_))
    ));
}
