//! End-to-end scenario over the in-process bus
//!
//! A connector takes products on `prod` and answers each one with a command
//! on `cmd`, sending synchronously from inside its reception callback. An
//! external peer publishes two products and must observe the two matching
//! commands in publish order within a bounded wait.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use async_trait::async_trait;
use machine_connector::transport::MemoryBus;
use machine_connector::{
    AdapterPipeline, ChannelConnector, ConnectorParameterBuilder, ConnectorSender, FnCallback,
    JsonSerializer, QoS, ReceptionCallback, SerializerRegistry, SimpleChannelAdapter,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Product {
    description: String,
    price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Command {
    command: String,
}

fn shared_registry() -> Arc<SerializerRegistry> {
    let registry = SerializerRegistry::new();
    registry.register(JsonSerializer::<Product>::new());
    registry.register(JsonSerializer::<Command>::new());
    Arc::new(registry)
}

/// Connector under test: receives products on `prod`, sends commands on `cmd`.
fn machine(
    bus: &MemoryBus,
    registry: Arc<SerializerRegistry>,
) -> ChannelConnector<Product, Command> {
    let pipeline = AdapterPipeline::single(
        registry,
        Arc::new(SimpleChannelAdapter::<Product, Command>::new("prod", "cmd")),
    )
    .expect("machine pipeline");
    ChannelConnector::new(Arc::new(bus.binding()), pipeline)
}

/// External peer: publishes products on `prod`, observes commands on `cmd`.
fn peer(bus: &MemoryBus, registry: Arc<SerializerRegistry>) -> ChannelConnector<Command, Product> {
    let pipeline = AdapterPipeline::single(
        registry,
        Arc::new(SimpleChannelAdapter::<Command, Product>::new("cmd", "prod")),
    )
    .expect("peer pipeline");
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

/// Answers each product with the matching command, from inside the callback.
struct ProductHandler {
    sender: Arc<Mutex<Option<ConnectorSender<Product, Command>>>>,
}

#[async_trait]
impl ReceptionCallback<Product> for ProductHandler {
    async fn received(&self, product: Product) {
        let sender = self.sender.lock().unwrap().clone();
        if let Some(sender) = sender {
            sender
                .sync_send(Command {
                    command: product.description,
                })
                .await
                .expect("command answer");
        }
    }
}

#[tokio::test]
async fn test_product_callback_answers_commands_in_order() {
    let bus = MemoryBus::new();
    let registry = shared_registry();

    let mut machine = machine(&bus, registry.clone());
    let mut peer = peer(&bus, registry);

    let machine_sender = Arc::new(Mutex::new(None));
    machine.set_reception_callback(
        "prod",
        Arc::new(ProductHandler {
            sender: machine_sender.clone(),
        }),
    );

    let commands_seen: Arc<Mutex<Vec<Command>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = commands_seen.clone();
    peer.set_reception_callback(
        "cmd",
        Arc::new(FnCallback(move |c: Command| sink.lock().unwrap().push(c))),
    );

    machine
        .connect(ConnectorParameterBuilder::new("local", 1).build())
        .await
        .expect("machine connect");
    *machine_sender.lock().unwrap() = Some(machine.sender().expect("machine sender"));
    peer.connect(ConnectorParameterBuilder::new("local", 1).build())
        .await
        .expect("peer connect");

    peer.sync_send(Product {
        description: "prod1".into(),
        price: 10.2,
    })
    .await
    .expect("first product");
    peer.sync_send(Product {
        description: "prod2".into(),
        price: 5.1,
    })
    .await
    .expect("second product");

    wait_until(|| commands_seen.lock().unwrap().len() == 2).await;
    let commands = commands_seen.lock().unwrap().clone();
    assert_eq!(commands.len(), 2, "exactly two commands");
    assert_eq!(commands[0].command, "prod1");
    assert_eq!(commands[1].command, "prod2");

    peer.disconnect().await.expect("peer disconnect");
    machine.disconnect().await.expect("machine disconnect");
}

#[tokio::test]
async fn test_at_least_once_preserves_order() {
    let bus = MemoryBus::new();
    let registry = shared_registry();

    let mut machine = machine(&bus, registry.clone());
    let mut peer = peer(&bus, registry);

    let products_seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = products_seen.clone();
    machine.set_reception_callback(
        "prod",
        Arc::new(FnCallback(move |p: Product| {
            sink.lock().unwrap().push(p.description)
        })),
    );

    machine
        .connect(ConnectorParameterBuilder::new("local", 1).build())
        .await
        .unwrap();
    peer.connect(
        ConnectorParameterBuilder::new("local", 1)
            .qos(QoS::AtLeastOnce)
            .build(),
    )
    .await
    .unwrap();

    const N: usize = 50;
    for i in 0..N {
        peer.sync_send(Product {
            description: format!("item-{i}"),
            price: i as f64,
        })
        .await
        .unwrap();
    }

    wait_until(|| products_seen.lock().unwrap().len() == N).await;
    let seen = products_seen.lock().unwrap();
    for (i, description) in seen.iter().enumerate() {
        assert_eq!(description, &format!("item-{i}"));
    }
    assert_eq!(peer.metrics().snapshot().messages_sent, N as u64);
}
