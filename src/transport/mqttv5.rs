//! # MQTT v5 Binding
//!
//! Same channel/QoS/acknowledgment model as the v3 binding, using
//! `rumqttc`'s v5 client. Topics arrive as raw bytes in v5 and are decoded
//! lossily; non-UTF-8 topics do not occur with well-behaved brokers.

use crate::config::{ConnectorParameter, QoS};
use crate::error::{constants, ConnectorError, Result};
use crate::transport::binding::{DeliveryToken, InboundSender, TransportBinding};
use crate::transport::mqtt::{validate_topic, AckWaiters, CLIENT_CAPACITY, MIN_KEEP_ALIVE};
use crate::transport::tls;
use crate::utils::timeout::RECONNECT_DELAY;
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::mqttbytes::QoS as MqttQoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

fn map_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

fn build_options(params: &ConnectorParameter) -> (MqttOptions, bool) {
    let mut options = MqttOptions::new(params.client_id("mqttv5"), params.host(), params.port());
    // persistent session: after a transient drop the broker keeps the
    // subscriptions, so the auto-reconnecting event loop resumes delivery
    options.set_clean_start(false);
    if !params.keep_alive().is_zero() {
        options.set_keep_alive(params.keep_alive().max(MIN_KEEP_ALIVE));
    }
    if let Some((user, password)) = params.credentials() {
        options.set_credentials(user, password);
    }
    let mut encrypted = false;
    if let Some(material) = tls::resolve(params) {
        options.set_transport(Transport::Tls(rumqttc::TlsConfiguration::Simple {
            ca: material.ca_pem,
            alpn: None,
            client_auth: material.client,
        }));
        encrypted = true;
    }
    (options, encrypted)
}

/// MQTT v5 binding backed by `rumqttc::v5`.
#[derive(Default)]
pub struct MqttV5Binding {
    client: Mutex<Option<AsyncClient>>,
    acks: Arc<AckWaiters>,
    stopping: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    enabled: Mutex<Vec<String>>,
}

impl MqttV5Binding {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> Result<AsyncClient> {
        self.client
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ConnectorError::Transport(constants::ERR_NOT_CONNECTED.to_string()))
    }

    async fn await_connack(eventloop: &mut EventLoop) -> Result<()> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(ConnectorError::Connect(e.to_string())),
            }
        }
    }

    fn spawn_event_loop(
        &self,
        mut eventloop: EventLoop,
        inbound: InboundSender,
    ) -> JoinHandle<()> {
        let acks = self.acks.clone();
        let stopping = self.stopping.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let topic = String::from_utf8_lossy(&publish.topic).into_owned();
                        if inbound
                            .send((topic, publish.payload.to_vec()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => acks.resolve_qos1(),
                    Ok(Event::Incoming(Packet::PubComp(_))) => acks.resolve_qos2(),
                    Ok(_) => {}
                    Err(e) => {
                        if stopping.load(Ordering::SeqCst) {
                            break;
                        }
                        warn!(error = %e, "mqtt v5 event loop error, reconnecting");
                        acks.fail_all(constants::ERR_ACK_CHANNEL_CLOSED);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
            debug!("mqtt v5 event loop ended");
        })
    }
}

#[async_trait]
impl TransportBinding for MqttV5Binding {
    fn name(&self) -> &'static str {
        "mqtt-v5"
    }

    fn validate_channel(&self, channel: &str) -> Result<()> {
        validate_topic(channel)
    }

    async fn connect(&self, params: &ConnectorParameter, inbound: InboundSender) -> Result<()> {
        let (options, encrypted) = build_options(params);
        let (client, mut eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);
        Self::await_connack(&mut eventloop).await?;

        self.stopping.store(false, Ordering::SeqCst);
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(self.spawn_event_loop(eventloop, inbound));
        *self.client.lock().unwrap_or_else(|e| e.into_inner()) = Some(client);
        if encrypted {
            *self.enabled.lock().unwrap_or_else(|e| e.into_inner()) =
                vec![tls::TLS_V1_2.to_string()];
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.client()?
            .subscribe(channel, MqttQoS::AtLeastOnce)
            .await
            .map_err(|e| ConnectorError::Transport(e.to_string()))
    }

    async fn unsubscribe(&self, channel: &str, delete: bool) -> Result<()> {
        if delete {
            debug!(channel, "mqtt has no broker-side channel deletion, unsubscribing only");
        }
        self.client()?
            .unsubscribe(channel)
            .await
            .map_err(|e| ConnectorError::Transport(e.to_string()))
    }

    async fn write(&self, channel: &str, payload: Vec<u8>, qos: QoS) -> Result<DeliveryToken> {
        let client = self.client()?;
        if !qos.requires_ack() {
            client
                .publish(channel, map_qos(qos), false, payload)
                .await
                .map_err(|e| ConnectorError::Transport(e.to_string()))?;
            return Ok(DeliveryToken::resolved());
        }
        let (token, tx) = DeliveryToken::pending();
        // gate held across push + publish: a failed publish pops its own
        // waiter, never one pushed by a concurrent sender
        let _gate = self.acks.lock_sends().await;
        self.acks.push(qos, tx);
        if let Err(e) = client.publish(channel, map_qos(qos), false, payload).await {
            self.acks.pop_unsent(qos);
            return Err(ConnectorError::Transport(e.to_string()));
        }
        Ok(token)
    }

    async fn disconnect(&self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        let client = self.client.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(client) = client {
            let _ = client.disconnect().await;
        }
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        self.acks.fail_all(constants::ERR_ACK_CHANNEL_CLOSED);
        self.enabled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    fn supported_encryption(&self) -> Vec<String> {
        vec![tls::TLS_V1_2.to_string()]
    }

    fn enabled_encryption(&self) -> Vec<String> {
        self.enabled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_maps_natively() {
        assert_eq!(map_qos(QoS::AtMostOnce), MqttQoS::AtMostOnce);
        assert_eq!(map_qos(QoS::AtLeastOnce), MqttQoS::AtLeastOnce);
        assert_eq!(map_qos(QoS::ExactlyOnce), MqttQoS::ExactlyOnce);
    }

    #[test]
    fn reconnect_keeps_the_broker_session() {
        let params = crate::config::ConnectorParameterBuilder::new("localhost", 1883).build();
        let (options, encrypted) = build_options(&params);
        assert!(!options.clean_start());
        assert!(!encrypted);
    }

    #[test]
    fn v5_shares_topic_rules_with_v3() {
        let binding = MqttV5Binding::new();
        assert!(binding.validate_channel("machine/data").is_ok());
        assert!(binding.validate_channel("machine/#").is_err());
    }
}
