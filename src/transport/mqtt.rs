//! # MQTT v3.1.1 Binding
//!
//! One topic per channel, QoS 0/1/2 mapped natively. Inbound publishes are
//! pushed from the event-loop task; delivery tokens for QoS 1/2 resolve from
//! PUBACK/PUBCOMP, which the broker returns in send order per connection.
//!
//! `rumqttc` reconnects transparently by re-polling the event loop; the
//! binding surfaces no state change for transient drops. Only an explicit
//! `disconnect()` stops the loop.

use crate::config::{ConnectorParameter, QoS};
use crate::error::{constants, ConnectorError, Result};
use crate::transport::binding::{DeliveryToken, InboundSender, TransportBinding};
use crate::transport::tls;
use crate::utils::timeout::RECONNECT_DELAY;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Transport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Maximum MQTT topic length in bytes.
pub(crate) const MAX_CHANNEL_LEN: usize = 65_535;

/// Event-loop request queue capacity.
pub(crate) const CLIENT_CAPACITY: usize = 64;

/// `rumqttc` rejects shorter keep-alive intervals.
pub(crate) const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Pending acknowledgment waiters, FIFO per QoS level. PUBACK/PUBCOMP arrive
/// in publish order on one connection, so the front waiter is always next.
///
/// Senders must hold the [`lock_sends`](Self::lock_sends) gate across
/// push-waiter + publish: the back entry then always belongs to the sender
/// currently publishing, so a failed publish can remove exactly its own
/// waiter and never a concurrent sender's.
#[derive(Default)]
pub(crate) struct AckWaiters {
    gate: tokio::sync::Mutex<()>,
    qos1: Mutex<VecDeque<oneshot::Sender<Result<()>>>>,
    qos2: Mutex<VecDeque<oneshot::Sender<Result<()>>>>,
}

impl AckWaiters {
    /// Serializes the push-waiter + publish critical section across senders.
    pub(crate) async fn lock_sends(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    pub(crate) fn push(&self, qos: QoS, tx: oneshot::Sender<Result<()>>) {
        let queue = match qos {
            QoS::AtLeastOnce => &self.qos1,
            QoS::ExactlyOnce => &self.qos2,
            QoS::AtMostOnce => return,
        };
        queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(tx);
    }

    pub(crate) fn pop_unsent(&self, qos: QoS) {
        let queue = match qos {
            QoS::AtLeastOnce => &self.qos1,
            QoS::ExactlyOnce => &self.qos2,
            QoS::AtMostOnce => return,
        };
        queue.lock().unwrap_or_else(|e| e.into_inner()).pop_back();
    }

    pub(crate) fn resolve_qos1(&self) {
        if let Some(tx) = self
            .qos1
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            let _ = tx.send(Ok(()));
        }
    }

    pub(crate) fn resolve_qos2(&self) {
        if let Some(tx) = self
            .qos2
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            let _ = tx.send(Ok(()));
        }
    }

    pub(crate) fn fail_all(&self, reason: &str) {
        for queue in [&self.qos1, &self.qos2] {
            let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
            while let Some(tx) = queue.pop_front() {
                let _ = tx.send(Err(ConnectorError::Transport(reason.to_string())));
            }
        }
    }
}

fn map_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

pub(crate) fn validate_topic(channel: &str) -> Result<()> {
    if channel.is_empty() {
        return Err(ConnectorError::InvalidConfiguration(
            constants::ERR_EMPTY_CHANNEL.to_string(),
        ));
    }
    if channel.len() > MAX_CHANNEL_LEN {
        return Err(ConnectorError::InvalidConfiguration(format!(
            "channel exceeds {MAX_CHANNEL_LEN} bytes"
        )));
    }
    if channel.contains('+') || channel.contains('#') {
        return Err(ConnectorError::InvalidConfiguration(format!(
            "channel '{channel}' must not contain MQTT wildcards"
        )));
    }
    Ok(())
}

fn build_options(params: &ConnectorParameter, infix: &str) -> (MqttOptions, bool) {
    let mut options = MqttOptions::new(params.client_id(infix), params.host(), params.port());
    // persistent session: after a transient drop the broker keeps the
    // subscriptions, so the auto-reconnecting event loop resumes delivery
    options.set_clean_session(false);
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

/// MQTT v3.1.1 binding backed by `rumqttc`.
#[derive(Default)]
pub struct MqttBinding {
    client: Mutex<Option<AsyncClient>>,
    acks: Arc<AckWaiters>,
    stopping: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    enabled: Mutex<Vec<String>>,
}

impl MqttBinding {
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

    /// Drives the event loop until the broker confirms the session.
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
                        if inbound
                            .send((publish.topic.clone(), publish.payload.to_vec()))
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
                        warn!(error = %e, "mqtt event loop error, reconnecting");
                        acks.fail_all(constants::ERR_ACK_CHANNEL_CLOSED);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
            debug!("mqtt event loop ended");
        })
    }
}

#[async_trait]
impl TransportBinding for MqttBinding {
    fn name(&self) -> &'static str {
        "mqtt-v3"
    }

    fn validate_channel(&self, channel: &str) -> Result<()> {
        validate_topic(channel)
    }

    async fn connect(&self, params: &ConnectorParameter, inbound: InboundSender) -> Result<()> {
        let (options, encrypted) = build_options(params, "mqtt");
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
            .subscribe(channel, rumqttc::QoS::AtLeastOnce)
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
