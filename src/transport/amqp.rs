//! # AMQP 0.9.1 Binding
//!
//! One auto-delete queue per channel on the default exchange. Subscriptions
//! start a consumer task per queue; deliveries are acknowledged after they
//! were handed to the inbound queue. Publisher confirms back the delivery
//! tokens.
//!
//! AMQP has no native exactly-once: a request for it degrades to
//! at-least-once, visible through `effective_qos` and logged once.

use crate::config::{ConnectorParameter, QoS};
use crate::error::{constants, ConnectorError, Result};
use crate::transport::binding::{DeliveryToken, InboundSender, TransportBinding};
use crate::transport::tls;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    ConfirmSelectOptions, QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// AMQP limits queue names to 255 bytes.
const MAX_CHANNEL_LEN: usize = 255;

struct ConsumerHandle {
    tag: String,
    task: JoinHandle<()>,
}

/// AMQP binding backed by `lapin`.
#[derive(Default)]
pub struct AmqpBinding {
    connection: Mutex<Option<Connection>>,
    chan: Mutex<Option<Channel>>,
    inbound: Mutex<Option<InboundSender>>,
    consumers: Mutex<HashMap<String, ConsumerHandle>>,
    declared: Mutex<HashSet<String>>,
    enabled: Mutex<Vec<String>>,
    degradation_logged: AtomicBool,
}

impl AmqpBinding {
    pub fn new() -> Self {
        Self::default()
    }

    fn chan(&self) -> Result<Channel> {
        self.chan
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ConnectorError::Transport(constants::ERR_NOT_CONNECTED.to_string()))
    }

    /// Declares the queue behind `name` once per connection; both sides of a
    /// channel declare so publish and consume never race queue existence.
    async fn ensure_queue(&self, name: &str) -> Result<()> {
        {
            let declared = self.declared.lock().unwrap_or_else(|e| e.into_inner());
            if declared.contains(name) {
                return Ok(());
            }
        }
        let chan = self.chan()?;
        chan.queue_declare(
            name,
            QueueDeclareOptions {
                auto_delete: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| ConnectorError::Transport(e.to_string()))?;
        self.declared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string());
        Ok(())
    }

    fn build_uri(params: &ConnectorParameter, encrypted: bool) -> Result<AMQPUri> {
        let scheme = if encrypted { "amqps" } else { "amqp" };
        let authority = match params.credentials() {
            Some((user, password)) => format!("{user}:{password}@"),
            None => String::new(),
        };
        let uri = format!(
            "{scheme}://{authority}{host}:{port}/%2f",
            host = params.host(),
            port = params.port()
        );
        AMQPUri::from_str(&uri).map_err(ConnectorError::InvalidConfiguration)
    }
}

#[async_trait]
impl TransportBinding for AmqpBinding {
    fn name(&self) -> &'static str {
        "amqp"
    }

    fn validate_channel(&self, channel: &str) -> Result<()> {
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
        Ok(())
    }

    fn effective_qos(&self, requested: QoS) -> QoS {
        if requested == QoS::ExactlyOnce {
            if !self.degradation_logged.swap(true, Ordering::SeqCst) {
                warn!("exactly-once is not native to AMQP, degrading to at-least-once");
            }
            QoS::AtLeastOnce
        } else {
            requested
        }
    }

    async fn connect(&self, params: &ConnectorParameter, inbound: InboundSender) -> Result<()> {
        let material = tls::resolve(params);
        let encrypted = material.is_some();
        let uri = Self::build_uri(params, encrypted)?;

        let connection = match material {
            Some(material) => {
                if material.client.is_some() {
                    debug!("alias-based client identity is not applied for AMQP");
                }
                let config = lapin::tcp::OwnedTLSConfig {
                    identity: None,
                    cert_chain: Some(String::from_utf8_lossy(&material.ca_pem).into_owned()),
                };
                Connection::connect_uri_with_config(uri, ConnectionProperties::default(), config)
                    .await
            }
            None => Connection::connect_uri(uri, ConnectionProperties::default()).await,
        }
        .map_err(|e| ConnectorError::Connect(e.to_string()))?;

        let chan = connection
            .create_channel()
            .await
            .map_err(|e| ConnectorError::Connect(e.to_string()))?;
        chan.confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| ConnectorError::Connect(e.to_string()))?;

        *self.connection.lock().unwrap_or_else(|e| e.into_inner()) = Some(connection);
        *self.chan.lock().unwrap_or_else(|e| e.into_inner()) = Some(chan);
        *self.inbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(inbound);
        if encrypted {
            *self.enabled.lock().unwrap_or_else(|e| e.into_inner()) =
                vec![tls::TLS_V1_2.to_string()];
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.ensure_queue(channel).await?;
        let chan = self.chan()?;
        let inbound = self
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ConnectorError::Transport(constants::ERR_NOT_CONNECTED.to_string()))?;

        let tag = format!("{channel}-consumer");
        let mut consumer = chan
            .basic_consume(
                channel,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConnectorError::Transport(e.to_string()))?;

        let queue = channel.to_string();
        let task = tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        if inbound
                            .send((queue.clone(), delivery.data.clone()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                            warn!(queue = %queue, error = %e, "cannot ack delivery");
                        }
                    }
                    Err(e) => {
                        warn!(queue = %queue, error = %e, "consumer stream error");
                        break;
                    }
                }
            }
            debug!(queue = %queue, "consumer ended");
        });

        self.consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.to_string(), ConsumerHandle { tag, task });
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str, delete: bool) -> Result<()> {
        let handle = self
            .consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(channel);
        let chan = self.chan()?;
        if let Some(handle) = handle {
            chan.basic_cancel(&handle.tag, BasicCancelOptions::default())
                .await
                .map_err(|e| ConnectorError::Transport(e.to_string()))?;
            handle.task.abort();
        }
        if delete {
            chan.queue_delete(channel, QueueDeleteOptions::default())
                .await
                .map_err(|e| ConnectorError::Transport(e.to_string()))?;
            self.declared
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(channel);
        }
        Ok(())
    }

    async fn write(&self, channel: &str, payload: Vec<u8>, qos: QoS) -> Result<DeliveryToken> {
        self.ensure_queue(channel).await?;
        let chan = self.chan()?;
        let confirm = chan
            .basic_publish(
                "",
                channel,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| ConnectorError::Transport(e.to_string()))?;

        if !qos.requires_ack() {
            return Ok(DeliveryToken::resolved());
        }
        let (token, tx) = DeliveryToken::pending();
        tokio::spawn(async move {
            let result = match confirm.await {
                Ok(Confirmation::Nack(_)) => Err(ConnectorError::Transport(
                    "broker rejected the publish".to_string(),
                )),
                Ok(_) => Ok(()),
                Err(e) => Err(ConnectorError::Transport(e.to_string())),
            };
            let _ = tx.send(result);
        });
        Ok(token)
    }

    async fn disconnect(&self) -> Result<()> {
        let consumers: Vec<ConsumerHandle> = {
            let mut map = self.consumers.lock().unwrap_or_else(|e| e.into_inner());
            map.drain().map(|(_, handle)| handle).collect()
        };
        for handle in consumers {
            handle.task.abort();
        }
        self.declared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self.chan.lock().unwrap_or_else(|e| e.into_inner()) = None;
        *self.inbound.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.enabled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        let connection = self
            .connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(connection) = connection {
            connection
                .close(200, "client disconnect")
                .await
                .map_err(|e| ConnectorError::Transport(e.to_string()))?;
        }
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
