//! # Transport Binding Contract
//!
//! A binding is the protocol-specific half of a connector. The generic core
//! consumes exactly these primitives: connect/disconnect, per-channel
//! subscribe/unsubscribe, a byte write returning a [`DeliveryToken`], and an
//! inbound hook — the [`InboundSender`] handed over at connect time, fed by
//! the binding's own I/O task with `(channel, payload)` pairs.
//!
//! Library-specific errors never cross this boundary; bindings wrap them
//! into [`ConnectorError`](crate::error::ConnectorError) kinds.

use crate::config::{ConnectorParameter, QoS};
use crate::error::{constants, ConnectorError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Queue fed by a binding's I/O task and drained by the connector's
/// dispatch loop.
pub type InboundSender = mpsc::Sender<(String, Vec<u8>)>;

/// Receiving side of the inbound queue, owned by the connector core.
pub type InboundReceiver = mpsc::Receiver<(String, Vec<u8>)>;

/// How a binding delivers inbound data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// The binding pushes from its own I/O task (MQTT, AMQP, serial).
    Push,
    /// The binding must be polled via [`TransportBinding::read`]
    /// (REST-style); the connector installs a poll task.
    Poll,
}

/// Opaque handle representing a pending protocol-level acknowledgment.
///
/// Bindings without a native acknowledgment (serial, polling, loopback)
/// return an already-resolved token so callers can wait uniformly.
#[derive(Debug)]
pub struct DeliveryToken {
    inner: TokenInner,
}

#[derive(Debug)]
enum TokenInner {
    Resolved,
    Pending(oneshot::Receiver<Result<()>>),
}

impl DeliveryToken {
    /// A token that resolves immediately.
    pub fn resolved() -> Self {
        Self {
            inner: TokenInner::Resolved,
        }
    }

    /// A pending token and the sender its binding resolves it through.
    pub fn pending() -> (Self, oneshot::Sender<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner: TokenInner::Pending(rx),
            },
            tx,
        )
    }

    /// Blocks the caller until the token resolves or `timeout` elapses,
    /// failing with [`ConnectorError::Timeout`] on expiry. The connection
    /// is not affected by an expired wait.
    pub async fn wait_for_completion(self, timeout: Duration) -> Result<()> {
        match self.inner {
            TokenInner::Resolved => Ok(()),
            TokenInner::Pending(rx) => {
                match tokio::time::timeout(timeout, rx).await {
                    Err(_) => Err(ConnectorError::Timeout(timeout)),
                    // binding dropped the sender without resolving
                    Ok(Err(_)) => Err(ConnectorError::Transport(
                        constants::ERR_ACK_CHANNEL_CLOSED.to_string(),
                    )),
                    Ok(Ok(result)) => result,
                }
            }
        }
    }
}

/// Protocol-specific implementation plugged into the generic connector.
///
/// Bindings use interior mutability for their client state so that sends and
/// the inbound I/O task can run concurrently; the connector core serializes
/// connect/disconnect itself.
#[async_trait]
pub trait TransportBinding: Send + Sync {
    /// Human-readable binding name for logs.
    fn name(&self) -> &'static str;

    /// How this binding delivers inbound data.
    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::Push
    }

    /// Validates a channel name against protocol limits. Called by the core
    /// before subscribe and write.
    fn validate_channel(&self, channel: &str) -> Result<()> {
        if channel.is_empty() {
            return Err(ConnectorError::InvalidConfiguration(
                constants::ERR_EMPTY_CHANNEL.to_string(),
            ));
        }
        Ok(())
    }

    /// The QoS level this binding actually provides for `requested`.
    /// Bindings that approximate a level downgrade here visibly instead of
    /// silently (e.g. AMQP exactly-once to at-least-once).
    fn effective_qos(&self, requested: QoS) -> QoS {
        requested
    }

    /// Opens the physical connection. TLS setup failures are soft: the
    /// binding logs a warning and continues unencrypted.
    async fn connect(&self, params: &ConnectorParameter, inbound: InboundSender) -> Result<()>;

    /// Subscribes/binds one output channel on the open connection.
    async fn subscribe(&self, channel: &str) -> Result<()>;

    /// Unsubscribes one channel; `delete` additionally removes broker-side
    /// resources where the protocol supports that.
    async fn unsubscribe(&self, channel: &str, delete: bool) -> Result<()>;

    /// Writes a payload to `channel`, returning the delivery token.
    async fn write(&self, channel: &str, payload: Vec<u8>, qos: QoS) -> Result<DeliveryToken>;

    /// Closes the physical connection and stops the binding's I/O task.
    async fn disconnect(&self) -> Result<()>;

    /// Polls for inbound data ([`DeliveryMode::Poll`] bindings only).
    /// Push bindings keep the default, which never yields data.
    async fn read(&self) -> Result<Option<(String, Vec<u8>)>> {
        Ok(None)
    }

    /// Encryption mechanisms this binding can provide.
    fn supported_encryption(&self) -> Vec<String> {
        Vec::new()
    }

    /// Encryption mechanisms actually enabled on the open connection.
    fn enabled_encryption(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolved_token_completes_immediately() {
        let token = DeliveryToken::resolved();
        token
            .wait_for_completion(Duration::from_millis(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pending_token_resolves_when_acknowledged() {
        let (token, tx) = DeliveryToken::pending();
        tx.send(Ok(())).unwrap();
        token
            .wait_for_completion(Duration::from_millis(100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pending_token_times_out() {
        let (token, _tx) = DeliveryToken::pending();
        let result = token.wait_for_completion(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ConnectorError::Timeout(_))));
    }

    #[tokio::test]
    async fn dropped_sender_is_a_transport_error() {
        let (token, tx) = DeliveryToken::pending();
        drop(tx);
        let result = token.wait_for_completion(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ConnectorError::Transport(_))));
    }
}
