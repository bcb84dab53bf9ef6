//! # Polling Binding
//!
//! For request/response endpoints (REST-style) without a push path. The
//! protocol work lives in a [`PollSource`]; the binding reports
//! [`DeliveryMode::Poll`] so the connector drives `read()` from its poll
//! task at the configured notification interval.

use crate::config::{ConnectorParameter, QoS};
use crate::error::{constants, ConnectorError, Result};
use crate::transport::binding::{DeliveryMode, DeliveryToken, InboundSender, TransportBinding};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Request/response collaborator behind a [`PollingBinding`].
#[async_trait]
pub trait PollSource: Send + Sync {
    /// Opens the underlying endpoint (session setup, base URL checks).
    async fn open(&self, _params: &ConnectorParameter) -> Result<()> {
        Ok(())
    }

    /// Fetches at most one pending `(channel, payload)` pair. `Ok(None)`
    /// means nothing new; the poll task asks again next interval.
    async fn fetch(&self) -> Result<Option<(String, Vec<u8>)>>;

    /// Pushes one payload to `channel` (typically an HTTP write).
    async fn send(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Releases the endpoint.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Binding that adapts a [`PollSource`] to the connector contract.
pub struct PollingBinding {
    source: Arc<dyn PollSource>,
    connected: AtomicBool,
}

impl PollingBinding {
    pub fn new(source: Arc<dyn PollSource>) -> Self {
        Self {
            source,
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectorError::Transport(
                constants::ERR_NOT_CONNECTED.to_string(),
            ))
        }
    }
}

#[async_trait]
impl TransportBinding for PollingBinding {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::Poll
    }

    async fn connect(&self, params: &ConnectorParameter, _inbound: InboundSender) -> Result<()> {
        // inbound data only flows through read(), the sender is unused
        self.source.open(params).await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, _channel: &str) -> Result<()> {
        // fetch() decides what arrives, there is nothing to subscribe
        Ok(())
    }

    async fn unsubscribe(&self, _channel: &str, _delete: bool) -> Result<()> {
        Ok(())
    }

    async fn write(&self, channel: &str, payload: Vec<u8>, _qos: QoS) -> Result<DeliveryToken> {
        self.ensure_connected()?;
        self.source.send(channel, payload).await?;
        // the request/response cycle is the acknowledgment
        Ok(DeliveryToken::resolved())
    }

    async fn read(&self) -> Result<Option<(String, Vec<u8>)>> {
        self.ensure_connected()?;
        self.source.fetch().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.source.close().await
    }
}
