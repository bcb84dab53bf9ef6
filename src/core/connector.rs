//! # Connector Core
//!
//! [`ChannelConnector`] owns one physical connection, drives the lifecycle
//! state machine and routes data through the adapter pipeline:
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> CONNECTED -> DISCONNECTING -> DISCONNECTED
//!                     |             |
//!                     +---- failure +----> DISCONNECTED
//! ```
//!
//! Inbound payloads arrive on a bounded queue fed by the binding's I/O task
//! and are drained by one connector-owned dispatch loop, so a binding's
//! native threading model never leaks into callback code. Per-channel order
//! is preserved; no ordering exists across channels.
//!
//! Transient reconnects handled by the underlying protocol library are
//! transparent: observable state only changes through an explicit
//! [`disconnect`](ChannelConnector::disconnect).
//!
//! Concurrent `connect()`/`disconnect()` on one connector is the caller's
//! responsibility; the methods take `&mut self` and the core adds no further
//! reentrancy protection.

use crate::config::{ConnectorParameter, QoS, DEFAULT_INBOUND_QUEUE};
use crate::core::adapter::AdapterPipeline;
use crate::error::{ConnectorError, Result};
use crate::transport::binding::{DeliveryMode, DeliveryToken, TransportBinding};
use crate::utils::metrics::ConnectorMetrics;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Lifecycle state of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Typed hook invoked for data received on a channel.
///
/// The dispatch loop awaits `received`, so implementations may send
/// synchronously through a [`ConnectorSender`] without breaking per-channel
/// ordering.
#[async_trait]
pub trait ReceptionCallback<T>: Send + Sync {
    async fn received(&self, data: T);
}

/// Adapts a plain closure into a [`ReceptionCallback`].
pub struct FnCallback<F>(pub F);

#[async_trait]
impl<T, F> ReceptionCallback<T> for FnCallback<F>
where
    T: Send + 'static,
    F: Fn(T) + Send + Sync,
{
    async fn received(&self, data: T) {
        (self.0)(data);
    }
}

type CallbackMap<CO> = Arc<RwLock<HashMap<String, Arc<dyn ReceptionCallback<CO>>>>>;

/// Cloneable outbound handle, detached from the connector's lifecycle
/// methods so reception callbacks can send.
pub struct ConnectorSender<CO, CI> {
    binding: Arc<dyn TransportBinding>,
    pipeline: Arc<AdapterPipeline<CO, CI>>,
    metrics: Arc<ConnectorMetrics>,
    qos: QoS,
    action_timeout: Duration,
}

impl<CO, CI> Clone for ConnectorSender<CO, CI> {
    fn clone(&self) -> Self {
        Self {
            binding: self.binding.clone(),
            pipeline: self.pipeline.clone(),
            metrics: self.metrics.clone(),
            qos: self.qos,
            action_timeout: self.action_timeout,
        }
    }
}

impl<CO, CI> ConnectorSender<CO, CI> {
    async fn send(&self, data: CI, block: bool) -> Result<DeliveryToken> {
        let (channel, payload) = self.pipeline.encode(data)?;
        self.binding.validate_channel(&channel)?;
        let qos = self.binding.effective_qos(self.qos);
        let token = match self.binding.write(&channel, payload, qos).await {
            Ok(token) => token,
            Err(e) => {
                self.metrics.record_send_error();
                return Err(e);
            }
        };
        self.metrics.record_sent();
        if block && qos.requires_ack() {
            match token.wait_for_completion(self.action_timeout).await {
                Err(e @ ConnectorError::Timeout(_)) => {
                    self.metrics.record_ack_timeout();
                    return Err(e);
                }
                other => other?,
            }
            Ok(DeliveryToken::resolved())
        } else {
            Ok(token)
        }
    }

    /// Sends `data`, blocking until the protocol-level acknowledgment
    /// resolves or the action timeout elapses.
    pub async fn sync_send(&self, data: CI) -> Result<()> {
        self.send(data, true).await.map(|_| ())
    }

    /// Sends `data` without waiting; the returned token resolves when the
    /// protocol acknowledges delivery.
    pub async fn async_send(&self, data: CI) -> Result<DeliveryToken> {
        self.send(data, false).await
    }
}

/// Generic connector over one [`TransportBinding`].
///
/// `CO` is the connector output type (peer to platform), `CI` the connector
/// input type (platform to peer).
pub struct ChannelConnector<CO, CI> {
    binding: Arc<dyn TransportBinding>,
    pipeline: Arc<AdapterPipeline<CO, CI>>,
    callbacks: CallbackMap<CO>,
    metrics: Arc<ConnectorMetrics>,
    state: ConnectionState,
    params: Option<ConnectorParameter>,
    dispatch_task: Option<JoinHandle<()>>,
    poll_task: Option<JoinHandle<()>>,
}

impl<CO, CI> ChannelConnector<CO, CI>
where
    CO: Send + Sync + 'static,
    CI: Send + Sync + 'static,
{
    /// Creates a connector from a binding and an adapter pipeline.
    pub fn new(binding: Arc<dyn TransportBinding>, pipeline: AdapterPipeline<CO, CI>) -> Self {
        Self {
            binding,
            pipeline: Arc::new(pipeline),
            callbacks: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(ConnectorMetrics::new()),
            state: ConnectionState::Disconnected,
            params: None,
            dispatch_task: None,
            poll_task: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Per-connector metrics.
    pub fn metrics(&self) -> &ConnectorMetrics {
        &self.metrics
    }

    /// Encryption mechanisms the binding can provide.
    pub fn supported_encryption(&self) -> Vec<String> {
        self.binding.supported_encryption()
    }

    /// Encryption mechanisms actually enabled on the open connection.
    pub fn enabled_encryption(&self) -> Vec<String> {
        self.binding.enabled_encryption()
    }

    /// Registers `callback` for `channel`, replacing any previous one.
    /// At most one callback is active per channel.
    pub fn set_reception_callback(
        &self,
        channel: &str,
        callback: Arc<dyn ReceptionCallback<CO>>,
    ) {
        let mut callbacks = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        if callbacks.insert(channel.to_string(), callback).is_some() {
            debug!(channel, "reception callback replaced");
        }
    }

    /// Removes the callback for `channel`; data received afterwards is
    /// dropped (diagnosable via metrics).
    pub fn detach_reception_callback(&self, channel: &str) {
        let mut callbacks = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        callbacks.remove(channel);
    }

    /// Connects to the peer: validates parameters, opens the physical
    /// connection (TLS best-effort), subscribes all declared output channels
    /// and starts the dispatch loop. On any failure the connector is left
    /// DISCONNECTED and the call may be retried.
    #[instrument(skip(self, params), fields(binding = self.binding.name()))]
    pub async fn connect(&mut self, params: ConnectorParameter) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        params.validate_strict()?;
        for channel in self
            .pipeline
            .output_channels()
            .iter()
            .chain(self.pipeline.input_channels().iter())
        {
            self.binding.validate_channel(channel)?;
        }

        self.state = ConnectionState::Connecting;
        let (inbound_tx, inbound_rx) = mpsc::channel(DEFAULT_INBOUND_QUEUE);

        if let Err(e) = crate::utils::timeout::bounded(
            params.request_timeout(),
            self.binding.connect(&params, inbound_tx.clone()),
        )
        .await
        .and_then(|r| r)
        {
            self.state = ConnectionState::Disconnected;
            return Err(ConnectorError::connect(e));
        }

        for channel in self.pipeline.output_channels() {
            if let Err(e) = self.binding.subscribe(&channel).await {
                warn!(channel = %channel, error = %e, "subscription failed, aborting connect");
                let _ = self.binding.disconnect().await;
                self.state = ConnectionState::Disconnected;
                return Err(ConnectorError::Connect(format!(
                    "subscribing '{channel}': {e}"
                )));
            }
        }

        self.dispatch_task = Some(self.spawn_dispatch(inbound_rx));
        if self.binding.delivery_mode() == DeliveryMode::Poll
            && !params.notification_interval().is_zero()
        {
            self.poll_task = Some(self.spawn_poll(params.notification_interval(), inbound_tx));
        }

        self.params = Some(params);
        self.state = ConnectionState::Connected;
        info!("connected");
        Ok(())
    }

    fn spawn_dispatch(
        &self,
        mut inbound: mpsc::Receiver<(String, Vec<u8>)>,
    ) -> JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        let callbacks = self.callbacks.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            while let Some((channel, payload)) = inbound.recv().await {
                let callback = {
                    let map = callbacks.read().unwrap_or_else(|e| e.into_inner());
                    map.get(&channel).cloned()
                };
                let Some(callback) = callback else {
                    metrics.record_dropped_no_callback();
                    debug!(channel = %channel, bytes = payload.len(),
                        "no reception callback registered, payload dropped");
                    continue;
                };
                match pipeline.decode(&channel, &payload) {
                    Ok(data) => {
                        metrics.record_received();
                        callback.received(data).await;
                    }
                    Err(e) => {
                        metrics.record_dropped_decode_failed();
                        warn!(channel = %channel, error = %e,
                            "cannot decode inbound payload, dropped");
                    }
                }
            }
            debug!("dispatch loop ended");
        })
    }

    fn spawn_poll(&self, interval: Duration, inbound: mpsc::Sender<(String, Vec<u8>)>) -> JoinHandle<()> {
        let binding = self.binding.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match binding.read().await {
                    Ok(Some((channel, payload))) => {
                        if inbound.send((channel, payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "while polling, data discarded");
                    }
                }
            }
        })
    }

    /// Disconnects from the peer. Idempotent: calling it while already
    /// disconnected is a no-op. Cleanup is best-effort; the state is
    /// DISCONNECTED afterwards even when unsubscribes fail, and the first
    /// error is reported after all cleanup was attempted.
    #[instrument(skip(self), fields(binding = self.binding.name()))]
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        self.state = ConnectionState::Disconnecting;

        let mut first_error: Option<ConnectorError> = None;
        let close_action = self
            .params
            .as_ref()
            .map(|p| p.close_action())
            .unwrap_or_default();

        if close_action.do_close() {
            for channel in self.pipeline.output_channels() {
                if let Err(e) = self
                    .binding
                    .unsubscribe(&channel, close_action.do_delete())
                    .await
                {
                    warn!(channel = %channel, error = %e, "while disconnecting/unsubscribing");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Err(e) = self.binding.disconnect().await {
            warn!(error = %e, "while closing the physical connection");
            first_error.get_or_insert(e);
        }

        self.stop_tasks();
        self.state = ConnectionState::Disconnected;
        info!("disconnected");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Releases connector-owned resources (dispatch and poll tasks). May be
    /// called in any state; it is not a substitute for
    /// [`disconnect`](Self::disconnect).
    pub fn dispose(&mut self) {
        self.stop_tasks();
    }

    fn stop_tasks(&mut self) {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }

    /// A cloneable outbound handle. Fails when not connected.
    pub fn sender(&self) -> Result<ConnectorSender<CO, CI>> {
        let params = self.connected_params()?;
        Ok(ConnectorSender {
            binding: self.binding.clone(),
            pipeline: self.pipeline.clone(),
            metrics: self.metrics.clone(),
            qos: params.qos(),
            action_timeout: params.action_timeout(),
        })
    }

    /// Sends `data`, blocking until the protocol-level acknowledgment
    /// resolves or the action timeout elapses ([`ConnectorError::Timeout`]).
    /// An expired wait does not tear down the connection.
    pub async fn sync_send(&self, data: CI) -> Result<()> {
        self.sender()?.sync_send(data).await
    }

    /// Sends `data` without waiting for the acknowledgment; the returned
    /// token resolves when the protocol confirms delivery.
    pub async fn async_send(&self, data: CI) -> Result<DeliveryToken> {
        self.sender()?.async_send(data).await
    }

    fn connected_params(&self) -> Result<&ConnectorParameter> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectorError::Transport(
                crate::error::constants::ERR_NOT_CONNECTED.to_string(),
            ));
        }
        self.params.as_ref().ok_or_else(|| {
            ConnectorError::Transport(crate::error::constants::ERR_NOT_CONNECTED.to_string())
        })
    }
}

impl<CO, CI> Drop for ChannelConnector<CO, CI> {
    fn drop(&mut self) {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}
