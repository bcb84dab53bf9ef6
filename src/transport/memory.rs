//! # In-Process Loopback Binding
//!
//! [`MemoryBus`] is a tiny in-process broker; every [`MemoryBinding`]
//! attached to the same bus sees messages published on channels it
//! subscribed to. Used for tests and local wiring where no external broker
//! is available; delivery is reliable and per-channel ordered, so it honors
//! every QoS level as requested.

use crate::config::{ConnectorParameter, QoS};
use crate::error::{constants, ConnectorError, Result};
use crate::transport::binding::{DeliveryToken, InboundSender, TransportBinding};
use crate::transport::tls;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct BusState {
    // channel -> (subscriber id, inbound queue)
    subscribers: HashMap<String, Vec<(u64, InboundSender)>>,
}

/// Shared in-process broker.
#[derive(Default, Clone)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new binding to this bus.
    pub fn binding(&self) -> MemoryBinding {
        MemoryBinding {
            bus: self.clone(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            connected: AtomicBool::new(false),
            inbound: Mutex::new(None),
            enabled: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self, channel: &str, id: u64, sender: InboundSender) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push((id, sender));
    }

    fn unsubscribe(&self, channel: &str, id: u64, delete: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if delete {
            state.subscribers.remove(channel);
        } else if let Some(subs) = state.subscribers.get_mut(channel) {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    fn remove_subscriber(&self, id: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for subs in state.subscribers.values_mut() {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let targets: Vec<InboundSender> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .subscribers
                .get(channel)
                .map(|subs| subs.iter().map(|(_, s)| s.clone()).collect())
                .unwrap_or_default()
        };
        for target in targets {
            target
                .send((channel.to_string(), payload.clone()))
                .await
                .map_err(|_| {
                    ConnectorError::Transport(constants::ERR_INBOUND_CLOSED.to_string())
                })?;
        }
        Ok(())
    }
}

/// Loopback binding attached to a [`MemoryBus`].
pub struct MemoryBinding {
    bus: MemoryBus,
    id: u64,
    connected: AtomicBool,
    inbound: Mutex<Option<InboundSender>>,
    enabled: Mutex<Vec<String>>,
}

#[async_trait]
impl TransportBinding for MemoryBinding {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self, params: &ConnectorParameter, inbound: InboundSender) -> Result<()> {
        // the bus has no wire, but the keystore contract (load or degrade
        // with a warning) is honored so it can be exercised broker-free
        if tls::resolve(params).is_some() {
            let mut enabled = self.enabled.lock().unwrap_or_else(|e| e.into_inner());
            enabled.push(tls::TLS_V1_2.to_string());
        }
        *self.inbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(inbound);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        let sender = self
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ConnectorError::Transport(constants::ERR_NOT_CONNECTED.to_string()))?;
        self.bus.subscribe(channel, self.id, sender);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str, delete: bool) -> Result<()> {
        self.bus.unsubscribe(channel, self.id, delete);
        Ok(())
    }

    async fn write(&self, channel: &str, payload: Vec<u8>, qos: QoS) -> Result<DeliveryToken> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectorError::Transport(
                constants::ERR_NOT_CONNECTED.to_string(),
            ));
        }
        self.bus.publish(channel, payload).await?;
        // delivery completed synchronously, every level is already acked
        let _ = qos;
        Ok(DeliveryToken::resolved())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.bus.remove_subscriber(self.id);
        *self.inbound.lock().unwrap_or_else(|e| e.into_inner()) = None;
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
