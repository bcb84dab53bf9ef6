//! # Connector Parameters
//!
//! Immutable connection configuration shared by all protocol bindings.
//!
//! A [`ConnectorParameter`] is built once via [`ConnectorParameterBuilder`]
//! and handed to [`connect`](crate::core::connector::ChannelConnector::connect);
//! it carries the endpoint, timeouts, QoS level, optional TLS keystore and a
//! map of binding-specific named settings (baud rate, parity, ...).
//!
//! ## Configuration Sources
//! - Direct construction through the builder
//! - TOML files via `from_file()` / `from_toml()`
//!
//! Specific connectors shall document which of the optional settings they
//! require.

use crate::error::{ConnectorError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default inbound dispatch queue capacity per connector.
pub const DEFAULT_INBOUND_QUEUE: usize = 256;

/// Delivery-guarantee level requested from a binding. Bindings map this to
/// their protocol's native levels; see
/// [`TransportBinding::effective_qos`](crate::transport::binding::TransportBinding::effective_qos)
/// for bindings that cannot honor a level exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// Whether sends at this level obtain a delivery token worth waiting on.
    pub fn requires_ack(self) -> bool {
        self != QoS::AtMostOnce
    }
}

/// What `disconnect()` does with subscribed channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseAction {
    /// Leave subscriptions to the underlying library.
    None,
    /// Unsubscribe all channels (default).
    #[default]
    Unsubscribe,
    /// Unsubscribe and delete broker-side resources where supported.
    Delete,
}

impl CloseAction {
    /// Whether channels shall be auto-closed at all.
    pub fn do_close(self) -> bool {
        self != CloseAction::None
    }

    /// Whether channels shall be closed and deleted.
    pub fn do_delete(self) -> bool {
        self == CloseAction::Delete
    }
}

/// TLS keystore descriptor. Material is PEM: a CA certificate file plus an
/// optional client certificate/key pair next to it. Absence of the whole
/// descriptor disables TLS; presence with a failing load degrades to an
/// unencrypted connection with a logged warning, never a hard failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreDescriptor {
    /// Path to the PEM file holding the CA certificate chain.
    pub path: String,

    /// Optional keystore password, consumed by bindings whose library
    /// requires one for the client identity.
    #[serde(default)]
    pub password: Option<String>,

    /// Optional alias selecting a client identity; bindings that cannot
    /// address material by alias ignore it with a debug log.
    #[serde(default)]
    pub key_alias: Option<String>,

    /// Whether TLS hostname verification shall be performed.
    #[serde(default)]
    pub hostname_verification: bool,
}

impl KeystoreDescriptor {
    pub fn new<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            password: None,
            key_alias: None,
            hostname_verification: false,
        }
    }
}

/// A typed value in the binding-specific settings map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

/// Connection parameters for a connector. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorParameter {
    /// Network name of the host to connect to.
    host: String,

    /// TCP communication port of the host.
    port: u16,

    /// Port descriptor for point-to-point bindings (e.g. `/dev/ttyUSB0`).
    /// When set, host/port are not required.
    #[serde(default)]
    port_descriptor: Option<String>,

    /// Client/application id; empty means binding-defined.
    #[serde(default)]
    application_id: String,

    /// Whether the application id shall be made unique upon connect.
    #[serde(default = "default_true")]
    auto_application_id: bool,

    /// Keep-alive interval for connection heartbeats.
    #[serde(with = "duration_serde", default = "default_keep_alive")]
    keep_alive: Duration,

    /// Timeout for the connection handshake.
    #[serde(with = "duration_serde", default = "default_request_timeout")]
    request_timeout: Duration,

    /// Timeout for individual send/receive acknowledgment waits.
    #[serde(with = "duration_serde", default = "default_action_timeout")]
    action_timeout: Duration,

    /// Poll period for polling bindings; zero disables polling.
    #[serde(with = "duration_serde", default = "default_notification_interval")]
    notification_interval: Duration,

    /// Requested delivery-guarantee level.
    #[serde(default)]
    qos: QoS,

    /// Optional TLS keystore.
    #[serde(default)]
    keystore: Option<KeystoreDescriptor>,

    /// Optional key identifying authentication material (user/password token).
    #[serde(default)]
    authentication_key: Option<String>,

    /// What `disconnect()` does with subscribed channels.
    #[serde(default)]
    close_action: CloseAction,

    /// Binding-specific named settings. Unknown keys are ignored by bindings;
    /// missing keys fall back to binding-defined defaults.
    #[serde(default)]
    specific: HashMap<String, SettingValue>,
}

fn default_true() -> bool {
    true
}

fn default_keep_alive() -> Duration {
    timeout::DEFAULT_KEEP_ALIVE
}

fn default_request_timeout() -> Duration {
    timeout::DEFAULT_REQUEST_TIMEOUT
}

fn default_action_timeout() -> Duration {
    timeout::DEFAULT_ACTION_TIMEOUT
}

fn default_notification_interval() -> Duration {
    timeout::DEFAULT_NOTIFICATION_INTERVAL
}

/// Builder for [`ConnectorParameter`].
pub struct ConnectorParameterBuilder {
    instance: ConnectorParameter,
}

impl ConnectorParameterBuilder {
    /// Creates a builder for a network endpoint.
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            instance: ConnectorParameter {
                host: host.into(),
                port,
                port_descriptor: None,
                application_id: String::new(),
                auto_application_id: true,
                keep_alive: timeout::DEFAULT_KEEP_ALIVE,
                request_timeout: timeout::DEFAULT_REQUEST_TIMEOUT,
                action_timeout: timeout::DEFAULT_ACTION_TIMEOUT,
                notification_interval: timeout::DEFAULT_NOTIFICATION_INTERVAL,
                qos: QoS::default(),
                keystore: None,
                authentication_key: None,
                close_action: CloseAction::default(),
                specific: HashMap::new(),
            },
        }
    }

    /// Creates a builder for a point-to-point endpoint identified by a port
    /// descriptor (serial bindings).
    pub fn for_port_descriptor<S: Into<String>>(descriptor: S) -> Self {
        let mut builder = Self::new("", 0);
        builder.instance.port_descriptor = Some(descriptor.into());
        builder
    }

    /// Sets the client/application id. Optional, remains empty if unset.
    pub fn application_id<S: Into<String>>(mut self, id: S) -> Self {
        self.instance.application_id = id.into();
        self
    }

    /// Defines whether the application id shall be made unique upon connect.
    pub fn auto_application_id(mut self, auto: bool) -> Self {
        self.instance.auto_application_id = auto;
        self
    }

    /// Sets the keep-alive interval.
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.instance.keep_alive = keep_alive;
        self
    }

    /// Sets the handshake timeout.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.instance.request_timeout = request_timeout;
        self
    }

    /// Sets the timeout for send/receive acknowledgment waits.
    pub fn action_timeout(mut self, action_timeout: Duration) -> Self {
        self.instance.action_timeout = action_timeout;
        self
    }

    /// Sets the poll period for polling bindings; zero disables polling.
    pub fn notification_interval(mut self, interval: Duration) -> Self {
        self.instance.notification_interval = interval;
        self
    }

    /// Sets the requested QoS level.
    pub fn qos(mut self, qos: QoS) -> Self {
        self.instance.qos = qos;
        self
    }

    /// Sets the TLS keystore. Optional; absence disables TLS.
    pub fn keystore(mut self, keystore: KeystoreDescriptor) -> Self {
        self.instance.keystore = Some(keystore);
        self
    }

    /// Sets the key identifying authentication material.
    pub fn authentication_key<S: Into<String>>(mut self, key: S) -> Self {
        self.instance.authentication_key = Some(key.into());
        self
    }

    /// Sets the close action for `disconnect()`.
    pub fn close_action(mut self, action: CloseAction) -> Self {
        self.instance.close_action = action;
        self
    }

    /// Adds a binding-specific integer setting.
    pub fn specific_int<S: Into<String>>(mut self, key: S, value: i64) -> Self {
        self.instance
            .specific
            .insert(key.into(), SettingValue::Int(value));
        self
    }

    /// Adds a binding-specific string setting.
    pub fn specific_string<S: Into<String>, V: Into<String>>(mut self, key: S, value: V) -> Self {
        self.instance
            .specific
            .insert(key.into(), SettingValue::Str(value.into()));
        self
    }

    /// Adds a binding-specific boolean setting.
    pub fn specific_bool<S: Into<String>>(mut self, key: S, value: bool) -> Self {
        self.instance
            .specific
            .insert(key.into(), SettingValue::Bool(value));
        self
    }

    /// Returns the created instance.
    pub fn build(self) -> ConnectorParameter {
        self.instance
    }
}

impl ConnectorParameter {
    /// Load parameters from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::InvalidConfiguration(format!("failed to read config file: {e}"))
        })?;
        Self::from_toml(&contents)
    }

    /// Load parameters from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content).map_err(|e| {
            ConnectorError::InvalidConfiguration(format!("failed to parse TOML: {e}"))
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Port descriptor for point-to-point bindings, if configured.
    pub fn port_descriptor(&self) -> Option<&str> {
        self.port_descriptor.as_deref()
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn auto_application_id(&self) -> bool {
        self.auto_application_id
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn action_timeout(&self) -> Duration {
        self.action_timeout
    }

    pub fn notification_interval(&self) -> Duration {
        self.notification_interval
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn keystore(&self) -> Option<&KeystoreDescriptor> {
        self.keystore.as_ref()
    }

    pub fn authentication_key(&self) -> Option<&str> {
        self.authentication_key.as_deref()
    }

    pub fn close_action(&self) -> CloseAction {
        self.close_action
    }

    /// Returns a specific string setting, if present with that type.
    pub fn specific_string(&self, key: &str) -> Option<&str> {
        match self.specific.get(key) {
            Some(SettingValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns a specific integer setting, if present with that type.
    pub fn specific_int(&self, key: &str) -> Option<i64> {
        match self.specific.get(key) {
            Some(SettingValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Returns a specific boolean setting, if present with that type.
    pub fn specific_bool(&self, key: &str) -> Option<bool> {
        match self.specific.get(key) {
            Some(SettingValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Applies a specific integer setting to `applier` when present; unknown
    /// keys are silently ignored so bindings can probe their own knobs.
    pub fn apply_specific_int<F: FnOnce(i64)>(&self, key: &str, applier: F) {
        if let Some(v) = self.specific_int(key) {
            applier(v);
        }
    }

    /// Resolves username/password credentials for a binding. Explicit
    /// `USER`/`PASSWORD` specific settings win; otherwise the authentication
    /// key names an environment-variable pair `<KEY>_USER`/`<KEY>_PASSWORD`.
    pub fn credentials(&self) -> Option<(String, String)> {
        if let (Some(user), Some(password)) =
            (self.specific_string("USER"), self.specific_string("PASSWORD"))
        {
            return Some((user.to_string(), password.to_string()));
        }
        let key = self.authentication_key.as_deref()?;
        let user = std::env::var(format!("{key}_USER")).ok()?;
        let password = std::env::var(format!("{key}_PASSWORD")).ok()?;
        Some((user, password))
    }

    /// The unique application/client identifier. Appends `infix` and a
    /// process/time suffix when [`auto_application_id`](Self::auto_application_id)
    /// is set, so repeated connects do not collide at the broker.
    pub fn client_id(&self, infix: &str) -> String {
        let mut id = self.application_id.clone();
        if !infix.is_empty() {
            if !id.is_empty() {
                id.push('-');
            }
            id.push_str(infix);
        }
        if self.auto_application_id {
            let millis = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            id = format!("{}-{}-{}", id, std::process::id(), millis);
        }
        id
    }

    /// Validate the parameters for common issues and misconfigurations.
    ///
    /// Returns a list of validation errors. Empty list means the parameters
    /// are valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.port_descriptor.is_none() {
            if self.host.is_empty() {
                errors.push("Host cannot be empty".to_string());
            }
            if self.port == 0 {
                errors.push("Port must be greater than 0".to_string());
            }
        } else if let Some(descriptor) = &self.port_descriptor {
            if descriptor.is_empty() {
                errors.push("Port descriptor cannot be empty".to_string());
            }
        }

        if self.action_timeout.as_millis() < 10 {
            errors.push("Action timeout too short (minimum: 10ms)".to_string());
        }

        if self.request_timeout.as_millis() < 100 {
            errors.push("Request timeout too short (minimum: 100ms)".to_string());
        } else if self.request_timeout.as_secs() > 300 {
            errors.push("Request timeout too long (maximum: 300s)".to_string());
        }

        if !self.keep_alive.is_zero() && self.keep_alive.as_millis() < 100 {
            errors.push("Keep-alive interval too short (minimum: 100ms)".to_string());
        }

        if let Some(keystore) = &self.keystore {
            if keystore.path.is_empty() {
                errors.push("Keystore path cannot be empty when a keystore is set".to_string());
            }
        }

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConnectorError::InvalidConfiguration(format!(
                "parameter validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Helper module for Duration serialization/deserialization (milliseconds).
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let p = ConnectorParameterBuilder::new("localhost", 1883).build();
        assert_eq!(p.host(), "localhost");
        assert_eq!(p.port(), 1883);
        assert_eq!(p.qos(), QoS::AtLeastOnce);
        assert_eq!(p.action_timeout(), timeout::DEFAULT_ACTION_TIMEOUT);
        assert!(p.keystore().is_none());
        assert!(p.validate().is_empty());
    }

    #[test]
    fn port_descriptor_skips_host_validation() {
        let p = ConnectorParameterBuilder::for_port_descriptor("/dev/ttyUSB0").build();
        assert!(p.validate().is_empty());
        assert_eq!(p.port_descriptor(), Some("/dev/ttyUSB0"));
    }

    #[test]
    fn specific_settings_are_typed() {
        let p = ConnectorParameterBuilder::for_port_descriptor("/dev/ttyUSB0")
            .specific_int("BAUDRATE", 115200)
            .specific_string("PARITY", "EVEN")
            .specific_bool("RTS", true)
            .build();
        assert_eq!(p.specific_int("BAUDRATE"), Some(115200));
        assert_eq!(p.specific_string("PARITY"), Some("EVEN"));
        assert_eq!(p.specific_bool("RTS"), Some(true));
        // wrong-typed access yields nothing
        assert_eq!(p.specific_string("BAUDRATE"), None);
        assert_eq!(p.specific_int("UNKNOWN"), None);
    }

    #[test]
    fn apply_specific_int_ignores_unknown_keys() {
        let p = ConnectorParameterBuilder::new("h", 1).build();
        let mut called = false;
        p.apply_specific_int("BAUDRATE", |_| called = true);
        assert!(!called);
    }

    #[test]
    fn credentials_prefer_specific_settings() {
        let p = ConnectorParameterBuilder::new("h", 1)
            .specific_string("USER", "machine")
            .specific_string("PASSWORD", "secret")
            .authentication_key("IGNORED")
            .build();
        assert_eq!(p.credentials(), Some(("machine".into(), "secret".into())));

        let none = ConnectorParameterBuilder::new("h", 1).build();
        assert_eq!(none.credentials(), None);
    }

    #[test]
    fn client_id_is_uniquified() {
        let p = ConnectorParameterBuilder::new("h", 1)
            .application_id("app")
            .build();
        let id = p.client_id("mqtt");
        assert!(id.starts_with("app-mqtt-"));

        let fixed = ConnectorParameterBuilder::new("h", 1)
            .application_id("app")
            .auto_application_id(false)
            .build();
        assert_eq!(fixed.client_id("mqtt"), "app-mqtt");
    }

    #[test]
    fn toml_roundtrip() {
        let toml = r#"
            host = "broker.local"
            port = 5672
            qos = "exactly_once"
            action_timeout = 250

            [keystore]
            path = "/etc/certs/ca.pem"
            hostname_verification = true
        "#;
        let p = ConnectorParameter::from_toml(toml).unwrap();
        assert_eq!(p.host(), "broker.local");
        assert_eq!(p.qos(), QoS::ExactlyOnce);
        assert_eq!(p.action_timeout(), Duration::from_millis(250));
        let ks = p.keystore().unwrap();
        assert_eq!(ks.path, "/etc/certs/ca.pem");
        assert!(ks.hostname_verification);
    }
}
