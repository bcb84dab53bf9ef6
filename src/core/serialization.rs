//! # Serializers and the Serializer Registry
//!
//! A [`Serializer`] converts one domain type to and from wire bytes. The
//! [`SerializerRegistry`] maps types to serializers and is consulted by the
//! adapter pipeline on every send and receive.
//!
//! The registry is owned explicitly (usually one `Arc<SerializerRegistry>`
//! per process, injected into each connector at construction) rather than a
//! hidden static, so tests never leak state into each other. Registration is
//! expected at startup/shutdown; lookups happen concurrently from send paths
//! and binding I/O tasks and observe either the old or the new serializer,
//! never a partially constructed one.
//!
//! Two serializer implementations ship in-crate:
//! - [`JsonSerializer`]: human-readable JSON (debugging, interop)
//! - [`BincodeSerializer`]: binary compact format (fastest)

use crate::error::{ConnectorError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

/// Converts a domain type to and from bytes.
pub trait Serializer<T>: Send + Sync {
    /// Serialize `value` to bytes.
    fn to_bytes(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from `data`.
    fn from_bytes(&self, data: &[u8]) -> Result<T>;
}

struct Entry {
    serializer: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Thread-safe map from domain type to serializer.
#[derive(Default)]
pub struct SerializerRegistry {
    entries: RwLock<HashMap<TypeId, Entry>>,
}

impl SerializerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `serializer` for `T`, replacing any previous registration.
    pub fn register<T: 'static>(&self, serializer: impl Serializer<T> + 'static) {
        let arc: Arc<dyn Serializer<T>> = Arc::new(serializer);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            TypeId::of::<T>(),
            Entry {
                serializer: Box::new(arc),
                type_name: std::any::type_name::<T>(),
            },
        );
    }

    /// Removes the serializer registered for `T`, if any.
    pub fn unregister<T: 'static>(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&TypeId::of::<T>());
    }

    /// Returns the serializer for `T`, failing with
    /// [`ConnectorError::NotRegistered`] if absent.
    pub fn get<T: 'static>(&self) -> Result<Arc<dyn Serializer<T>>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&TypeId::of::<T>())
            .and_then(|e| e.serializer.downcast_ref::<Arc<dyn Serializer<T>>>())
            .cloned()
            .ok_or_else(|| ConnectorError::NotRegistered(std::any::type_name::<T>()))
    }

    /// Returns whether a serializer is registered for `T`.
    pub fn has<T: 'static>(&self) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(&TypeId::of::<T>())
    }

    /// Names of all registered types, for diagnostics.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().map(|e| e.type_name).collect()
    }
}

/// JSON serializer for any serde-capable type.
pub struct JsonSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Serializer<T> for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn to_bytes(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| ConnectorError::Serialize(e.to_string()))
    }

    fn from_bytes(&self, data: &[u8]) -> Result<T> {
        serde_json::from_slice(data).map_err(|e| ConnectorError::Deserialize(e.to_string()))
    }
}

/// Bincode serializer for any serde-capable type.
pub struct BincodeSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeSerializer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Serializer<T> for BincodeSerializer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn to_bytes(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| ConnectorError::Serialize(e.to_string()))
    }

    fn from_bytes(&self, data: &[u8]) -> Result<T> {
        bincode::deserialize(data).map_err(|e| ConnectorError::Deserialize(e.to_string()))
    }
}
