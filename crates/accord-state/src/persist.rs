//! Section persistence
//!
//! A section with a [`PersistConfig`] writes every committed change to its
//! storage, either immediately or debounced by `throttle`. Debounced writes
//! are explicit [`ScheduledWrite`] handles owned by the section record; a new
//! write replaces (cancels and reschedules) the pending one.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use accord_core::{AccordResult, Storage, Timestamp, Value};

pub type SerializeFn = Rc<dyn Fn(&Value) -> AccordResult<String>>;
pub type DeserializeFn = Rc<dyn Fn(&str) -> AccordResult<Value>>;

/// Per-section persistence configuration
#[derive(Clone)]
pub struct PersistConfig {
    /// Storage key
    pub key: String,
    /// Backend; `None` disables persistence silently
    pub storage: Option<Rc<dyn Storage>>,
    pub serialize: Option<SerializeFn>,
    pub deserialize: Option<DeserializeFn>,
    /// Debounce interval for writes
    pub throttle: Option<Duration>,
}

impl PersistConfig {
    pub fn new(key: impl Into<String>) -> Self {
        PersistConfig {
            key: key.into(),
            storage: None,
            serialize: None,
            deserialize: None,
            throttle: None,
        }
    }

    pub fn with_storage(mut self, storage: Rc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_serializer(mut self, f: impl Fn(&Value) -> AccordResult<String> + 'static) -> Self {
        self.serialize = Some(Rc::new(f));
        self
    }

    pub fn with_deserializer(mut self, f: impl Fn(&str) -> AccordResult<Value> + 'static) -> Self {
        self.deserialize = Some(Rc::new(f));
        self
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// True if a storage backend is configured
    pub fn is_enabled(&self) -> bool {
        self.storage.is_some()
    }

    /// Non-zero debounce interval, if any
    pub fn debounce(&self) -> Option<Duration> {
        self.throttle.filter(|t| !t.is_zero())
    }

    /// Read the persisted value. Missing or empty entries read as `None`.
    pub fn read(&self) -> AccordResult<Option<Value>> {
        let Some(storage) = &self.storage else {
            return Ok(None);
        };
        let raw = match storage.get_item(&self.key)? {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(None),
        };
        let value = match &self.deserialize {
            Some(deserialize) => deserialize(&raw)?,
            None => serde_json::from_str(&raw)?,
        };
        Ok(Some(value))
    }

    /// Write a value through to storage now
    pub fn write(&self, value: &Value) -> AccordResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let encoded = match &self.serialize {
            Some(serialize) => serialize(value)?,
            None => serde_json::to_string(value)?,
        };
        storage.set_item(&self.key, &encoded)
    }
}

impl fmt::Debug for PersistConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistConfig")
            .field("key", &self.key)
            .field("enabled", &self.is_enabled())
            .field("throttle", &self.throttle)
            .finish()
    }
}

/// Debounced write waiting for its deadline
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledWrite {
    pub due: Timestamp,
    pub value: Value,
}

impl ScheduledWrite {
    pub fn new(now: Timestamp, delay: Duration, value: Value) -> Self {
        ScheduledWrite {
            due: now + delay,
            value,
        }
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.due <= now
    }
}
