//! Instruments - backing sources of one logical value

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use accord_core::{SharedAdapter, SourceAdapter, Timestamp};
use serde::Serialize;

/// What an instrument represents
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentRole {
    /// Authoritative remote source
    Primary,
    /// Secondary copy of the primary
    Replica,
    /// Local cache, possibly outdated
    Cache,
    /// Unconfirmed local writes
    Optimistic,
    Custom(String),
}

/// Instrument definition
pub struct InstrumentDefinition<T> {
    pub id: String,
    pub source: SharedAdapter<T>,
    /// Higher wins
    pub priority: i32,
    /// Freshness window; `None` never goes stale
    pub stale_after: Option<Duration>,
    pub role: Option<InstrumentRole>,
}

impl<T> InstrumentDefinition<T> {
    pub fn new(id: impl Into<String>, source: impl SourceAdapter<T> + 'static) -> Self {
        Self::shared(id, Rc::new(source))
    }

    pub fn shared(id: impl Into<String>, source: SharedAdapter<T>) -> Self {
        InstrumentDefinition {
            id: id.into(),
            source,
            priority: 0,
            stale_after: None,
            role: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn stale_after(mut self, window: Duration) -> Self {
        self.stale_after = Some(window);
        self
    }

    pub fn role(mut self, role: InstrumentRole) -> Self {
        self.role = Some(role);
        self
    }
}

impl<T> fmt::Debug for InstrumentDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentDefinition")
            .field("id", &self.id)
            .field("kind", &self.source.kind())
            .field("priority", &self.priority)
            .field("stale_after", &self.stale_after)
            .field("role", &self.role)
            .finish()
    }
}

/// Instrument metadata as seen by a reconcile policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentMeta {
    pub priority: i32,
    pub updated_at: Timestamp,
    /// Evaluated against the clock at the time the meta was taken
    pub stale: bool,
    pub kind: String,
    pub role: Option<InstrumentRole>,
}

/// Live instrument record
pub(crate) struct InstrumentState<T> {
    pub id: String,
    /// `None` for the optimistic instrument
    pub source: Option<SharedAdapter<T>>,
    pub value: T,
    pub updated_at: Timestamp,
    pub priority: i32,
    pub stale_after: Option<Duration>,
    pub kind: String,
    pub role: Option<InstrumentRole>,
}

impl<T> InstrumentState<T> {
    pub fn from_definition(definition: InstrumentDefinition<T>, now: Timestamp) -> Self {
        InstrumentState {
            value: definition.source.get(),
            kind: definition.source.kind().to_string(),
            id: definition.id,
            source: Some(definition.source),
            updated_at: now,
            priority: definition.priority,
            stale_after: definition.stale_after,
            role: definition.role,
        }
    }

    /// Older than its freshness window
    pub fn is_stale(&self, now: Timestamp) -> bool {
        self.stale_after
            .is_some_and(|window| now.elapsed_since(self.updated_at) > window)
    }

    pub fn meta(&self, now: Timestamp) -> InstrumentMeta {
        InstrumentMeta {
            priority: self.priority,
            updated_at: self.updated_at,
            stale: self.is_stale(now),
            kind: self.kind.clone(),
            role: self.role.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_adapters::AtomAdapter;

    #[test]
    fn test_staleness_window() {
        let definition = InstrumentDefinition::new("cache", AtomAdapter::new(1))
            .stale_after(Duration::from_millis(100))
            .role(InstrumentRole::Cache);
        let state = InstrumentState::from_definition(definition, Timestamp(1_000));

        assert!(!state.is_stale(Timestamp(1_100)));
        assert!(state.is_stale(Timestamp(1_101)));
        assert_eq!(state.meta(Timestamp(1_000)).kind, "atom");
        assert_eq!(state.meta(Timestamp(1_000)).role, Some(InstrumentRole::Cache));
    }

    #[test]
    fn test_no_window_never_stale() {
        let definition = InstrumentDefinition::new("a", AtomAdapter::new(1));
        let state = InstrumentState::from_definition(definition, Timestamp::ZERO);
        assert!(!state.is_stale(Timestamp(u64::MAX)));
    }
}
