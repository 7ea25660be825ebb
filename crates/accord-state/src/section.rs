//! Section definitions and registry records

use std::fmt;
use std::rc::Rc;

use accord_core::{SharedAdapter, SourceAdapter, SubscriberSet, Value};

use crate::{PersistConfig, ScheduledWrite};

/// Pure function from input values (in `inputs` order) to a derived value
pub type ComputeFn = Rc<dyn Fn(&[Value]) -> Value>;

/// Adapter-backed section
#[derive(Clone)]
pub struct SectionDefinition {
    pub key: String,
    pub source: SharedAdapter<Value>,
    pub depends_on: Vec<String>,
    pub persist: Option<PersistConfig>,
    /// Opt-in to synthesized shallow-merge patches
    pub mergeable: bool,
    pub debug_label: Option<String>,
}

impl SectionDefinition {
    pub fn new(key: impl Into<String>, source: impl SourceAdapter<Value> + 'static) -> Self {
        Self::shared(key, Rc::new(source))
    }

    pub fn shared(key: impl Into<String>, source: SharedAdapter<Value>) -> Self {
        SectionDefinition {
            key: key.into(),
            source,
            depends_on: Vec::new(),
            persist: None,
            mergeable: false,
            debug_label: None,
        }
    }

    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn persist(mut self, config: PersistConfig) -> Self {
        self.persist = Some(config);
        self
    }

    pub fn mergeable(mut self) -> Self {
        self.mergeable = true;
        self
    }

    pub fn debug_label(mut self, label: impl Into<String>) -> Self {
        self.debug_label = Some(label.into());
        self
    }
}

impl fmt::Debug for SectionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionDefinition")
            .field("key", &self.key)
            .field("kind", &self.source.kind())
            .field("depends_on", &self.depends_on)
            .field("mergeable", &self.mergeable)
            .finish()
    }
}

/// Section computed purely from other sections
#[derive(Clone)]
pub struct DerivedSectionDefinition {
    pub key: String,
    pub inputs: Vec<String>,
    pub compute: ComputeFn,
    pub debug_label: Option<String>,
}

impl DerivedSectionDefinition {
    pub fn new<I, S>(
        key: impl Into<String>,
        inputs: I,
        compute: impl Fn(&[Value]) -> Value + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DerivedSectionDefinition {
            key: key.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            compute: Rc::new(compute),
            debug_label: None,
        }
    }

    pub fn debug_label(mut self, label: impl Into<String>) -> Self {
        self.debug_label = Some(label.into());
        self
    }
}

impl fmt::Debug for DerivedSectionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedSectionDefinition")
            .field("key", &self.key)
            .field("inputs", &self.inputs)
            .finish()
    }
}

/// Staged write intent
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Set(Value),
    Patch(Value),
}

pub(crate) enum SectionKind {
    Source {
        adapter: SharedAdapter<Value>,
        mergeable: bool,
        persist: Option<PersistConfig>,
        /// Debounced persistence write owned by this section
        pending_write: Option<ScheduledWrite>,
    },
    Derived {
        inputs: Vec<String>,
        compute: ComputeFn,
        /// Input snapshot used for the last computation
        last_inputs: Option<Vec<Value>>,
    },
}

/// Registry record for one section
pub(crate) struct SectionRecord {
    pub value: Value,
    pub depends_on: Vec<String>,
    pub kind: SectionKind,
    pub subscribers: SubscriberSet,
    pub debug_label: Option<String>,
}

impl SectionRecord {
    pub fn source(definition: SectionDefinition) -> Self {
        SectionRecord {
            value: definition.source.get(),
            depends_on: definition.depends_on,
            kind: SectionKind::Source {
                adapter: definition.source,
                mergeable: definition.mergeable,
                persist: definition.persist,
                pending_write: None,
            },
            subscribers: SubscriberSet::new(),
            debug_label: definition.debug_label,
        }
    }

    pub fn derived(definition: DerivedSectionDefinition) -> Self {
        SectionRecord {
            value: Value::Null,
            depends_on: definition.inputs.clone(),
            kind: SectionKind::Derived {
                inputs: definition.inputs,
                compute: definition.compute,
                last_inputs: None,
            },
            subscribers: SubscriberSet::new(),
            debug_label: definition.debug_label,
        }
    }

    pub fn adapter(&self) -> Option<&SharedAdapter<Value>> {
        match &self.kind {
            SectionKind::Source { adapter, .. } => Some(adapter),
            SectionKind::Derived { .. } => None,
        }
    }

    pub fn kind_name(&self) -> String {
        match &self.kind {
            SectionKind::Source { adapter, .. } => adapter.kind().to_string(),
            SectionKind::Derived { .. } => "derived".to_string(),
        }
    }
}

/// Read-only description of a registered section
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SectionInfo {
    pub key: String,
    pub kind: String,
    pub depends_on: Vec<String>,
    pub debug_label: Option<String>,
    pub subscribers: usize,
    pub pending_write: bool,
}
