//! Transaction history and store snapshots

use std::collections::{BTreeMap, VecDeque};

use accord_core::{AccordResult, Timestamp, Value};
use serde::Serialize;

/// Default number of retained transaction records
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Outcome of one commit that changed at least one section
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub label: Option<String>,
    /// Changed keys in commit order
    pub touched: Vec<String>,
    pub timestamp: Timestamp,
}

/// Bounded ring of transaction records, newest first
#[derive(Debug, Clone)]
pub struct TransactionHistory {
    records: VecDeque<TransactionRecord>,
    limit: usize,
}

impl TransactionHistory {
    pub fn new(limit: usize) -> Self {
        TransactionHistory {
            records: VecDeque::with_capacity(limit.min(64)),
            limit,
        }
    }

    /// Record a commit, evicting the oldest beyond the limit
    pub fn push(&mut self, record: TransactionRecord) {
        self.records.push_front(record);
        self.records.truncate(self.limit);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest(&self) -> Option<&TransactionRecord> {
        self.records.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.records.iter()
    }

    pub fn to_vec(&self) -> Vec<TransactionRecord> {
        self.records.iter().cloned().collect()
    }
}

/// Read-only view of the whole store for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConductorSnapshot {
    pub sections: BTreeMap<String, Value>,
    /// Newest first
    pub transactions: Vec<TransactionRecord>,
}

impl ConductorSnapshot {
    /// Copy with every section value passed through `redact`
    pub fn redacted(&self, redact: impl Fn(&str, &Value) -> Value) -> Self {
        ConductorSnapshot {
            sections: self
                .sections
                .iter()
                .map(|(key, value)| (key.clone(), redact(key, value)))
                .collect(),
            transactions: self.transactions.clone(),
        }
    }

    /// Export as pretty JSON
    pub fn to_json(&self) -> AccordResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
