//! Shallow-merge capability
//!
//! Patching is opt-in: a section or orchestrator declares at configuration
//! time that its values merge, instead of having mergeability inferred from
//! the runtime shape of a value.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use serde_json::Value;

/// Key-value structures that can absorb a partial update
pub trait ShallowMerge: Sized {
    /// `self` overlaid with every top-level entry of `partial`.
    /// `None` when the pair is not mergeable.
    fn shallow_merge(&self, partial: &Self) -> Option<Self>;

    /// True if any entry of `partial` differs from the same entry in `self`
    fn patch_changes(&self, partial: &Self) -> bool;
}

impl ShallowMerge for Value {
    fn shallow_merge(&self, partial: &Self) -> Option<Self> {
        match (self, partial) {
            (Value::Object(base), Value::Object(patch)) => {
                let mut merged = base.clone();
                for (key, value) in patch {
                    merged.insert(key.clone(), value.clone());
                }
                Some(Value::Object(merged))
            }
            _ => None,
        }
    }

    fn patch_changes(&self, partial: &Self) -> bool {
        match (self, partial) {
            (Value::Object(base), Value::Object(patch)) => patch
                .iter()
                .any(|(key, value)| base.get(key) != Some(value)),
            _ => self != partial,
        }
    }
}

impl<K, V> ShallowMerge for BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone + PartialEq,
{
    fn shallow_merge(&self, partial: &Self) -> Option<Self> {
        let mut merged = self.clone();
        merged.extend(partial.iter().map(|(k, v)| (k.clone(), v.clone())));
        Some(merged)
    }

    fn patch_changes(&self, partial: &Self) -> bool {
        partial.iter().any(|(k, v)| self.get(k) != Some(v))
    }
}

impl<K, V> ShallowMerge for HashMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    fn shallow_merge(&self, partial: &Self) -> Option<Self> {
        let mut merged = self.clone();
        merged.extend(partial.iter().map(|(k, v)| (k.clone(), v.clone())));
        Some(merged)
    }

    fn patch_changes(&self, partial: &Self) -> bool {
        partial.iter().any(|(k, v)| self.get(k) != Some(v))
    }
}
