//! Reconcile policies
//!
//! A policy is a pure function from the current instrument snapshots and the
//! previous resolution to the next resolution.

use std::cmp::Ordering;
use std::rc::Rc;

use accord_core::Timestamp;
use serde::Serialize;

use crate::InstrumentMeta;

/// Why a reconciliation pass runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileReason {
    Init,
    SourceUpdate,
    Set,
}

/// Resolved logical value and the instrument that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution<T> {
    pub value: T,
    pub source_id: String,
    pub updated_at: Timestamp,
}

/// One instrument as seen by a policy
#[derive(Debug)]
pub struct InstrumentView<'a, T> {
    pub id: &'a str,
    pub value: &'a T,
    pub meta: InstrumentMeta,
}

/// Input of a reconcile policy. Instruments are in registration order.
#[derive(Debug)]
pub struct ReconcileContext<'a, T> {
    pub instruments: Vec<InstrumentView<'a, T>>,
    pub last_resolved: Option<&'a Resolution<T>>,
    pub reason: ReconcileReason,
    pub now: Timestamp,
}

/// Reconcile policy. Returning `None` keeps the previous resolution.
pub type ReconcileFn<T> = Rc<dyn Fn(&ReconcileContext<'_, T>) -> Option<Resolution<T>>>;

/// Priority-then-recency policy:
/// 1. Drop stale instruments
/// 2. Nothing fresh: keep the last resolution, or fall back to the first instrument
/// 3. Highest priority wins, ties go to the most recently updated, then to
///    registration order
pub fn default_reconcile<T: Clone>(context: &ReconcileContext<'_, T>) -> Option<Resolution<T>> {
    let winner = context
        .instruments
        .iter()
        .filter(|view| !view.meta.stale)
        .fold(None::<&InstrumentView<'_, T>>, |best, view| match best {
            Some(best) if rank(best, view) != Ordering::Less => Some(best),
            _ => Some(view),
        });

    if let Some(winner) = winner {
        return Some(Resolution {
            value: winner.value.clone(),
            source_id: winner.id.to_string(),
            updated_at: winner.meta.updated_at,
        });
    }

    if let Some(last) = context.last_resolved {
        return Some(last.clone());
    }

    context.instruments.first().map(|fallback| Resolution {
        value: fallback.value.clone(),
        source_id: fallback.id.to_string(),
        updated_at: context.now,
    })
}

fn rank<T>(a: &InstrumentView<'_, T>, b: &InstrumentView<'_, T>) -> Ordering {
    a.meta
        .priority
        .cmp(&b.meta.priority)
        .then(a.meta.updated_at.cmp(&b.meta.updated_at))
}
