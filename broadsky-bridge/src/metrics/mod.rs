mod exposition;
mod server;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};

pub use exposition::{render_exposition, split_bsky_type};
pub use server::{MetricsState, build_metrics_router, serve_metrics};

use crate::model::{Action, RepoOp};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpKey {
    pub action: Action,
    pub collection: String,
}

impl OpKey {
    pub fn new(action: Action, collection: impl Into<String>) -> Self {
        Self {
            action,
            collection: collection.into(),
        }
    }
}

/// Point-in-time copy of the aggregator counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub counts: BTreeMap<OpKey, u64>,
}

impl MetricsSnapshot {
    pub fn count(&self, action: Action, collection: &str) -> u64 {
        self.counts
            .get(&OpKey::new(action, collection))
            .copied()
            .unwrap_or(0)
    }

    pub fn keyed_sum(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn max_keyed(&self) -> u64 {
        self.counts.values().copied().max().unwrap_or(0)
    }
}

#[derive(Default)]
struct Counters {
    total: u64,
    counts: HashMap<OpKey, u64>,
}

/// Operation counters shared between the dispatcher (writer) and the
/// metrics endpoint (reader).
///
/// Each [`record`](Self::record) call updates the total and the keyed
/// counters inside one critical section, so every snapshot satisfies
/// `total == keyed_sum()`.
#[derive(Default)]
pub struct MetricsAggregator {
    inner: Mutex<Counters>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // a poisoned lock still holds usable counters
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Counts operations, not events: a commit with N ops adds N to the total.
    pub fn record(&self, ops: &[RepoOp]) {
        if ops.is_empty() {
            return;
        }
        let mut counters = self.lock();
        for op in ops {
            counters.total += 1;
            *counters
                .counts
                .entry(OpKey::new(op.action, op.collection()))
                .or_insert(0) += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.lock();
        MetricsSnapshot {
            total: counters.total,
            counts: counters
                .counts
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}
