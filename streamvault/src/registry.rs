//! Keyed collection of live managed sources.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::source::{ManagedSource, SourceKind, SourceStatus};

/// Sort key for filtered registry queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    AddedOn,
    Status,
}

/// Comparison selector applied to one field of a filtered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    fn matches<T: PartialOrd>(&self, value: &T, target: &T) -> bool {
        match self {
            CompareOp::Eq => value == target,
            CompareOp::Ne => value != target,
            CompareOp::Gt => value > target,
            CompareOp::Lt => value < target,
            CompareOp::Ge => value >= target,
            CompareOp::Le => value <= target,
        }
    }
}

/// Generic registry of live sources keyed by manifest hash.
///
/// Holds at most one entry per identity; re-adding an existing identity
/// returns the already-registered source. Mutation happens only through
/// `add`/`remove`/`stop`; iterating callers snapshot first.
pub struct SourceRegistry<S: ManagedSource> {
    sources: RwLock<HashMap<String, Arc<S>>>,
    started: AtomicBool,
}

impl<S: ManagedSource> SourceRegistry<S> {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Register a source, keeping the existing entry on identity collision.
    ///
    /// Returns the registered source (the existing one when the identity was
    /// already present).
    pub fn add(&self, source: Arc<S>) -> Arc<S> {
        let mut sources = self.sources.write();
        match sources.entry(source.identifier().to_string()) {
            std::collections::hash_map::Entry::Occupied(existing) => {
                debug!(
                    "Source {} already registered, keeping existing entry",
                    source.identifier()
                );
                existing.get().clone()
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(source.clone());
                source
            }
        }
    }

    /// Remove a source and stop its background work.
    pub fn remove(&self, sd_hash: &str) -> Option<Arc<S>> {
        let removed = self.sources.write().remove(sd_hash);
        if let Some(source) = &removed {
            source.stop_tasks();
        }
        removed
    }

    pub fn get(&self, sd_hash: &str) -> Option<Arc<S>> {
        self.sources.read().get(sd_hash).cloned()
    }

    /// Look a source up by its catalog-level stable identity.
    pub fn get_by_stream_hash(&self, stream_hash: &str) -> Option<Arc<S>> {
        self.sources
            .read()
            .values()
            .find(|s| s.stream_hash() == stream_hash)
            .cloned()
    }

    pub fn contains(&self, sd_hash: &str) -> bool {
        self.sources.read().contains_key(sd_hash)
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }

    /// Point-in-time copy of all registered sources.
    pub fn snapshot(&self) -> Vec<Arc<S>> {
        self.sources.read().values().cloned().collect()
    }

    /// Filtered, optionally sorted view of the registry.
    ///
    /// Status and added-on selectors carry a comparison operator; kind is an
    /// exact match.
    pub fn get_filtered(
        &self,
        status: Option<(CompareOp, SourceStatus)>,
        kind: Option<SourceKind>,
        added_on: Option<(CompareOp, DateTime<Utc>)>,
        sort_by: Option<SortField>,
        reverse: bool,
    ) -> Vec<Arc<S>> {
        let mut matched: Vec<Arc<S>> = self
            .snapshot()
            .into_iter()
            .filter(|s| status.is_none_or(|(op, want)| op.matches(&s.status(), &want)))
            .filter(|s| kind.is_none_or(|want| s.kind() == want))
            .filter(|s| added_on.is_none_or(|(op, want)| op.matches(&s.added_on(), &want)))
            .collect();

        match sort_by {
            Some(SortField::AddedOn) => matched.sort_by_key(|s| s.added_on()),
            Some(SortField::Status) => matched.sort_by_key(|s| s.status().as_str()),
            None => {}
        }
        if reverse {
            matched.reverse();
        }
        matched
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Drain every source, stopping each one's background work.
    pub fn stop(&self) {
        let drained: Vec<Arc<S>> = self.sources.write().drain().map(|(_, s)| s).collect();
        for source in drained {
            source.stop_tasks();
        }
        self.started.store(false, Ordering::SeqCst);
    }
}

impl<S: ManagedSource> Default for SourceRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
