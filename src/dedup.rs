use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::record::JobRecord;

/// Membership store for identities that have already been admitted.
pub trait SeenStore {
    fn contains(&self, identity: &str) -> std::result::Result<bool, StoreError>;
    fn insert(&mut self, identity: &str, at: DateTime<Utc>) -> std::result::Result<(), StoreError>;
    /// Record a successful notification for an already inserted identity.
    fn mark_notified(&mut self, identity: &str, at: DateTime<Utc>) -> std::result::Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenEntry {
    pub first_seen: DateTime<Utc>,
    pub last_notified: Option<DateTime<Utc>>,
}

/// Process-local store. Useful for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, SeenEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str) -> Option<&SeenEntry> {
        self.entries.get(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SeenStore for MemoryStore {
    fn contains(&self, identity: &str) -> std::result::Result<bool, StoreError> {
        Ok(self.entries.contains_key(identity))
    }

    fn insert(&mut self, identity: &str, at: DateTime<Utc>) -> std::result::Result<(), StoreError> {
        self.entries.entry(identity.to_string()).or_insert(SeenEntry {
            first_seen: at,
            last_notified: None,
        });
        Ok(())
    }

    fn mark_notified(&mut self, identity: &str, at: DateTime<Utc>) -> std::result::Result<(), StoreError> {
        match self.entries.get_mut(identity) {
            Some(e) => {
                e.last_notified = Some(at);
                Ok(())
            }
            None => Err(StoreError::Other(format!("unknown identity {}", identity))),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DedupOutcome {
    pub duplicates_in_batch: usize,
    pub already_seen: usize,
}

/// Keep records whose identity is new to both this batch and the store,
/// inserting each admitted identity. Order is preserved.
pub fn filter_novel<S: SeenStore + ?Sized>(
    records: Vec<JobRecord>,
    store: &mut S,
    now: DateTime<Utc>,
) -> Result<(Vec<JobRecord>, DedupOutcome)> {
    let mut outcome = DedupOutcome::default();

    // Intra-batch pass first; touches no shared state.
    let mut batch: HashSet<String> = HashSet::with_capacity(records.len());
    let unique: Vec<JobRecord> = records
        .into_iter()
        .filter(|r| {
            let fresh = batch.insert(r.identity().to_string());
            if !fresh {
                outcome.duplicates_in_batch += 1;
            }
            fresh
        })
        .collect();

    let mut novel = Vec::with_capacity(unique.len());
    for record in unique {
        if store.contains(record.identity())? {
            debug!(identity = record.identity(), "already seen");
            outcome.already_seen += 1;
            continue;
        }
        store.insert(record.identity(), now)?;
        novel.push(record);
    }

    Ok((novel, outcome))
}

// ── Tests ──
