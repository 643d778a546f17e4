use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::dedup::{self, SeenStore};
use crate::error::Result;
use crate::filter::{self, RejectReason, RuleSet, Verdict};
use crate::parser::{self, ExtractOptions, PageFragment};
use crate::record::JobRecord;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub fragments: usize,
    pub extracted: usize,
    pub unresolvable: usize,
    pub accepted: usize,
    pub rejected_by_reason: BTreeMap<RejectReason, usize>,
    pub duplicates_in_batch: usize,
    pub already_seen: usize,
    pub novel: usize,
}

impl CycleStats {
    pub fn rejected(&self) -> usize {
        self.rejected_by_reason.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub notify_list: Vec<JobRecord>,
    pub stats: CycleStats,
    min_notifications: usize,
}

impl BatchResult {
    /// Whether the batch reaches `min_notifications_per_run` and should go out as one digest.
    pub fn is_digest(&self) -> bool {
        self.min_notifications > 0 && self.notify_list.len() >= self.min_notifications
    }
}

/// Everything a cycle needs besides the fragments and the store.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub rules: RuleSet,
    pub extract: ExtractOptions,
    pub min_notifications: usize,
}

impl Pipeline {
    pub fn new(rules: RuleSet, extract: ExtractOptions, min_notifications: usize) -> Self {
        Self {
            rules,
            extract,
            min_notifications,
        }
    }

    pub fn run_cycle<S: SeenStore + ?Sized>(
        &self,
        fragments: &[PageFragment],
        store: &mut S,
    ) -> Result<BatchResult> {
        self.run_cycle_at(fragments, store, Utc::now())
    }

    /// Extract → filter → dedup. Extraction fans out over fragments; filtering
    /// and the store pass run sequentially in fragment order.
    pub fn run_cycle_at<S: SeenStore + ?Sized>(
        &self,
        fragments: &[PageFragment],
        store: &mut S,
        now: DateTime<Utc>,
    ) -> Result<BatchResult> {
        let mut stats = CycleStats {
            fragments: fragments.len(),
            ..Default::default()
        };

        let extractions: Vec<parser::Extraction> = fragments
            .par_iter()
            .map(|f| parser::extract(f, &self.extract))
            .collect();

        let mut accepted = Vec::new();
        for extraction in extractions {
            stats.unresolvable += extraction.unresolvable;
            stats.extracted += extraction.records.len();
            for record in extraction.records {
                match filter::evaluate(&record, &self.rules) {
                    Verdict::Accept => accepted.push(record),
                    Verdict::Reject(reason) => {
                        debug!(identity = record.identity(), %reason, "rejected");
                        *stats.rejected_by_reason.entry(reason).or_default() += 1;
                    }
                }
            }
        }
        stats.accepted = accepted.len();

        let (notify_list, outcome) = dedup::filter_novel(accepted, store, now)?;
        stats.duplicates_in_batch = outcome.duplicates_in_batch;
        stats.already_seen = outcome.already_seen;
        stats.novel = notify_list.len();

        info!(
            fragments = stats.fragments,
            extracted = stats.extracted,
            accepted = stats.accepted,
            rejected = stats.rejected(),
            novel = stats.novel,
            "cycle complete"
        );

        Ok(BatchResult {
            notify_list,
            stats,
            min_notifications: self.min_notifications,
        })
    }
}

// ── Tests ──
