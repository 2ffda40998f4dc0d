//! Reconciliation snapshots
//!
//! A snapshot is the published, read-only view of one environment after a merge
//! cycle. Readers hold it behind an `Arc` and diff successive snapshots to find
//! out what changed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::execution::{ExecutionKey, ExecutionRecord, ExecutionStatus};

/// Immutable view of one environment's executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSnapshot {
    pub environment: String,
    /// Poll-sequence number. Each merge cycle increments it; snapshots republished
    /// for a local command keep the current value.
    pub sequence: u64,
    pub taken_at: DateTime<Utc>,
    /// Records keyed by remote execution identifier
    pub records: BTreeMap<String, ExecutionRecord>,
}

/// A difference between two snapshots of the same environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotChange {
    Added {
        key: ExecutionKey,
        status: ExecutionStatus,
    },
    StatusChanged {
        key: ExecutionKey,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    Removed {
        key: ExecutionKey,
    },
}

impl ReconciliationSnapshot {
    /// The snapshot published before the first poll
    pub fn empty(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            sequence: 0,
            taken_at: Utc::now(),
            records: BTreeMap::new(),
        }
    }

    pub fn get(&self, execution_id: &str) -> Option<&ExecutionRecord> {
        self.records.get(execution_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records ordered newest first (by start, falling back to request time)
    pub fn newest_first(&self) -> Vec<&ExecutionRecord> {
        let mut records: Vec<&ExecutionRecord> = self.records.values().collect();
        records.sort_by(|a, b| {
            let a_time = a.started_at.or(a.requested_at);
            let b_time = b.started_at.or(b.requested_at);
            b_time.cmp(&a_time)
        });
        records
    }

    /// Records belonging to one pipeline, newest first
    pub fn for_pipeline(&self, pipeline: &str) -> Vec<&ExecutionRecord> {
        self.newest_first()
            .into_iter()
            .filter(|r| r.pipeline == pipeline)
            .collect()
    }

    /// Execution counts by status, optionally restricted to one pipeline
    pub fn counts_by_status(&self, pipeline: Option<&str>) -> BTreeMap<ExecutionStatus, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records.values() {
            if pipeline.is_some_and(|p| p != record.pipeline) {
                continue;
            }
            *counts.entry(record.status).or_insert(0) += 1;
        }
        counts
    }

    /// Changes needed to go from `previous` to `self`
    pub fn diff(&self, previous: &ReconciliationSnapshot) -> Vec<SnapshotChange> {
        let mut changes = Vec::new();

        for (id, record) in &self.records {
            match previous.records.get(id) {
                None => changes.push(SnapshotChange::Added {
                    key: record.key.clone(),
                    status: record.status,
                }),
                Some(old) if old.status != record.status => {
                    changes.push(SnapshotChange::StatusChanged {
                        key: record.key.clone(),
                        from: old.status,
                        to: record.status,
                    })
                }
                Some(_) => {}
            }
        }

        for (id, record) in &previous.records {
            if !self.records.contains_key(id) {
                changes.push(SnapshotChange::Removed {
                    key: record.key.clone(),
                });
            }
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, pipeline: &str, status: ExecutionStatus) -> ExecutionRecord {
        let mut record = ExecutionRecord::speculative(
            ExecutionKey::new("staging", id),
            pipeline,
            id,
            BTreeMap::new(),
        );
        record.status = status;
        record
    }

    fn snapshot(sequence: u64, records: Vec<ExecutionRecord>) -> ReconciliationSnapshot {
        ReconciliationSnapshot {
            environment: "staging".to_string(),
            sequence,
            taken_at: Utc::now(),
            records: records
                .into_iter()
                .map(|r| (r.key.execution_id.clone(), r))
                .collect(),
        }
    }

    #[test]
    fn test_counts_by_status() {
        let snap = snapshot(
            1,
            vec![
                record("a", "reviews", ExecutionStatus::Running),
                record("b", "reviews", ExecutionStatus::Failed),
                record("c", "reports", ExecutionStatus::Running),
            ],
        );

        let all = snap.counts_by_status(None);
        assert_eq!(all.get(&ExecutionStatus::Running), Some(&2));
        assert_eq!(all.get(&ExecutionStatus::Failed), Some(&1));

        let reviews = snap.counts_by_status(Some("reviews"));
        assert_eq!(reviews.get(&ExecutionStatus::Running), Some(&1));
        assert_eq!(snap.for_pipeline("reports").len(), 1);
    }

    #[test]
    fn test_diff_reports_changes() {
        let before = snapshot(
            1,
            vec![
                record("a", "reviews", ExecutionStatus::PendingConfirm),
                record("gone", "reviews", ExecutionStatus::Succeeded),
            ],
        );
        let after = snapshot(
            2,
            vec![
                record("a", "reviews", ExecutionStatus::Running),
                record("new", "reviews", ExecutionStatus::Running),
            ],
        );

        let changes = after.diff(&before);
        assert_eq!(changes.len(), 3);
        assert!(changes.contains(&SnapshotChange::StatusChanged {
            key: ExecutionKey::new("staging", "a"),
            from: ExecutionStatus::PendingConfirm,
            to: ExecutionStatus::Running,
        }));
        assert!(changes.contains(&SnapshotChange::Added {
            key: ExecutionKey::new("staging", "new"),
            status: ExecutionStatus::Running,
        }));
        assert!(changes.contains(&SnapshotChange::Removed {
            key: ExecutionKey::new("staging", "gone"),
        }));
    }
}
