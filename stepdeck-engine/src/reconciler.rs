//! Reconciliation Engine merge step
//!
//! A [`Reconciler`] owns one environment's partition of execution records. It is
//! driven by its poller: [`Reconciler::plan`] says what to fetch, the poller does
//! the remote calls, and [`Reconciler::merge`] folds the [`Observations`] into the
//! records. Merging is synchronous and never fails as a whole; a record that
//! cannot be merged is quarantined as `UNKNOWN` and the rest of the cycle goes on.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use stepdeck_client::RemoteError;
use stepdeck_core::domain::execution::{ExecutionKey, ExecutionRecord, ExecutionStatus, Verdict};
use stepdeck_core::domain::snapshot::ReconciliationSnapshot;
use stepdeck_core::dto::remote::{MalformedRecord, RemoteExecution};
use tracing::{debug, info, warn};

/// What one poll cycle should fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPlan {
    /// `(pipeline, target)` pairs to list
    pub targets: Vec<(String, String)>,
    /// Records whose status may still change; described unless the listing
    /// already covered them
    pub active: Vec<String>,
    /// Records that already carry an error summary
    pub with_error_summary: BTreeSet<String>,
}

impl FetchPlan {
    /// Executions to describe after listing
    ///
    /// Active records missing from the listing, plus listed failures whose error
    /// summary is not known yet (listings do not carry errors).
    pub fn describe_candidates(&self, listings: &[TargetListing]) -> Vec<String> {
        let mut listed = BTreeSet::new();
        let mut candidates = Vec::new();

        for listing in listings {
            let Ok(items) = &listing.items else {
                continue;
            };
            for remote in items.iter().flatten() {
                listed.insert(remote.execution_id.clone());
                if remote.status() == ExecutionStatus::Failed
                    && !self.with_error_summary.contains(&remote.execution_id)
                {
                    candidates.push(remote.execution_id.clone());
                }
            }
        }

        candidates.extend(
            self.active
                .iter()
                .filter(|id| !listed.contains(*id))
                .cloned(),
        );
        candidates
    }
}

/// Listing of one pipeline's executions
#[derive(Debug)]
pub struct TargetListing {
    pub pipeline: String,
    pub target: String,
    pub items: Result<Vec<Result<RemoteExecution, MalformedRecord>>, RemoteError>,
    /// False when the poll deadline cut the listing short
    pub complete: bool,
}

/// Everything fetched during one poll cycle
#[derive(Debug, Default)]
pub struct Observations {
    pub listings: Vec<TargetListing>,
    pub described: Vec<(String, Result<RemoteExecution, RemoteError>)>,
}

/// Outcome counts of one merge cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub sequence: u64,
    pub created: usize,
    pub applied: usize,
    pub confirmed: usize,
    pub stale: usize,
    pub quarantined: usize,
    pub timed_out: Vec<String>,
    pub evicted: usize,
    pub failed_calls: usize,
}

/// One environment's execution records
#[derive(Debug)]
pub struct Reconciler {
    environment: String,
    records: BTreeMap<String, ExecutionRecord>,
    sequence: u64,
    confirm_ticks: u32,
    max_records: usize,
}

impl Reconciler {
    pub fn new(environment: impl Into<String>, confirm_ticks: u32, max_records: usize) -> Self {
        Self {
            environment: environment.into(),
            records: BTreeMap::new(),
            sequence: 0,
            confirm_ticks: confirm_ticks.max(1),
            max_records: max_records.max(1),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
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

    /// Immutable copy for readers
    pub fn snapshot(&self) -> ReconciliationSnapshot {
        ReconciliationSnapshot {
            environment: self.environment.clone(),
            sequence: self.sequence,
            taken_at: Utc::now(),
            records: self.records.clone(),
        }
    }

    pub fn plan(&self, targets: Vec<(String, String)>) -> FetchPlan {
        let active = self
            .records
            .values()
            .filter(|r| r.status.is_active() && !is_local_token(&r.key.execution_id))
            .map(|r| r.key.execution_id.clone())
            .collect();
        let with_error_summary = self
            .records
            .values()
            .filter(|r| r.error_summary.is_some())
            .map(|r| r.key.execution_id.clone())
            .collect();

        FetchPlan {
            targets,
            active,
            with_error_summary,
        }
    }

    // =============================================================================
    // Local commands
    // =============================================================================

    /// Tracks the speculative record of an accepted start
    ///
    /// If the execution is already known the existing record wins.
    pub fn track(&mut self, mut record: ExecutionRecord) -> ExecutionRecord {
        let id = record.key.execution_id.clone();
        if let Some(existing) = self.records.get(&id) {
            debug!("Start of {} matched an execution already tracked", id);
            return existing.clone();
        }

        record.key.environment = self.environment.clone();
        record.revision = self.sequence;
        self.records.insert(id, record.clone());
        self.evict();
        record
    }

    /// Notes that a stop was sent for a record
    pub fn request_stop(&mut self, execution_id: &str, at: DateTime<Utc>) -> Option<ExecutionRecord> {
        let record = self.records.get_mut(execution_id)?;
        record.stop_requested_at = Some(at);
        Some(record.clone())
    }

    /// Moves a failed record to `REDRIVEN` after the remote accepted a redrive
    ///
    /// Returns the record's current status when the transition is not allowed.
    pub fn redrive(&mut self, execution_id: &str) -> Result<ExecutionRecord, Option<ExecutionStatus>> {
        let record = self.records.get_mut(execution_id).ok_or(None)?;
        match record.judge(ExecutionStatus::Redriven, None) {
            Verdict::Redrive => {
                record.status = ExecutionStatus::Redriven;
                record.last_known_status = None;
                record.redrive_count += 1;
                record.stopped_at = None;
                record.error_summary = None;
                record.revision = self.sequence;
                Ok(record.clone())
            }
            _ => Err(Some(record.status)),
        }
    }

    // =============================================================================
    // Merge
    // =============================================================================

    /// Folds one cycle's observations into the records
    pub fn merge(&mut self, observations: Observations) -> MergeReport {
        self.sequence += 1;
        let mut report = MergeReport {
            sequence: self.sequence,
            ..MergeReport::default()
        };
        let mut observed: BTreeSet<String> = BTreeSet::new();
        let mut unlisted_pipelines: BTreeSet<String> = BTreeSet::new();

        for listing in observations.listings {
            let items = match listing.items {
                Ok(items) => items,
                Err(e) => {
                    warn!(
                        "[{}] Listing {} failed: {}",
                        self.environment, listing.pipeline, e
                    );
                    report.failed_calls += 1;
                    unlisted_pipelines.insert(listing.pipeline);
                    continue;
                }
            };
            // Absence from a partial listing proves nothing
            if !listing.complete {
                debug!(
                    "[{}] Listing {} is partial ({} items)",
                    self.environment,
                    listing.pipeline,
                    items.len()
                );
                unlisted_pipelines.insert(listing.pipeline.clone());
            }

            for item in items {
                match item {
                    Ok(remote) => {
                        observed.insert(remote.execution_id.clone());
                        self.observe(&listing.pipeline, remote, &mut report);
                    }
                    Err(malformed) => {
                        if let Some(id) = &malformed.execution_id {
                            observed.insert(id.clone());
                        }
                        self.quarantine(&listing.pipeline, malformed, &mut report);
                    }
                }
            }
        }

        for (execution_id, result) in observations.described {
            match result {
                Ok(remote) => {
                    let pipeline = self
                        .records
                        .get(&execution_id)
                        .map(|r| r.pipeline.clone())
                        .unwrap_or_default();
                    observed.insert(remote.execution_id.clone());
                    self.observe(&pipeline, remote, &mut report);
                }
                Err(e) if e.is_not_found() => {
                    debug!(
                        "[{}] {} is not visible remotely yet",
                        self.environment, execution_id
                    );
                }
                Err(e) if e.is_malformed() => {
                    let pipeline = self
                        .records
                        .get(&execution_id)
                        .map(|r| r.pipeline.clone())
                        .unwrap_or_default();
                    observed.insert(execution_id.clone());
                    let malformed = MalformedRecord {
                        execution_id: Some(execution_id),
                        reason: e.to_string(),
                    };
                    self.quarantine(&pipeline, malformed, &mut report);
                }
                Err(e) => {
                    warn!(
                        "[{}] Describing {} failed: {}",
                        self.environment, execution_id, e
                    );
                    report.failed_calls += 1;
                }
            }
        }

        self.age_speculative(&observed, &unlisted_pipelines, &mut report);
        report.evicted = self.evict();

        debug!(
            "[{}] Merge #{}: {} new, {} applied, {} stale, {} quarantined",
            self.environment,
            report.sequence,
            report.created,
            report.applied,
            report.stale,
            report.quarantined
        );
        report
    }

    /// Applies one remote observation
    fn observe(&mut self, pipeline: &str, remote: RemoteExecution, report: &mut MergeReport) {
        let id = remote.execution_id.clone();
        self.adopt_speculative(pipeline, &remote);

        let sequence = self.sequence;
        let next = remote.status();

        let Some(record) = self.records.get_mut(&id) else {
            let record = self.record_from_remote(pipeline, &remote);
            if record.status == ExecutionStatus::Unknown {
                warn!(
                    "[{}] {} reports unrecognised status '{}'",
                    self.environment, id, remote.status
                );
                report.quarantined += 1;
            }
            self.records.insert(id, record);
            report.created += 1;
            return;
        };

        let was_speculative = record.is_speculative();
        match record.judge(next, remote.redrive_count) {
            Verdict::Unchanged => {
                refresh_details(record, &remote);
                record.revision = sequence;
            }
            Verdict::Apply => {
                if next == ExecutionStatus::Unknown {
                    warn!(
                        "[{}] {} reports unrecognised status '{}'; quarantined",
                        self.environment, id, remote.status
                    );
                    record.last_known_status = Some(record.effective_status());
                    report.quarantined += 1;
                } else {
                    if record.status == ExecutionStatus::Unknown {
                        record.error_summary = None;
                    }
                    record.last_known_status = None;
                    record.stopped_at = remote.stopped_at;
                }
                record.status = next;
                record.pending_ticks = 0;
                if !next.is_active() {
                    record.stop_requested_at = None;
                }
                refresh_details(record, &remote);
                record.revision = sequence;
                report.applied += 1;
                if was_speculative {
                    report.confirmed += 1;
                }
            }
            Verdict::Redrive => {
                record.status = next;
                record.last_known_status = None;
                record.redrive_count = (record.redrive_count + 1).max(remote.redrive_count.unwrap_or(0));
                record.stopped_at = None;
                record.error_summary = None;
                refresh_details(record, &remote);
                record.revision = sequence;
                report.applied += 1;
            }
            Verdict::Stale => {
                record.stale_observations += 1;
                report.stale += 1;
                debug!(
                    "[{}] Discarding stale observation of {}: {} -> {}",
                    self.environment, id, record.status, next
                );
            }
        }
    }

    /// Re-keys a speculative record once its remote identity shows up
    ///
    /// The execution name is the idempotency token, so a pending record of the same
    /// pipeline and name is the start this observation confirms.
    fn adopt_speculative(&mut self, pipeline: &str, remote: &RemoteExecution) {
        if self.records.contains_key(&remote.execution_id) {
            return;
        }
        let Some(old_id) = self
            .records
            .values()
            .find(|r| r.is_speculative() && r.name == remote.name && r.pipeline == pipeline)
            .map(|r| r.key.execution_id.clone())
        else {
            return;
        };

        if let Some(mut record) = self.records.remove(&old_id) {
            debug!(
                "[{}] {} confirmed as {}",
                self.environment, old_id, remote.execution_id
            );
            record.key.execution_id = remote.execution_id.clone();
            self.records.insert(remote.execution_id.clone(), record);
        }
    }

    fn record_from_remote(&self, pipeline: &str, remote: &RemoteExecution) -> ExecutionRecord {
        ExecutionRecord {
            key: ExecutionKey::new(self.environment.clone(), remote.execution_id.clone()),
            pipeline: pipeline.to_string(),
            name: remote.name.clone(),
            status: remote.status(),
            last_known_status: None,
            requested_at: None,
            started_at: remote.started_at,
            stopped_at: remote.stopped_at,
            input: parse_input(remote.input.as_deref()),
            error_summary: remote.error_summary(),
            revision: self.sequence,
            redrive_count: remote.redrive_count.unwrap_or(0),
            stale_observations: 0,
            pending_ticks: 0,
            stop_requested_at: None,
        }
    }

    /// Isolates a record the remote returned in unreadable form
    fn quarantine(&mut self, pipeline: &str, malformed: MalformedRecord, report: &mut MergeReport) {
        let Some(id) = malformed.execution_id else {
            warn!(
                "[{}] Dropping unidentifiable remote record of {}: {}",
                self.environment, pipeline, malformed.reason
            );
            return;
        };
        warn!(
            "[{}] Quarantining {}: {}",
            self.environment, id, malformed.reason
        );
        report.quarantined += 1;

        let sequence = self.sequence;
        match self.records.get_mut(&id) {
            Some(record) => match record.judge(ExecutionStatus::Unknown, None) {
                Verdict::Apply => {
                    record.last_known_status = Some(record.effective_status());
                    record.status = ExecutionStatus::Unknown;
                    record.revision = sequence;
                }
                Verdict::Unchanged => record.revision = sequence,
                _ => record.stale_observations += 1,
            },
            None => {
                let name = id.rsplit(':').next().unwrap_or(&id).to_string();
                let mut record = ExecutionRecord::speculative(
                    ExecutionKey::new(self.environment.clone(), id.clone()),
                    pipeline,
                    name,
                    BTreeMap::new(),
                );
                record.status = ExecutionStatus::Unknown;
                record.requested_at = None;
                record.error_summary = Some(format!("unreadable remote record: {}", malformed.reason));
                record.revision = sequence;
                self.records.insert(id, record);
                report.created += 1;
            }
        }
    }

    /// Counts a tick against every speculative record nobody confirmed
    fn age_speculative(
        &mut self,
        observed: &BTreeSet<String>,
        unlisted_pipelines: &BTreeSet<String>,
        report: &mut MergeReport,
    ) {
        for record in self.records.values_mut() {
            if !record.is_speculative()
                || observed.contains(&record.key.execution_id)
                || unlisted_pipelines.contains(&record.pipeline)
            {
                continue;
            }

            record.pending_ticks += 1;
            if record.pending_ticks >= self.confirm_ticks
                && record.judge(ExecutionStatus::UnconfirmedTimeout, None) == Verdict::Apply
            {
                warn!(
                    "[{}] Start of {} ({}) was not confirmed after {} polls",
                    self.environment, record.name, record.pipeline, record.pending_ticks
                );
                record.status = ExecutionStatus::UnconfirmedTimeout;
                record.revision = self.sequence;
                report.timed_out.push(record.key.execution_id.clone());
            }
        }
    }

    /// Trims the window to `max_records`
    ///
    /// Oldest finished records go first, then the oldest of the rest. Speculative
    /// records are never evicted.
    fn evict(&mut self) -> usize {
        let excess = self.records.len().saturating_sub(self.max_records);
        if excess == 0 {
            return 0;
        }

        let mut candidates: Vec<(bool, Option<DateTime<Utc>>, u64, String)> = self
            .records
            .values()
            .filter(|r| !r.is_speculative())
            .map(|r| {
                (
                    r.status.is_active(),
                    r.started_at.or(r.requested_at),
                    r.revision,
                    r.key.execution_id.clone(),
                )
            })
            .collect();
        // Finished before active, then oldest first
        candidates.sort();

        let evicted: Vec<String> = candidates
            .into_iter()
            .take(excess)
            .map(|(_, _, _, id)| id)
            .collect();
        for id in &evicted {
            self.records.remove(id);
        }
        if !evicted.is_empty() {
            info!(
                "[{}] Evicted {} record(s) from the window",
                self.environment,
                evicted.len()
            );
        }
        evicted.len()
    }
}

fn refresh_details(record: &mut ExecutionRecord, remote: &RemoteExecution) {
    if remote.started_at.is_some() {
        record.started_at = remote.started_at;
    }
    if remote.stopped_at.is_some() && !record.status.is_active() {
        record.stopped_at = remote.stopped_at;
    }
    if let Some(summary) = remote.error_summary() {
        record.error_summary = Some(summary);
    }
    if record.input.is_empty() {
        record.input = parse_input(remote.input.as_deref());
    }
    if let Some(observed) = remote.redrive_count {
        record.redrive_count = record.redrive_count.max(observed);
    }
    if record.name.is_empty() {
        record.name = remote.name.clone();
    }
}

fn parse_input(raw: Option<&str>) -> BTreeMap<String, JsonValue> {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

/// Identifiers minted locally for starts the remote did not identify
pub fn is_local_token(execution_id: &str) -> bool {
    execution_id.starts_with("local-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stepdeck_client::testing::{execution_id_for, remote_execution};

    const TARGET: &str = "arn:aws:states:eu-west-1:123456789012:stateMachine:reviews";
    const PIPELINE: &str = "refactoring-reviews";

    fn reconciler() -> Reconciler {
        Reconciler::new("staging", 3, 10)
    }

    fn listing(items: Vec<RemoteExecution>) -> Observations {
        Observations {
            listings: vec![TargetListing {
                pipeline: PIPELINE.to_string(),
                target: TARGET.to_string(),
                complete: true,
                items: Ok(items.into_iter().map(Ok).collect()),
            }],
            described: Vec::new(),
        }
    }

    fn remote(name: &str, status: &str) -> RemoteExecution {
        remote_execution(TARGET, name, status)
    }

    fn speculative(id: &str, name: &str) -> ExecutionRecord {
        ExecutionRecord::speculative(
            ExecutionKey::new("staging", id),
            PIPELINE,
            name,
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_creates_records_from_remote() {
        let mut reconciler = reconciler();
        let report = reconciler.merge(listing(vec![remote("run_1", "RUNNING"), remote("run_2", "WEIRD")]));

        assert_eq!(report.created, 2);
        assert_eq!(report.quarantined, 1);
        let running = reconciler.get(&execution_id_for(TARGET, "run_1")).unwrap();
        assert_eq!(running.status, ExecutionStatus::Running);
        assert_eq!(running.pipeline, PIPELINE);
        assert_eq!(running.revision, 1);
        assert_eq!(
            reconciler.get(&execution_id_for(TARGET, "run_2")).unwrap().status,
            ExecutionStatus::Unknown
        );
    }

    #[test]
    fn test_confirms_speculative_record_by_id() {
        let mut reconciler = reconciler();
        let id = execution_id_for(TARGET, "run_1");
        reconciler.track(speculative(&id, "run_1"));

        let report = reconciler.merge(listing(vec![remote("run_1", "RUNNING")]));

        assert_eq!(report.confirmed, 1);
        let record = reconciler.get(&id).unwrap();
        assert_eq!(record.status, ExecutionStatus::Running);
        assert!(record.started_at.is_some());
    }

    #[test]
    fn test_confirms_speculative_record_by_name() {
        let mut reconciler = reconciler();
        reconciler.track(speculative("local-abc", "run_1"));

        reconciler.merge(listing(vec![remote("run_1", "RUNNING")]));

        assert!(reconciler.get("local-abc").is_none());
        let record = reconciler.get(&execution_id_for(TARGET, "run_1")).unwrap();
        assert_eq!(record.status, ExecutionStatus::Running);
        assert_eq!(record.key.execution_id, execution_id_for(TARGET, "run_1"));
        assert!(record.requested_at.is_some());
    }

    #[test]
    fn test_regressions_are_discarded() {
        let mut reconciler = reconciler();
        let id = execution_id_for(TARGET, "run_1");
        reconciler.merge(listing(vec![remote("run_1", "SUCCEEDED")]));

        let report = reconciler.merge(listing(vec![remote("run_1", "RUNNING")]));

        assert_eq!(report.stale, 1);
        let record = reconciler.get(&id).unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(record.stale_observations, 1);
        assert_eq!(record.revision, 1);
    }

    #[test]
    fn test_unconfirmed_timeout_fires_once() {
        let mut reconciler = reconciler();
        reconciler.track(speculative("local-abc", "run_1"));

        let mut timeouts = 0;
        for _ in 0..6 {
            let report = reconciler.merge(listing(Vec::new()));
            timeouts += report.timed_out.len();
            // Never flips back to pending
            if reconciler.get("local-abc").unwrap().status == ExecutionStatus::UnconfirmedTimeout {
                assert!(!reconciler.get("local-abc").unwrap().is_speculative());
            }
        }

        assert_eq!(timeouts, 1);
        let record = reconciler.get("local-abc").unwrap();
        assert_eq!(record.status, ExecutionStatus::UnconfirmedTimeout);
        assert_eq!(record.pending_ticks, 3);

        // A late observation cannot resurrect the record
        reconciler.merge(listing(vec![remote("run_1", "RUNNING")]));
        assert_eq!(
            reconciler.get("local-abc").unwrap().status,
            ExecutionStatus::UnconfirmedTimeout
        );
    }

    #[test]
    fn test_failed_listing_does_not_age_speculative_records() {
        let mut reconciler = reconciler();
        reconciler.track(speculative("local-abc", "run_1"));

        for _ in 0..5 {
            reconciler.merge(Observations {
                listings: vec![TargetListing {
                    pipeline: PIPELINE.to_string(),
                    target: TARGET.to_string(),
                complete: true,
                    items: Err(RemoteError::Throttled("slow down".to_string())),
                }],
                described: Vec::new(),
            });
        }

        let record = reconciler.get("local-abc").unwrap();
        assert_eq!(record.status, ExecutionStatus::PendingConfirm);
        assert_eq!(record.pending_ticks, 0);
    }

    #[test]
    fn test_malformed_records_are_quarantined() {
        let mut reconciler = reconciler();
        let id = execution_id_for(TARGET, "run_1");
        reconciler.merge(listing(vec![remote("run_1", "RUNNING"), remote("run_2", "RUNNING")]));

        let report = reconciler.merge(Observations {
            listings: vec![TargetListing {
                pipeline: PIPELINE.to_string(),
                target: TARGET.to_string(),
                complete: true,
                items: Ok(vec![
                    Err(MalformedRecord {
                        execution_id: Some(id.clone()),
                        reason: "missing field `status`".to_string(),
                    }),
                    Err(MalformedRecord {
                        execution_id: None,
                        reason: "not an object".to_string(),
                    }),
                    Ok(remote("run_2", "SUCCEEDED")),
                ]),
            }],
            described: Vec::new(),
        });

        assert_eq!(report.quarantined, 1);
        let quarantined = reconciler.get(&id).unwrap();
        assert_eq!(quarantined.status, ExecutionStatus::Unknown);
        assert_eq!(quarantined.last_known_status, Some(ExecutionStatus::Running));
        // The rest of the cycle still applied
        assert_eq!(
            reconciler.get(&execution_id_for(TARGET, "run_2")).unwrap().status,
            ExecutionStatus::Succeeded
        );

        // Recovers once the remote record is readable again
        reconciler.merge(listing(vec![remote("run_1", "FAILED")]));
        let recovered = reconciler.get(&id).unwrap();
        assert_eq!(recovered.status, ExecutionStatus::Failed);
        assert_eq!(recovered.last_known_status, None);
    }

    #[test]
    fn test_partial_listing_applies_but_does_not_age() {
        let mut reconciler = reconciler();
        reconciler.track(speculative("local-abc", "run_x"));

        for _ in 0..5 {
            let mut observations = listing(vec![remote("run_1", "RUNNING")]);
            observations.listings[0].complete = false;
            reconciler.merge(observations);
        }

        assert_eq!(reconciler.sequence(), 5);
        assert_eq!(
            reconciler.get(&execution_id_for(TARGET, "run_1")).unwrap().status,
            ExecutionStatus::Running
        );
        let pending = reconciler.get("local-abc").unwrap();
        assert_eq!(pending.status, ExecutionStatus::PendingConfirm);
        assert_eq!(pending.pending_ticks, 0);
    }

    #[test]
    fn test_undecodable_describe_is_quarantined() {
        let mut reconciler = reconciler();
        let id = execution_id_for(TARGET, "run_1");
        reconciler.merge(listing(vec![remote("run_1", "RUNNING")]));

        let report = reconciler.merge(Observations {
            listings: Vec::new(),
            described: vec![(
                id.clone(),
                Err(RemoteError::Malformed(
                    "Failed to parse DescribeExecution response: missing field `status`".to_string(),
                )),
            )],
        });

        assert_eq!(report.quarantined, 1);
        assert_eq!(report.failed_calls, 0);
        let record = reconciler.get(&id).unwrap();
        assert_eq!(record.status, ExecutionStatus::Unknown);
        assert_eq!(record.last_known_status, Some(ExecutionStatus::Running));
        assert_eq!(record.pipeline, PIPELINE);

        // Transient failures leave the record alone
        let report = reconciler.merge(Observations {
            listings: Vec::new(),
            described: vec![(id.clone(), Err(RemoteError::Transient("reset".to_string())))],
        });
        assert_eq!(report.failed_calls, 1);
        assert_eq!(reconciler.get(&id).unwrap().status, ExecutionStatus::Unknown);
    }

    #[test]
    fn test_local_redrive_then_confirmation() {
        let mut reconciler = reconciler();
        let id = execution_id_for(TARGET, "run_1");
        reconciler.merge(listing(vec![remote("run_1", "FAILED")]));

        let record = reconciler.redrive(&id).unwrap();
        assert_eq!(record.status, ExecutionStatus::Redriven);
        assert_eq!(record.redrive_count, 1);

        // A listing taken before the redrive still says FAILED
        reconciler.merge(listing(vec![remote("run_1", "FAILED")]));
        assert_eq!(reconciler.get(&id).unwrap().status, ExecutionStatus::Redriven);

        let mut running = remote("run_1", "RUNNING");
        running.redrive_count = Some(1);
        reconciler.merge(listing(vec![running]));
        assert_eq!(reconciler.get(&id).unwrap().status, ExecutionStatus::Running);

        assert_eq!(reconciler.redrive(&id).unwrap_err(), Some(ExecutionStatus::Running));
        assert_eq!(reconciler.redrive("unknown").unwrap_err(), None);
    }

    #[test]
    fn test_describe_candidates() {
        let mut reconciler = reconciler();
        reconciler.merge(listing(vec![remote("old", "RUNNING")]));
        reconciler.track(speculative("local-abc", "run_x"));

        let plan = reconciler.plan(vec![(PIPELINE.to_string(), TARGET.to_string())]);
        // Local tokens cannot be described
        assert_eq!(plan.active, vec![execution_id_for(TARGET, "old")]);

        let listings = vec![TargetListing {
            pipeline: PIPELINE.to_string(),
            target: TARGET.to_string(),
            items: Ok(vec![Ok(remote("failed", "FAILED")), Ok(remote("done", "SUCCEEDED"))]),
            complete: true,
        }];
        let candidates = plan.describe_candidates(&listings);
        assert_eq!(
            candidates,
            vec![execution_id_for(TARGET, "failed"), execution_id_for(TARGET, "old")]
        );
    }

    #[test]
    fn test_eviction_spares_speculative_and_active() {
        let mut reconciler = Reconciler::new("staging", 3, 3);
        let mut done = remote("done", "SUCCEEDED");
        done.started_at = Some(Utc::now() - chrono::Duration::hours(1));
        reconciler.merge(listing(vec![done, remote("running", "RUNNING")]));
        reconciler.track(speculative("local-1", "a"));
        reconciler.track(speculative("local-2", "b"));

        assert_eq!(reconciler.len(), 3);
        assert!(reconciler.get(&execution_id_for(TARGET, "done")).is_none());
        assert!(reconciler.get(&execution_id_for(TARGET, "running")).is_some());
        assert!(reconciler.get("local-1").is_some());
        assert!(reconciler.get("local-2").is_some());
    }

    #[test]
    fn test_stop_request_cleared_by_outcome() {
        let mut reconciler = reconciler();
        let id = execution_id_for(TARGET, "run_1");
        reconciler.merge(listing(vec![remote("run_1", "RUNNING")]));

        let record = reconciler.request_stop(&id, Utc::now()).unwrap();
        assert!(record.stop_requested_at.is_some());
        assert_eq!(record.status, ExecutionStatus::Running);

        reconciler.merge(listing(vec![remote("run_1", "STOPPED")]));
        let record = reconciler.get(&id).unwrap();
        assert_eq!(record.status, ExecutionStatus::Stopped);
        assert_eq!(record.stop_requested_at, None);
    }

    const REMOTE_STATUSES: &[&str] = &[
        "RUNNING",
        "SUCCEEDED",
        "FAILED",
        "STOPPED",
        "TIMED_OUT",
        "ABORTED",
        "PENDING_REDRIVE",
        "PAUSED",
    ];

    proptest! {
        #[test]
        fn property_merged_status_sequences_are_monotonic(
            steps in prop::collection::vec((0..REMOTE_STATUSES.len(), 0u32..3, any::<bool>()), 1..30),
        ) {
            let mut reconciler = reconciler();
            let id = execution_id_for(TARGET, "run");
            reconciler.track(speculative(&id, "run"));

            let mut previous = reconciler.get(&id).unwrap().clone();
            for (status, redrives, malformed) in steps {
                let observations = if malformed {
                    Observations {
                        listings: vec![TargetListing {
                            pipeline: PIPELINE.to_string(),
                            target: TARGET.to_string(),
                complete: true,
                            items: Ok(vec![Err(MalformedRecord {
                                execution_id: Some(id.clone()),
                                reason: "garbled".to_string(),
                            })]),
                        }],
                        described: Vec::new(),
                    }
                } else {
                    let mut observed = remote("run", REMOTE_STATUSES[status]);
                    observed.redrive_count = Some(redrives);
                    listing(vec![observed])
                };
                reconciler.merge(observations);

                let current = reconciler.get(&id).unwrap().clone();
                if current.status != previous.status {
                    // Every applied change is one the previous record accepts
                    let verdict = previous.judge(current.status, Some(current.redrive_count));
                    prop_assert!(
                        matches!(verdict, Verdict::Apply | Verdict::Redrive),
                        "{} -> {} applied as {:?}", previous.status, current.status, verdict
                    );
                }
                prop_assert!(current.redrive_count <= 2);
                prop_assert!(!(previous.status.is_final() && current.status != previous.status));
                previous = current;
            }
        }
    }
}
