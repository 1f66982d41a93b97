//! Job repository: the authoritative job store.
//!
//! Every state change is one conditional `UPDATE` whose `WHERE` clause
//! carries the legal predecessor states, so two writers racing on the same
//! job cannot both win.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dispatch_core::{CampaignId, Job, JobId, JobState, job_types, template, timestamp};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use super::{StateCount, parse_key};
use crate::{Database, DbError};

/// Status line written on jobs reset by orphan recovery.
pub const ORPHAN_MESSAGE: &str = "Re-queued after worker restart";

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    #[serde(default, skip_serializing)]
    id: Option<Thing>,
    job_type: String,
    state: JobState,
    total: u64,
    processed: u64,
    succeeded: u64,
    failed: u64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    worker_id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option"
    )]
    lease_expires_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option"
    )]
    started_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option"
    )]
    completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            id: None,
            job_type: job.job_type.clone(),
            state: job.state,
            total: job.total,
            processed: job.processed,
            succeeded: job.succeeded,
            failed: job.failed,
            message: job.message.clone(),
            payload: job.payload.clone(),
            worker_id: job.worker_id.clone(),
            lease_expires_at: job.lease_expires_at,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

impl JobRecord {
    fn into_job(self) -> Result<Job, DbError> {
        Ok(Job {
            id: parse_key("job", self.id.as_ref())?,
            job_type: self.job_type,
            state: self.state,
            total: self.total,
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
            message: self.message,
            payload: self.payload,
            worker_id: self.worker_id,
            lease_expires_at: self.lease_expires_at,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

fn into_jobs(records: Vec<JobRecord>) -> Result<Vec<Job>, DbError> {
    records.into_iter().map(JobRecord::into_job).collect()
}

/// Counter deltas and field overrides applied together with a transition.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct JobChange {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Replace the expected total.
    pub total: Option<u64>,
    /// Replace the status line.
    pub message: Option<String>,
}

impl JobChange {
    /// One unit of work done, counted as a success or a failure.
    pub fn step(succeeded: bool) -> Self {
        Self {
            processed: 1,
            succeeded: u64::from(succeeded),
            failed: u64::from(!succeeded),
            ..Default::default()
        }
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Filter options for listing jobs.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub job_type: Option<String>,
    pub state: Option<JobState>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// SET fragments, extra WHERE conditions and their bindings.
#[derive(Default)]
struct Update {
    sets: Vec<String>,
    conditions: Vec<String>,
    bindings: Vec<(&'static str, serde_json::Value)>,
    /// Bindings that could not be serialized.
    invalid: Vec<String>,
}

impl Update {
    fn set(&mut self, fragment: impl Into<String>) -> &mut Self {
        self.sets.push(fragment.into());
        self
    }

    fn bind(&mut self, name: &'static str, value: impl Serialize) -> &mut Self {
        match serde_json::to_value(value) {
            Ok(value) => self.bindings.push((name, value)),
            Err(e) => self.invalid.push(format!("${}: {}", name, e)),
        }
        self
    }

    fn check(&self) -> Result<(), DbError> {
        match self.invalid.first() {
            Some(reason) => Err(DbError::Serialization(format!("Cannot bind {}", reason))),
            None => Ok(()),
        }
    }

    /// Counter increments, optional total/message, and the bound check
    /// that keeps `processed <= total`.
    fn apply_change(&mut self, change: &JobChange) {
        if let Some(total) = change.total {
            self.set("total = $new_total").bind("new_total", total);
        }
        if change.processed > 0 {
            self.set("processed += $d_processed");
        }
        if change.succeeded > 0 {
            self.set("succeeded += $d_succeeded")
                .bind("d_succeeded", change.succeeded);
        }
        if change.failed > 0 {
            self.set("failed += $d_failed").bind("d_failed", change.failed);
        }
        if let Some(message) = &change.message {
            self.set("message = $message").bind(
                "message",
                template::truncate(message, template::MAX_ERROR_LEN),
            );
        }
        if change.processed > 0 || change.total.is_some() {
            let bound = if change.total.is_some() {
                "$new_total"
            } else {
                "total"
            };
            self.conditions
                .push(format!("processed + $d_processed <= {}", bound));
            self.bind("d_processed", change.processed);
        }
    }
}

/// Predecessors for a generic transition. The orphan reset
/// (`running -> pending`) is reserved for [`JobRepository::recover_orphans`].
fn predecessors(next: JobState) -> Vec<JobState> {
    [
        JobState::Pending,
        JobState::Running,
        JobState::Completed,
        JobState::Failed,
        JobState::Cancelled,
    ]
    .into_iter()
    .filter(|from| from.can_transition_to(next))
    .filter(|from| !(*from == JobState::Running && next == JobState::Pending))
    .collect()
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new job in the database.
    pub async fn create(&self, job: &Job) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self
            .db
            .create(("job", job.id.to_string()))
            .content(JobRecord::from(job))
            .await?;

        record
            .map(JobRecord::into_job)
            .transpose()?
            .ok_or_else(|| DbError::Query("Failed to create job".into()))
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;

        record
            .map(JobRecord::into_job)
            .transpose()?
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// List jobs with optional filtering, newest first.
    pub async fn list(&self, filter: JobFilter) -> Result<Vec<Job>, DbError> {
        let mut conditions = Vec::new();
        let mut bindings: Vec<(&str, serde_json::Value)> = Vec::new();

        if let Some(job_type) = &filter.job_type {
            conditions.push("job_type = $job_type");
            bindings.push(("job_type", serde_json::json!(job_type)));
        }

        if let Some(state) = &filter.state {
            conditions.push("state = $state");
            bindings.push(("state", serde_json::json!(state.as_str())));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let offset_clause = filter
            .offset
            .map(|o| format!("START {}", o))
            .unwrap_or_default();

        let query = format!(
            "SELECT * FROM job {} ORDER BY created_at DESC {} {}",
            where_clause, limit_clause, offset_clause
        );

        let mut result = self.db.query(&query);

        for (name, value) in bindings {
            result = result.bind((name, value));
        }

        let mut response = result.await?;
        let records: Vec<JobRecord> = response.take(0)?;

        into_jobs(records)
    }

    /// Pending and running jobs of a type, oldest first.
    pub async fn list_active(&self, job_type: &str) -> Result<Vec<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM job
                WHERE job_type = $job_type AND state IN ["pending", "running"]
                ORDER BY created_at ASC
                "#,
            )
            .bind(("job_type", job_type.to_string()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        into_jobs(records)
    }

    /// Most recent jobs of a type, newest first.
    pub async fn list_latest(&self, job_type: &str, limit: usize) -> Result<Vec<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM job
                WHERE job_type = $job_type
                ORDER BY created_at DESC
                LIMIT $limit
                "#,
            )
            .bind(("job_type", job_type.to_string()))
            .bind(("limit", limit as i64))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        into_jobs(records)
    }

    /// The oldest active job of a type.
    pub async fn get_active(&self, job_type: &str) -> Result<Option<Job>, DbError> {
        Ok(self.list_active(job_type).await?.into_iter().next())
    }

    /// The newest job of a type, whatever its state.
    pub async fn get_latest(&self, job_type: &str) -> Result<Option<Job>, DbError> {
        Ok(self.list_latest(job_type, 1).await?.into_iter().next())
    }

    /// Active `campaign_send` jobs targeting one campaign, oldest first.
    pub async fn find_active_for_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM job
                WHERE job_type = $job_type
                    AND state IN ["pending", "running"]
                    AND payload.campaign_id = $campaign_id
                ORDER BY created_at ASC
                "#,
            )
            .bind(("job_type", job_types::CAMPAIGN_SEND))
            .bind(("campaign_id", campaign_id.to_string()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        into_jobs(records)
    }

    /// Compare-and-set to `next` from any of its legal predecessors,
    /// applying `change` in the same statement.
    pub async fn transition(
        &self,
        id: JobId,
        next: JobState,
        change: JobChange,
    ) -> Result<Job, DbError> {
        let now = timestamp::format(&timestamp::now());
        let mut update = Update::default();

        if next == JobState::Completed {
            // completion pins total to the work actually done
            let mut change = change;
            change.total = None;
            update.apply_change(&change);
            update.conditions.clear();
            update.set("total = processed");
        } else {
            update.apply_change(&change);
        }

        update.set("state = $next").bind("next", next.as_str());
        match next {
            JobState::Running => {
                update.set("started_at = started_at ?? $now");
            }
            state if state.is_terminal() => {
                update
                    .set("completed_at = $now")
                    .set("worker_id = NONE")
                    .set("lease_expires_at = NONE");
            }
            _ => {}
        }
        update.bind("now", now);

        self.apply(id, &predecessors(next), update).await
    }

    /// Take ownership of a pending job for `worker_id` until `lease_until`.
    pub async fn claim(
        &self,
        id: JobId,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<Job, DbError> {
        let mut update = Update::default();
        update
            .set("state = 'running'")
            .set("started_at = $now")
            .set("worker_id = $worker_id")
            .set("lease_expires_at = $lease")
            .bind("now", timestamp::format(&timestamp::now()))
            .bind("worker_id", worker_id)
            .bind("lease", timestamp::format(&lease_until));

        self.apply(id, &[JobState::Pending], update).await
    }

    /// Apply counter deltas to a running job.
    pub async fn record_progress(&self, id: JobId, change: JobChange) -> Result<Job, DbError> {
        if change.is_empty() {
            return self.get(id).await;
        }
        let mut update = Update::default();
        update.apply_change(&change);
        self.apply(id, &[JobState::Running], update).await
    }

    /// Mark a running job completed with its summary.
    pub async fn complete(&self, id: JobId, message: impl Into<String>) -> Result<Job, DbError> {
        self.transition(
            id,
            JobState::Completed,
            JobChange::default().with_message(message),
        )
        .await
    }

    /// Mark a pending or running job failed. The error is truncated.
    pub async fn fail(&self, id: JobId, error: impl Into<String>) -> Result<Job, DbError> {
        self.transition(id, JobState::Failed, JobChange::default().with_message(error))
            .await
    }

    /// Cancel a job that has not started yet.
    pub async fn cancel(&self, id: JobId) -> Result<Job, DbError> {
        self.transition(
            id,
            JobState::Cancelled,
            JobChange::default().with_message("Cancelled"),
        )
        .await
    }

    /// Extend the lease held by `worker_id`. Returns false once the job
    /// is no longer running under that worker.
    pub async fn renew_lease(
        &self,
        id: JobId,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET lease_expires_at = $lease
                WHERE state = 'running' AND worker_id = $worker_id
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease", timestamp::format(&lease_until)))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(!records.is_empty())
    }

    /// Drop the lease so the next recovery pass re-queues the job.
    pub async fn release_lease(&self, id: JobId, worker_id: &str) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET worker_id = NONE, lease_expires_at = NONE
                WHERE state = 'running' AND worker_id = $worker_id
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("worker_id", worker_id.to_string()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(!records.is_empty())
    }

    /// Reset running jobs whose lease lapsed (or was released) to pending.
    ///
    /// Progress counters restart because the handler will run again from
    /// the beginning. Returns the reset jobs so they can be re-enqueued.
    pub async fn recover_orphans(&self, now: DateTime<Utc>) -> Result<Vec<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                UPDATE job
                SET state = 'pending',
                    message = $message,
                    processed = 0,
                    succeeded = 0,
                    failed = 0,
                    worker_id = NONE,
                    lease_expires_at = NONE
                WHERE state = 'running'
                    AND (lease_expires_at = NONE OR lease_expires_at < $now)
                RETURN AFTER
                "#,
            )
            .bind(("message", ORPHAN_MESSAGE))
            .bind(("now", timestamp::format(&now)))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        into_jobs(records)
    }

    /// Count jobs by state.
    pub async fn count_by_state(&self) -> Result<HashMap<JobState, u64>, DbError> {
        let mut result = self
            .db
            .query("SELECT state, count() AS count FROM job GROUP BY state")
            .await?;

        let counts: Vec<StateCount> = result.take(0)?;

        let mut map = HashMap::new();
        for row in counts {
            if let Some(state) = row.state
                && let Ok(state) = serde_json::from_value::<JobState>(serde_json::json!(state))
            {
                map.insert(state, row.count as u64);
            }
        }

        Ok(map)
    }

    async fn apply(&self, id: JobId, from: &[JobState], update: Update) -> Result<Job, DbError> {
        update.check()?;

        let mut conditions = vec!["state IN $from".to_string()];
        conditions.extend(update.conditions);

        let query = format!(
            "UPDATE type::thing('job', $id) SET {} WHERE {} RETURN AFTER",
            update.sets.join(", "),
            conditions.join(" AND ")
        );

        let from: Vec<&'static str> = from.iter().map(|s| s.as_str()).collect();
        let mut result = self
            .db
            .query(&query)
            .bind(("id", id.to_string()))
            .bind(("from", from.clone()));

        for (name, value) in update.bindings {
            result = result.bind((name, value));
        }

        let mut response = result.await?;
        let records: Vec<JobRecord> = response.take(0)?;

        match records.into_iter().next() {
            Some(record) => record.into_job(),
            None => Err(self.explain_miss(id, &from).await),
        }
    }

    /// Work out why a conditional update matched nothing.
    async fn explain_miss(&self, id: JobId, from: &[&str]) -> DbError {
        match self.get(id).await {
            Err(e) => e,
            Ok(job) if !from.contains(&job.state.as_str()) => {
                DbError::Conflict(format!("Job {} is {}", id, job.state))
            }
            Ok(job) => DbError::Conflict(format!(
                "Job {} progress would exceed total ({}/{})",
                id, job.processed, job.total
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_transition_never_resets_running_jobs() {
        assert_eq!(predecessors(JobState::Pending), Vec::<JobState>::new());
        assert_eq!(predecessors(JobState::Cancelled), vec![JobState::Pending]);
        assert_eq!(
            predecessors(JobState::Failed),
            vec![JobState::Pending, JobState::Running]
        );
        assert_eq!(predecessors(JobState::Completed), vec![JobState::Running]);
    }

    #[test]
    fn step_counts_outcome() {
        let ok = JobChange::step(true);
        assert_eq!((ok.processed, ok.succeeded, ok.failed), (1, 1, 0));
        let bad = JobChange::step(false);
        assert_eq!((bad.processed, bad.succeeded, bad.failed), (1, 0, 1));
    }

    #[test]
    fn bound_check_tracks_new_total() {
        let mut update = Update::default();
        update.apply_change(&JobChange::default().with_total(5));
        assert_eq!(update.conditions, vec!["processed + $d_processed <= $new_total"]);

        let mut update = Update::default();
        update.apply_change(&JobChange::step(true));
        assert_eq!(update.conditions, vec!["processed + $d_processed <= total"]);
    }

    #[test]
    fn unserializable_binding_is_an_error() {
        let mut update = Update::default();
        update.bind("ok", 1);
        assert!(update.check().is_ok());

        // JSON object keys must be strings
        let bad: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
        update.bind("bad", bad);
        assert_eq!(update.bindings.len(), 1);
        assert!(matches!(update.check(), Err(DbError::Serialization(msg)) if msg.contains("$bad")));
    }
}
