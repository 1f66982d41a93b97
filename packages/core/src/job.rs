//! Background job domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Job type names understood by the built-in handlers.
pub mod job_types {
    /// Check every contact against the messaging network.
    pub const VERIFY_CONTACTS: &str = "verify_contacts";
    /// Import contacts from the messaging network.
    pub const SYNC_CONTACTS: &str = "sync_contacts";
    /// Drive one campaign's paced delivery.
    pub const CAMPAIGN_SEND: &str = "campaign_send";
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Whether `self -> next` is a legal edge.
    ///
    /// `Running -> Pending` is the orphan reset and is only taken by
    /// lease recovery.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Pending)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable record of one background operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Routing key for the handler registry.
    pub job_type: String,
    pub state: JobState,
    /// Expected amount of work. Starts as a producer hint and may be
    /// revised by the handler once it knows the real size.
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Latest human-readable status line; the summary once finished.
    pub message: String,
    /// Dispatch arguments, kept so that a recovered job can be re-enqueued.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Worker currently holding the lease, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            state: JobState::Pending,
            total: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            message: String::new(),
            payload,
            worker_id: None,
            lease_expires_at: None,
            created_at: crate::timestamp::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the expected amount of work.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    /// Set the initial status line.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Completion percentage rounded to one decimal; zero while the total
    /// is unknown.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let pct = self.processed as f64 / self.total as f64 * 100.0;
        (pct * 10.0).round() / 10.0
    }
}

/// The hint carried by the queue. The store stays authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub job_id: JobId,
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl From<&Job> for QueueItem {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
        }
    }
}
