//! Event types for real-time updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CampaignId, CampaignState, JobId, JobState, RecipientId, RecipientState};

/// Events emitted by the engine for real-time consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    // Job events
    /// A job was created and handed to the queue.
    JobEnqueued {
        job_id: JobId,
        job_type: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker claimed a job.
    JobStarted {
        job_id: JobId,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A handler reported progress.
    JobProgress {
        job_id: JobId,
        processed: u64,
        total: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job reached `completed`.
    JobCompleted {
        job_id: JobId,
        message: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job reached `failed`.
    JobFailed {
        job_id: JobId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A job left its handler without a final state (shutdown).
    JobInterrupted {
        job_id: JobId,
        state: JobState,
        timestamp: DateTime<Utc>,
    },
    /// An orphaned running job was reset to pending and re-enqueued.
    JobRecovered {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },

    // Campaign events
    /// A campaign moved between states.
    CampaignStateChanged {
        campaign_id: CampaignId,
        old_state: CampaignState,
        new_state: CampaignState,
        timestamp: DateTime<Utc>,
    },
    /// A recipient was attempted.
    RecipientDelivered {
        campaign_id: CampaignId,
        recipient_id: RecipientId,
        state: RecipientState,
        timestamp: DateTime<Utc>,
    },

    // Worker events
    /// A worker actor started pulling from the queue.
    WorkerConnected {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker actor stopped.
    WorkerDisconnected {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            EngineEvent::JobEnqueued { job_id, .. }
            | EngineEvent::JobStarted { job_id, .. }
            | EngineEvent::JobProgress { job_id, .. }
            | EngineEvent::JobCompleted { job_id, .. }
            | EngineEvent::JobFailed { job_id, .. }
            | EngineEvent::JobInterrupted { job_id, .. }
            | EngineEvent::JobRecovered { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }
}
