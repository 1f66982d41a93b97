//! Job management functions.

use actors::{EngineError, EngineResult};
use db::repositories::JobFilter;
use dispatch_core::{Job, JobId, JobState};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::Engine;

/// Default page size for job listings.
const DEFAULT_LIMIT: usize = 100;

/// Request type for submitting a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub total_hint: u64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub payload: JsonValue,
}

/// Request type for listing jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobsRequest {
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// A job with its completion percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    /// `processed / total * 100`, one decimal, 0 when total is 0.
    pub progress: f64,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let progress = job.progress();
        Self { job, progress }
    }
}

pub(crate) fn parse_job_id(id: &str) -> EngineResult<JobId> {
    JobId::parse(id).map_err(|e| EngineError::Validation(format!("Invalid job ID: {}", e)))
}

fn parse_state(state: &str) -> EngineResult<JobState> {
    serde_json::from_value(JsonValue::String(state.to_string()))
        .map_err(|_| EngineError::Validation(format!("Invalid job state: {}", state)))
}

impl Engine {
    /// Submit a job. It starts `pending` and is picked up by the next idle
    /// worker.
    pub async fn submit_job(&self, request: SubmitJobRequest) -> EngineResult<JobId> {
        if request.job_type.trim().is_empty() {
            return Err(EngineError::Validation("Job type must not be empty".into()));
        }
        let job = self
            .dispatcher
            .submit(
                &request.job_type,
                request.total_hint,
                request.message,
                request.payload,
            )
            .await?;
        Ok(job.id)
    }

    pub async fn get_job(&self, id: &str) -> EngineResult<JobView> {
        let job_id = parse_job_id(id)?;
        Ok(self.store().jobs.get(job_id).await?.into())
    }

    /// The oldest pending or running job of `job_type`.
    pub async fn get_active_job(&self, job_type: &str) -> EngineResult<Option<JobView>> {
        Ok(self.store().jobs.get_active(job_type).await?.map(JobView::from))
    }

    /// The most recently created job of `job_type`.
    pub async fn get_latest_job(&self, job_type: &str) -> EngineResult<Option<JobView>> {
        Ok(self.store().jobs.get_latest(job_type).await?.map(JobView::from))
    }

    /// Cancel a job that no worker has claimed yet.
    pub async fn cancel_job(&self, id: &str) -> EngineResult<JobView> {
        let job_id = parse_job_id(id)?;
        Ok(self.dispatcher.cancel(job_id).await?.into())
    }

    /// Jobs newest first.
    pub async fn list_jobs(&self, request: ListJobsRequest) -> EngineResult<Vec<JobView>> {
        let state = request.state.as_deref().map(parse_state).transpose()?;
        let filter = JobFilter {
            job_type: request.job_type,
            state,
            limit: Some(request.limit.unwrap_or(DEFAULT_LIMIT)),
            offset: request.offset,
        };

        let jobs = self.store().jobs.list(filter).await?;
        Ok(jobs.into_iter().map(JobView::from).collect())
    }
}
