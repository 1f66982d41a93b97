//! Job submission and re-enqueueing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::Store;
use db::repositories::JobFilter;
use dispatch_core::{CampaignId, EngineEvent, Job, JobId, JobState, QueueItem, job_types, timestamp};
use serde_json::json;
use tokio::sync::{Mutex, broadcast};

use crate::error::{EngineError, EngineResult};
use crate::queue::JobQueue;

/// Creates jobs in the store and hands them to the queue.
#[derive(Clone)]
pub struct Dispatcher {
    store: Store,
    queue: Arc<dyn JobQueue>,
    events: broadcast::Sender<EngineEvent>,
    /// Serializes the check-then-create of campaign senders.
    sender_guard: Arc<Mutex<()>>,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        queue: Arc<dyn JobQueue>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            store,
            queue,
            events,
            sender_guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn events(&self) -> &broadcast::Sender<EngineEvent> {
        &self.events
    }

    /// Persist a pending job and enqueue its hint.
    pub async fn submit(
        &self,
        job_type: &str,
        total_hint: u64,
        message: impl Into<String>,
        payload: serde_json::Value,
    ) -> EngineResult<Job> {
        let job = Job::new(job_type, payload)
            .with_total(total_hint)
            .with_message(message);
        let job = self.store.jobs.create(&job).await?;
        self.enqueue(&job).await?;

        tracing::info!(job_id = %job.id, job_type = %job.job_type, "Job submitted");
        let _ = self.events.send(EngineEvent::JobEnqueued {
            job_id: job.id,
            job_type: job.job_type.clone(),
            timestamp: timestamp::now(),
        });

        Ok(job)
    }

    /// Push an existing job's hint onto the queue.
    pub async fn enqueue(&self, job: &Job) -> EngineResult<()> {
        self.queue.enqueue(QueueItem::from(job)).await?;
        Ok(())
    }

    /// Cancel a job that has not been claimed yet.
    pub async fn cancel(&self, job_id: JobId) -> EngineResult<Job> {
        let job = self.store.jobs.cancel(job_id).await?;
        tracing::info!(job_id = %job_id, "Job cancelled");
        Ok(job)
    }

    /// Reset orphaned running jobs and put them back on the queue.
    pub async fn recover_orphans(&self, now: DateTime<Utc>) -> EngineResult<Vec<Job>> {
        let recovered = self.store.jobs.recover_orphans(now).await?;
        for job in &recovered {
            tracing::warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                "Recovered orphaned job"
            );
            self.enqueue(job).await?;
            let _ = self.events.send(EngineEvent::JobRecovered {
                job_id: job.id,
                timestamp: timestamp::now(),
            });
        }
        Ok(recovered)
    }

    /// Startup pass: recover orphans, then re-enqueue every pending job
    /// oldest first, since queue entries do not survive a restart.
    ///
    /// Duplicate entries are harmless: a worker only runs a job it can
    /// claim from `pending`.
    pub async fn restore(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let recovered = self.recover_orphans(now).await?;
        let recovered_ids: Vec<JobId> = recovered.iter().map(|j| j.id).collect();

        let pending = self
            .store
            .jobs
            .list(JobFilter {
                state: Some(JobState::Pending),
                ..Default::default()
            })
            .await?;

        let mut restored = recovered.len();
        for job in pending.iter().rev() {
            if recovered_ids.contains(&job.id) {
                continue;
            }
            self.enqueue(job).await?;
            restored += 1;
        }

        if restored > 0 {
            tracing::info!(restored, "Restored jobs onto the queue");
        }
        Ok(restored)
    }

    /// Re-enqueue pending jobs older than `min_age` whenever the queue has
    /// run dry.
    ///
    /// Covers jobs whose hint went to another process's queue or was lost
    /// with a restarted queue. While the queue still holds items nothing is
    /// added, so a backlog is never duplicated. Returns how many jobs were
    /// re-enqueued.
    pub async fn rescue_pending(
        &self,
        now: DateTime<Utc>,
        min_age: std::time::Duration,
    ) -> EngineResult<usize> {
        if self.queue.len().await? > 0 {
            return Ok(0);
        }

        let cutoff = chrono::Duration::from_std(min_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(now);
        let pending = self
            .store
            .jobs
            .list(JobFilter {
                state: Some(JobState::Pending),
                ..Default::default()
            })
            .await?;

        let mut rescued = 0;
        for job in pending.iter().rev().filter(|job| job.created_at <= cutoff) {
            self.enqueue(job).await?;
            rescued += 1;
        }

        if rescued > 0 {
            tracing::info!(rescued, "Re-enqueued stranded pending jobs");
        }
        Ok(rescued)
    }

    /// Make sure exactly one `campaign_send` job is active for a campaign.
    ///
    /// Returns the job that was created, or `None` if one already exists.
    pub async fn ensure_campaign_sender(&self, campaign_id: CampaignId) -> EngineResult<Option<Job>> {
        let _guard = self.sender_guard.lock().await;

        let active = self.store.jobs.find_active_for_campaign(campaign_id).await?;
        if !active.is_empty() {
            return Ok(None);
        }

        let campaign = self.store.campaigns.get(campaign_id).await?;
        if campaign.state.is_terminal() {
            return Err(EngineError::Validation(format!(
                "Campaign {} is {}",
                campaign_id, campaign.state
            )));
        }

        let job = self
            .submit(
                job_types::CAMPAIGN_SEND,
                campaign.remaining(),
                format!("Sending campaign {}", campaign.name),
                json!({ "campaign_id": campaign_id.to_string() }),
            )
            .await?;
        Ok(Some(job))
    }
}
