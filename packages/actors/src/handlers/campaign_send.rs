//! Rate-limited campaign delivery.
//!
//! One `campaign_send` job drives a campaign to exhaustion. Each
//! [`CampaignSender::step`] re-reads the campaign, so pause and cancel take
//! effect before the next send. An in-flight send is never interrupted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use db::repositories::JobChange;
use db::{DbError, Store};
use dispatch_core::{
    CampaignAction, CampaignId, CampaignState, EngineEvent, RecipientId, RecipientState, job_types,
    template, timestamp,
};
use tokio::sync::broadcast;

use crate::error::EngineResult;
use crate::handler::{HandlerError, HandlerFuture, HandlerResult, JobContext, JobHandler};
use crate::transport::MessageTransport;

/// Error recorded on recipients whose contact disappeared.
pub const CONTACT_MISSING: &str = "Contact not found";

/// Outcome of one sender iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStep {
    /// Pacing has not elapsed; try again after this long.
    Wait(Duration),
    Sent(RecipientId),
    Failed(RecipientId),
    /// No pending recipient was left; the campaign is now completed.
    Finished,
    /// The campaign is not sending (paused, cancelled, ...).
    Halted(CampaignState),
}

/// Performs single paced sends for campaigns.
#[derive(Clone)]
pub struct CampaignSender {
    store: Store,
    transport: Arc<dyn MessageTransport>,
    events: broadcast::Sender<EngineEvent>,
}

impl CampaignSender {
    pub fn new(
        store: Store,
        transport: Arc<dyn MessageTransport>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            store,
            transport,
            events,
        }
    }

    /// Attempt at most one send for `campaign_id` as of `now`.
    pub async fn step(&self, campaign_id: CampaignId, now: DateTime<Utc>) -> EngineResult<SendStep> {
        let campaign = self.store.campaigns.get(campaign_id).await?;
        if campaign.state != CampaignState::Sending {
            return Ok(SendStep::Halted(campaign.state));
        }

        if let Some(wait) = campaign.pacing_remaining(now) {
            return Ok(SendStep::Wait(wait));
        }

        let Some(recipient) = self.store.recipients.next_pending(campaign_id).await? else {
            return self.finish(campaign_id).await;
        };

        let contact = match self.store.contacts.get(recipient.contact_id).await {
            Ok(contact) => contact,
            Err(DbError::NotFound(_)) => {
                tracing::warn!(
                    campaign_id = %campaign_id,
                    recipient_id = %recipient.id,
                    "Recipient contact is gone"
                );
                self.store
                    .recipients
                    .mark_failed(&recipient, CONTACT_MISSING, timestamp::now())
                    .await?;
                self.delivered(campaign_id, recipient.id, RecipientState::Failed);
                return Ok(SendStep::Failed(recipient.id));
            }
            Err(e) => return Err(e.into()),
        };

        let text = template::render(&campaign.message, &contact);
        match self.transport.send(&contact.phone, &text).await {
            Ok(()) => {
                self.store
                    .recipients
                    .mark_sent(&recipient, timestamp::now())
                    .await?;
                self.delivered(campaign_id, recipient.id, RecipientState::Sent);
                Ok(SendStep::Sent(recipient.id))
            }
            Err(e) => {
                tracing::warn!(
                    campaign_id = %campaign_id,
                    recipient_id = %recipient.id,
                    error = %e,
                    "Send failed"
                );
                self.store
                    .recipients
                    .mark_failed(&recipient, &e.to_string(), timestamp::now())
                    .await?;
                self.delivered(campaign_id, recipient.id, RecipientState::Failed);
                Ok(SendStep::Failed(recipient.id))
            }
        }
    }

    async fn finish(&self, campaign_id: CampaignId) -> EngineResult<SendStep> {
        match self
            .store
            .campaigns
            .transition(campaign_id, CampaignAction::Complete)
            .await
        {
            Ok(campaign) => {
                tracing::info!(
                    campaign_id = %campaign_id,
                    sent = campaign.sent,
                    failed = campaign.failed,
                    "Campaign completed"
                );
                let _ = self.events.send(EngineEvent::CampaignStateChanged {
                    campaign_id,
                    old_state: CampaignState::Sending,
                    new_state: CampaignState::Completed,
                    timestamp: timestamp::now(),
                });
                Ok(SendStep::Finished)
            }
            // paused or cancelled between the read and the completion
            Err(DbError::Conflict(_)) => {
                let campaign = self.store.campaigns.get(campaign_id).await?;
                Ok(SendStep::Halted(campaign.state))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delivered(&self, campaign_id: CampaignId, recipient_id: RecipientId, state: RecipientState) {
        let _ = self.events.send(EngineEvent::RecipientDelivered {
            campaign_id,
            recipient_id,
            state,
            timestamp: timestamp::now(),
        });
    }
}

/// Handler for `campaign_send` jobs. Payload: `{"campaign_id": "..."}`.
#[derive(Clone)]
pub struct CampaignSendHandler {
    sender: CampaignSender,
    store: Store,
    /// Upper bound on one pacing sleep between re-reads.
    tick: Duration,
}

impl CampaignSendHandler {
    pub fn new(sender: CampaignSender, store: Store, tick: Duration) -> Self {
        Self {
            sender,
            store,
            tick,
        }
    }

    async fn run(self, ctx: JobContext) -> HandlerResult {
        let campaign_id = ctx
            .job
            .payload
            .get("campaign_id")
            .and_then(|v| v.as_str())
            .and_then(|raw| CampaignId::parse(raw).ok())
            .ok_or_else(|| HandlerError::Failed("Missing or invalid campaign_id".into()))?;

        // another sender got there first
        let active = self.store.jobs.find_active_for_campaign(campaign_id).await?;
        if let Some(oldest) = active.first()
            && oldest.id != ctx.job.id
        {
            return Ok(format!("Sender {} already active for campaign", oldest.id));
        }

        let campaign = self.store.campaigns.get(campaign_id).await?;
        let mut total = campaign.remaining();
        let mut processed = 0u64;
        let (mut sent, mut failed) = (0u64, 0u64);
        ctx.progress
            .report(JobChange::default().with_total(total))
            .await?;

        loop {
            ctx.check_cancelled()?;

            let step = self.sender.step(campaign_id, timestamp::now()).await?;
            let delivered = match step {
                SendStep::Wait(wait) => {
                    if !ctx.cancel.sleep(wait.min(self.tick)).await {
                        return Err(HandlerError::Interrupted);
                    }
                    continue;
                }
                SendStep::Sent(_) => {
                    sent += 1;
                    true
                }
                SendStep::Failed(_) => {
                    failed += 1;
                    false
                }
                SendStep::Finished => {
                    return Ok(format!("Completed: {} sent, {} failed", sent, failed));
                }
                SendStep::Halted(state) => {
                    return Ok(format!(
                        "Stopped after {} sent, {} failed: campaign is {}",
                        sent, failed, state
                    ));
                }
            };

            processed += 1;
            let mut change = JobChange::step(delivered);
            if processed > total {
                total = processed;
                change = change.with_total(total);
            }
            ctx.progress.report(change).await?;
        }
    }
}

impl JobHandler for CampaignSendHandler {
    fn job_type(&self) -> &str {
        job_types::CAMPAIGN_SEND
    }

    fn handle(&self, ctx: JobContext) -> HandlerFuture {
        Box::pin(self.clone().run(ctx))
    }
}
