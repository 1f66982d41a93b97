//! Campaign lifecycle: CRUD, recipient computation and state transitions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::Store;
use db::repositories::{CampaignFilter, CampaignUpdate, RecipientPage};
use dispatch_core::{
    Campaign, CampaignAction, CampaignId, CampaignState, Contact, ContactId, EngineEvent,
    MAX_PACING_SECS, Recipient, RecipientFilter, RecipientState, template, timestamp,
};

use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::transport::{MessageTransport, TransportError};

/// Phone used for previews when no contact matches the filter.
const SAMPLE_PHONE: &str = "+10000000000";
const SAMPLE_NAME: &str = "Sample";

/// Drives campaigns through their state machine.
///
/// Every transition is a compare-and-set on the stored state; an illegal
/// one returns [`EngineError::Validation`] and changes nothing.
#[derive(Clone)]
pub struct CampaignController {
    store: Store,
    dispatcher: Dispatcher,
    transport: Arc<dyn MessageTransport>,
}

impl CampaignController {
    pub fn new(dispatcher: Dispatcher, transport: Arc<dyn MessageTransport>) -> Self {
        Self {
            store: dispatcher.store().clone(),
            dispatcher,
            transport,
        }
    }

    /// Persist a new campaign and compute its recipients.
    pub async fn create(&self, mut campaign: Campaign) -> EngineResult<Campaign> {
        validate_text("name", &campaign.name)?;
        validate_text("message", &campaign.message)?;
        validate_pacing(campaign.pacing_secs)?;
        campaign.filter = campaign.filter.normalized();

        let campaign = self.store.campaigns.create(&campaign).await?;
        let total = self.compute_recipients(campaign.id).await?;
        tracing::info!(
            campaign_id = %campaign.id,
            recipients = total,
            "Campaign created"
        );
        Ok(self.store.campaigns.get(campaign.id).await?)
    }

    /// Edit a draft, scheduled or paused campaign and recompute its
    /// recipients. The edit and the new recipient set commit together.
    pub async fn update(&self, id: CampaignId, mut changes: CampaignUpdate) -> EngineResult<Campaign> {
        if let Some(name) = &changes.name {
            validate_text("name", name)?;
        }
        if let Some(message) = &changes.message {
            validate_text("message", message)?;
        }
        if let Some(pacing) = changes.pacing_secs {
            validate_pacing(pacing)?;
        }
        changes.filter = changes.filter.map(RecipientFilter::normalized);

        let before = self.store.campaigns.get(id).await?;
        if !CampaignAction::Edit.is_allowed(before.state) {
            return Err(EngineError::Validation(format!(
                "Cannot edit campaign {} while {}",
                id, before.state
            )));
        }

        let filter = changes.filter.as_ref().unwrap_or(&before.filter);
        let ids: Vec<ContactId> = self
            .matching_contacts(filter)
            .await?
            .iter()
            .map(|c| c.id)
            .collect();
        let total = self
            .store
            .recipients
            .replace_with_edit(id, &changes, &ids)
            .await?;
        tracing::info!(campaign_id = %id, recipients = total, "Campaign updated");
        Ok(self.store.campaigns.get(id).await?)
    }

    /// Remove a campaign and its recipients, whatever its state.
    pub async fn delete(&self, id: CampaignId) -> EngineResult<()> {
        self.store.campaigns.delete(id).await?;
        tracing::info!(campaign_id = %id, "Campaign deleted");
        Ok(())
    }

    pub async fn get(&self, id: CampaignId) -> EngineResult<Campaign> {
        Ok(self.store.campaigns.get(id).await?)
    }

    pub async fn list(&self, filter: CampaignFilter) -> EngineResult<Vec<Campaign>> {
        Ok(self.store.campaigns.list(filter).await?)
    }

    /// Begin sending. Recipients are computed first if there are none; a
    /// campaign that still has none is rejected and left untouched.
    pub async fn start(&self, id: CampaignId) -> EngineResult<Campaign> {
        let before = self.store.campaigns.get(id).await?;
        if !CampaignAction::Start.is_allowed(before.state) {
            return Err(EngineError::Validation(format!(
                "Cannot start campaign {} while {}",
                id, before.state
            )));
        }

        if before.total_recipients == 0 && self.compute_recipients(id).await? == 0 {
            return Err(EngineError::Validation(format!(
                "Campaign {} has no recipients",
                id
            )));
        }

        let (previous, campaign) = self
            .store
            .campaigns
            .transition_from(id, CampaignAction::Start)
            .await?;
        tracing::info!(
            campaign_id = %id,
            recipients = campaign.total_recipients,
            "Campaign started"
        );
        self.state_changed(id, previous, CampaignState::Sending);
        self.dispatcher.ensure_campaign_sender(id).await?;
        Ok(campaign)
    }

    pub async fn pause(&self, id: CampaignId) -> EngineResult<Campaign> {
        let campaign = self.store.campaigns.transition(id, CampaignAction::Pause).await?;
        tracing::info!(campaign_id = %id, "Campaign paused");
        self.state_changed(id, CampaignState::Sending, campaign.state);
        Ok(campaign)
    }

    pub async fn resume(&self, id: CampaignId) -> EngineResult<Campaign> {
        let campaign = self.store.campaigns.transition(id, CampaignAction::Resume).await?;
        tracing::info!(campaign_id = %id, "Campaign resumed");
        self.state_changed(id, CampaignState::Paused, campaign.state);
        self.dispatcher.ensure_campaign_sender(id).await?;
        Ok(campaign)
    }

    pub async fn cancel(&self, id: CampaignId) -> EngineResult<Campaign> {
        let (previous, campaign) = self
            .store
            .campaigns
            .transition_from(id, CampaignAction::Cancel)
            .await?;
        tracing::info!(campaign_id = %id, from = %previous, "Campaign cancelled");
        self.state_changed(id, previous, CampaignState::Cancelled);
        Ok(campaign)
    }

    /// Rebuild the recipient list from the campaign's filter. Returns the
    /// new recipient count.
    pub async fn compute_recipients(&self, id: CampaignId) -> EngineResult<u64> {
        let campaign = self.store.campaigns.get(id).await?;
        let contacts = self.matching_contacts(&campaign.filter).await?;
        let ids: Vec<ContactId> = contacts.iter().map(|c| c.id).collect();

        let total = self
            .store
            .recipients
            .replace_for_campaign(id, &ids)
            .await?;
        tracing::debug!(campaign_id = %id, recipients = total, "Recipients computed");
        Ok(total)
    }

    pub async fn recipients(
        &self,
        id: CampaignId,
        page: RecipientPage,
    ) -> EngineResult<Vec<Recipient>> {
        // surface NotFound for unknown campaigns instead of an empty page
        self.store.campaigns.get(id).await?;
        Ok(self.store.recipients.list(id, page).await?)
    }

    /// Recipient counts of one campaign by delivery state.
    pub async fn recipient_stats(
        &self,
        id: CampaignId,
    ) -> EngineResult<HashMap<RecipientState, u64>> {
        self.store.campaigns.get(id).await?;
        Ok(self.store.recipients.count_by_state(id).await?)
    }

    /// Campaign counts by state.
    pub async fn stats(&self) -> EngineResult<HashMap<CampaignState, u64>> {
        Ok(self.store.campaigns.count_by_state().await?)
    }

    /// The message as the first matching contact would receive it, or as
    /// rendered for sample data when nobody matches.
    pub async fn preview(&self, id: CampaignId) -> EngineResult<String> {
        let campaign = self.store.campaigns.get(id).await?;
        let contact = match self.matching_contacts(&campaign.filter).await?.into_iter().next() {
            Some(contact) => contact,
            None => Contact::new(SAMPLE_PHONE).with_name(SAMPLE_NAME),
        };
        Ok(template::render(&campaign.message, &contact))
    }

    /// Send the campaign's message to `phones` right away, outside the
    /// recipient list and pacing. Each phone gets the message rendered for
    /// its stored contact, or for a bare contact with that phone.
    ///
    /// Campaign counters are not touched. Delivery errors are reported per
    /// phone.
    pub async fn send_test(
        &self,
        id: CampaignId,
        phones: &[String],
    ) -> EngineResult<Vec<(String, Result<(), TransportError>)>> {
        let campaign = self.store.campaigns.get(id).await?;
        let phones: Vec<&str> = phones
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        if phones.is_empty() {
            return Err(EngineError::Validation(
                "At least one phone is required".into(),
            ));
        }

        let mut results = Vec::with_capacity(phones.len());
        for phone in phones {
            let contact = match self.store.contacts.find_by_phone(phone).await? {
                Some(contact) => contact,
                None => Contact::new(phone),
            };
            let text = template::render(&campaign.message, &contact);
            let outcome = self.transport.send(phone, &text).await;
            if let Err(e) = &outcome {
                tracing::warn!(campaign_id = %id, phone, error = %e, "Test send failed");
            }
            results.push((phone.to_string(), outcome));
        }

        let delivered = results.iter().filter(|(_, r)| r.is_ok()).count();
        tracing::info!(
            campaign_id = %id,
            delivered,
            failed = results.len() - delivered,
            "Test messages sent"
        );
        Ok(results)
    }

    /// Inbound message from `phone`: stamps the contact and marks its sent
    /// recipients as replied. Returns the campaigns whose `replied` moved.
    pub async fn record_inbound(&self, phone: &str) -> EngineResult<Vec<CampaignId>> {
        let now = timestamp::now();
        let Some(contact) = self.store.contacts.touch_inbound(phone, now).await? else {
            tracing::debug!(phone, "Inbound message from unknown contact");
            return Ok(Vec::new());
        };
        self.record_reply_at(contact.id, now).await
    }

    /// Mark `contact_id`'s sent recipients as replied.
    pub async fn record_reply(&self, contact_id: ContactId) -> EngineResult<Vec<CampaignId>> {
        self.store.contacts.get(contact_id).await?;
        self.record_reply_at(contact_id, timestamp::now()).await
    }

    async fn record_reply_at(
        &self,
        contact_id: ContactId,
        at: DateTime<Utc>,
    ) -> EngineResult<Vec<CampaignId>> {
        let touched = self
            .store
            .recipients
            .mark_replied_for_contact(contact_id, at)
            .await?;
        if !touched.is_empty() {
            tracing::info!(
                contact_id = %contact_id,
                campaigns = touched.len(),
                "Recorded reply"
            );
        }
        Ok(touched)
    }

    /// Start every scheduled campaign whose time has come.
    ///
    /// Failures are logged per campaign and do not stop the others.
    pub async fn start_due(&self, now: DateTime<Utc>) -> EngineResult<Vec<Campaign>> {
        let due = self.store.campaigns.due_scheduled(now).await?;
        let mut started = Vec::with_capacity(due.len());
        for campaign in due {
            match self.start(campaign.id).await {
                Ok(campaign) => started.push(campaign),
                Err(e) => {
                    tracing::warn!(
                        campaign_id = %campaign.id,
                        error = %e,
                        "Scheduled start failed"
                    );
                }
            }
        }
        Ok(started)
    }

    /// Give every `sending` campaign without an active sender a new one.
    /// Returns how many senders were enqueued.
    pub async fn reconcile_senders(&self) -> EngineResult<usize> {
        let mut enqueued = 0;
        for campaign in self.store.campaigns.list_sending().await? {
            if let Some(job) = self.dispatcher.ensure_campaign_sender(campaign.id).await? {
                tracing::info!(
                    campaign_id = %campaign.id,
                    job_id = %job.id,
                    "Enqueued missing campaign sender"
                );
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    async fn matching_contacts(&self, filter: &RecipientFilter) -> EngineResult<Vec<Contact>> {
        let now = timestamp::now();
        let candidates = self.store.contacts.list_candidates().await?;
        Ok(candidates
            .into_iter()
            .filter(|contact| filter.matches(contact, now))
            .collect())
    }

    fn state_changed(&self, campaign_id: CampaignId, old_state: CampaignState, new_state: CampaignState) {
        let _ = self.dispatcher.events().send(EngineEvent::CampaignStateChanged {
            campaign_id,
            old_state,
            new_state,
            timestamp: timestamp::now(),
        });
    }
}

fn validate_pacing(pacing_secs: u64) -> EngineResult<()> {
    if pacing_secs > MAX_PACING_SECS {
        return Err(EngineError::Validation(format!(
            "Campaign pacing must be at most {} seconds",
            MAX_PACING_SECS
        )));
    }
    Ok(())
}

fn validate_text(field: &str, value: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("Campaign {} must not be empty", field)));
    }
    Ok(())
}
