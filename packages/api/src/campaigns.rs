//! Campaign management functions.

use std::collections::HashMap;

use actors::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use db::repositories::{CampaignFilter, CampaignUpdate, RecipientPage};
use dispatch_core::{
    Campaign, CampaignId, CampaignKind, CampaignState, ContactId, Recipient, RecipientFilter,
    RecipientState,
};
use serde::{Deserialize, Serialize};

use crate::Engine;

const DEFAULT_LIMIT: usize = 100;

/// Request type for creating a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    /// Template; `{name}` and `{phone}` are substituted per recipient.
    pub message: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: CampaignKind,
    /// Seconds between sends; defaults to 30.
    #[serde(default)]
    pub pacing_secs: Option<u64>,
    #[serde(default)]
    pub filter: RecipientFilter,
    /// Start automatically at this time instead of staying a draft.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl CreateCampaignRequest {
    fn into_campaign(self) -> Campaign {
        let mut campaign = Campaign::new(self.name, self.message)
            .with_kind(self.kind)
            .with_filter(self.filter);
        if let Some(description) = self.description {
            campaign = campaign.with_description(description);
        }
        if let Some(pacing) = self.pacing_secs {
            campaign = campaign.with_pacing(pacing);
        }
        if let Some(at) = self.scheduled_at {
            campaign = campaign.scheduled_for(at);
        }
        campaign
    }
}

/// Request type for listing campaigns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListCampaignsRequest {
    #[serde(default)]
    pub state: Option<CampaignState>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Request type for listing a campaign's recipients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRecipientsRequest {
    #[serde(default)]
    pub state: Option<RecipientState>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// A campaign with its recipient breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignDetail {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub recipients: HashMap<RecipientState, u64>,
}

/// Outcome of one test send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSendResult {
    pub phone: String,
    pub delivered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub(crate) fn parse_campaign_id(id: &str) -> EngineResult<CampaignId> {
    CampaignId::parse(id).map_err(|e| EngineError::Validation(format!("Invalid campaign ID: {}", e)))
}

fn parse_contact_id(id: &str) -> EngineResult<ContactId> {
    ContactId::parse(id).map_err(|e| EngineError::Validation(format!("Invalid contact ID: {}", e)))
}

impl Engine {
    pub async fn create_campaign(&self, request: CreateCampaignRequest) -> EngineResult<Campaign> {
        self.campaigns.create(request.into_campaign()).await
    }

    pub async fn update_campaign(&self, id: &str, changes: CampaignUpdate) -> EngineResult<Campaign> {
        self.campaigns.update(parse_campaign_id(id)?, changes).await
    }

    pub async fn delete_campaign(&self, id: &str) -> EngineResult<()> {
        self.campaigns.delete(parse_campaign_id(id)?).await
    }

    pub async fn get_campaign(&self, id: &str) -> EngineResult<CampaignDetail> {
        let id = parse_campaign_id(id)?;
        let campaign = self.campaigns.get(id).await?;
        let recipients = self.campaigns.recipient_stats(id).await?;
        Ok(CampaignDetail {
            campaign,
            recipients,
        })
    }

    /// Campaigns newest first.
    pub async fn list_campaigns(&self, request: ListCampaignsRequest) -> EngineResult<Vec<Campaign>> {
        self.campaigns
            .list(CampaignFilter {
                state: request.state,
                limit: Some(request.limit.unwrap_or(DEFAULT_LIMIT)),
                offset: request.offset,
            })
            .await
    }

    pub async fn start_campaign(&self, id: &str) -> EngineResult<Campaign> {
        self.campaigns.start(parse_campaign_id(id)?).await
    }

    pub async fn pause_campaign(&self, id: &str) -> EngineResult<Campaign> {
        self.campaigns.pause(parse_campaign_id(id)?).await
    }

    pub async fn resume_campaign(&self, id: &str) -> EngineResult<Campaign> {
        self.campaigns.resume(parse_campaign_id(id)?).await
    }

    pub async fn cancel_campaign(&self, id: &str) -> EngineResult<Campaign> {
        self.campaigns.cancel(parse_campaign_id(id)?).await
    }

    /// Recipients in send order.
    pub async fn campaign_recipients(
        &self,
        id: &str,
        request: ListRecipientsRequest,
    ) -> EngineResult<Vec<Recipient>> {
        let page = RecipientPage {
            state: request.state,
            limit: Some(request.limit.unwrap_or(DEFAULT_LIMIT)),
            offset: request.offset,
        };
        self.campaigns.recipients(parse_campaign_id(id)?, page).await
    }

    /// The campaign message rendered for its first recipient.
    pub async fn preview_campaign(&self, id: &str) -> EngineResult<String> {
        self.campaigns.preview(parse_campaign_id(id)?).await
    }

    /// Send the campaign message to a few phones right away.
    pub async fn send_test_campaign(
        &self,
        id: &str,
        phones: &[String],
    ) -> EngineResult<Vec<TestSendResult>> {
        let results = self.campaigns.send_test(parse_campaign_id(id)?, phones).await?;
        Ok(results
            .into_iter()
            .map(|(phone, outcome)| TestSendResult {
                phone,
                delivered: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            })
            .collect())
    }

    /// Campaign counts by state.
    pub async fn campaign_stats(&self) -> EngineResult<HashMap<CampaignState, u64>> {
        self.campaigns.stats().await
    }

    /// An inbound message arrived from `phone`.
    pub async fn record_inbound(&self, phone: &str) -> EngineResult<Vec<CampaignId>> {
        if phone.trim().is_empty() {
            return Err(EngineError::Validation("Phone must not be empty".into()));
        }
        self.campaigns.record_inbound(phone).await
    }

    /// The contact answered a campaign message.
    pub async fn record_reply(&self, contact_id: &str) -> EngineResult<Vec<CampaignId>> {
        self.campaigns.record_reply(parse_contact_id(contact_id)?).await
    }
}
