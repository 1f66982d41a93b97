//! Campaign repository for CRUD and state-machine operations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dispatch_core::{
    Campaign, CampaignAction, CampaignId, CampaignKind, CampaignState, RecipientFilter, timestamp,
};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use super::{StateCount, parse_key};
use crate::{Database, DbError};

/// Repository for campaign persistence operations.
#[derive(Clone)]
pub struct CampaignRepository {
    db: Database,
}

#[derive(Debug, Serialize, Deserialize)]
struct CampaignRecord {
    #[serde(default, skip_serializing)]
    id: Option<Thing>,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    message: String,
    kind: CampaignKind,
    state: CampaignState,
    pacing_secs: u64,
    #[serde(default)]
    filter: RecipientFilter,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option"
    )]
    scheduled_at: Option<DateTime<Utc>>,
    total_recipients: u64,
    sent: u64,
    failed: u64,
    replied: u64,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    updated_at: DateTime<Utc>,
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
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option"
    )]
    last_send_at: Option<DateTime<Utc>>,
}

impl From<&Campaign> for CampaignRecord {
    fn from(c: &Campaign) -> Self {
        Self {
            id: None,
            name: c.name.clone(),
            description: c.description.clone(),
            message: c.message.clone(),
            kind: c.kind,
            state: c.state,
            pacing_secs: c.pacing_secs,
            filter: c.filter.clone(),
            scheduled_at: c.scheduled_at,
            total_recipients: c.total_recipients,
            sent: c.sent,
            failed: c.failed,
            replied: c.replied,
            created_at: c.created_at,
            updated_at: c.updated_at,
            started_at: c.started_at,
            completed_at: c.completed_at,
            last_send_at: c.last_send_at,
        }
    }
}

impl CampaignRecord {
    fn into_campaign(self) -> Result<Campaign, DbError> {
        Ok(Campaign {
            id: parse_key("campaign", self.id.as_ref())?,
            name: self.name,
            description: self.description,
            message: self.message,
            kind: self.kind,
            state: self.state,
            pacing_secs: self.pacing_secs,
            filter: self.filter,
            scheduled_at: self.scheduled_at,
            total_recipients: self.total_recipients,
            sent: self.sent,
            failed: self.failed,
            replied: self.replied,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            last_send_at: self.last_send_at,
        })
    }
}

fn into_campaigns(records: Vec<CampaignRecord>) -> Result<Vec<Campaign>, DbError> {
    records
        .into_iter()
        .map(CampaignRecord::into_campaign)
        .collect()
}

/// Editable campaign fields. `None` keeps the stored value.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CampaignUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub message: Option<String>,
    pub kind: Option<CampaignKind>,
    pub pacing_secs: Option<u64>,
    pub filter: Option<RecipientFilter>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Filter options for listing campaigns.
#[derive(Debug, Default, Clone)]
pub struct CampaignFilter {
    pub state: Option<CampaignState>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn state_names(states: &[CampaignState]) -> Vec<&'static str> {
    states.iter().map(|s| s.as_str()).collect()
}

/// SET fragments and bindings for the fields `changes` touches.
pub(super) fn edit_sets(changes: &CampaignUpdate) -> (Vec<String>, Vec<(&'static str, serde_json::Value)>) {
    let mut sets = Vec::new();
    let mut bindings: Vec<(&'static str, serde_json::Value)> = Vec::new();

    if let Some(name) = &changes.name {
        sets.push("name = $name".to_string());
        bindings.push(("name", serde_json::json!(name)));
    }
    if let Some(description) = &changes.description {
        sets.push("description = $description".to_string());
        bindings.push(("description", serde_json::json!(description)));
    }
    if let Some(message) = &changes.message {
        sets.push("message = $message".to_string());
        bindings.push(("message", serde_json::json!(message)));
    }
    if let Some(kind) = &changes.kind {
        sets.push("kind = $kind".to_string());
        bindings.push(("kind", serde_json::json!(kind)));
    }
    if let Some(pacing) = changes.pacing_secs {
        sets.push("pacing_secs = $pacing".to_string());
        bindings.push(("pacing", serde_json::json!(pacing)));
    }
    if let Some(filter) = &changes.filter {
        sets.push("filter = $filter".to_string());
        bindings.push(("filter", serde_json::json!(filter)));
    }
    if let Some(at) = &changes.scheduled_at {
        sets.push("scheduled_at = $scheduled_at".to_string());
        bindings.push(("scheduled_at", serde_json::json!(timestamp::format(at))));
    }

    (sets, bindings)
}

impl CampaignRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new campaign in the database.
    pub async fn create(&self, campaign: &Campaign) -> Result<Campaign, DbError> {
        let record: Option<CampaignRecord> = self
            .db
            .create(("campaign", campaign.id.to_string()))
            .content(CampaignRecord::from(campaign))
            .await?;

        record
            .map(CampaignRecord::into_campaign)
            .transpose()?
            .ok_or_else(|| DbError::Query("Failed to create campaign".into()))
    }

    /// Get a campaign by ID.
    pub async fn get(&self, id: CampaignId) -> Result<Campaign, DbError> {
        let record: Option<CampaignRecord> =
            self.db.select(("campaign", id.to_string())).await?;

        record
            .map(CampaignRecord::into_campaign)
            .transpose()?
            .ok_or_else(|| DbError::NotFound(format!("Campaign not found: {}", id)))
    }

    /// List campaigns, newest first.
    pub async fn list(&self, filter: CampaignFilter) -> Result<Vec<Campaign>, DbError> {
        let where_clause = if filter.state.is_some() {
            "WHERE state = $state"
        } else {
            ""
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
            "SELECT * FROM campaign {} ORDER BY created_at DESC {} {}",
            where_clause, limit_clause, offset_clause
        );

        let mut result = self.db.query(&query);
        if let Some(state) = filter.state {
            result = result.bind(("state", state.as_str()));
        }

        let mut response = result.await?;
        let records: Vec<CampaignRecord> = response.take(0)?;
        into_campaigns(records)
    }

    /// Apply an edit while the campaign is still editable. The recipient
    /// set is left as is; see [`super::RecipientRepository::replace_with_edit`].
    pub async fn update(
        &self,
        id: CampaignId,
        changes: &CampaignUpdate,
    ) -> Result<Campaign, DbError> {
        let (edits, bindings) = edit_sets(changes);
        let mut sets = vec!["updated_at = $now".to_string()];
        sets.extend(edits);

        let query = format!(
            "UPDATE type::thing('campaign', $id) SET {} WHERE state IN $from RETURN AFTER",
            sets.join(", ")
        );

        let from = state_names(CampaignAction::Edit.allowed_from());
        let mut result = self
            .db
            .query(&query)
            .bind(("id", id.to_string()))
            .bind(("from", from.clone()))
            .bind(("now", timestamp::format(&timestamp::now())));
        for (name, value) in bindings {
            result = result.bind((name, value));
        }

        let mut response = result.await?;
        let records: Vec<CampaignRecord> = response.take(0)?;

        match records.into_iter().next() {
            Some(record) => record.into_campaign(),
            None => Err(self.explain_miss(id, CampaignAction::Edit).await),
        }
    }

    /// Compare-and-set the state for `action`.
    ///
    /// `start` additionally requires at least one recipient.
    pub async fn transition(
        &self,
        id: CampaignId,
        action: CampaignAction,
    ) -> Result<Campaign, DbError> {
        if action.target().is_none() {
            return self.get(id).await;
        }
        self.compare_and_set(id, action, "AFTER").await?.into_campaign()
    }

    /// Like [`Self::transition`], also returning the state the update
    /// replaced.
    pub async fn transition_from(
        &self,
        id: CampaignId,
        action: CampaignAction,
    ) -> Result<(CampaignState, Campaign), DbError> {
        if action.target().is_none() {
            let campaign = self.get(id).await?;
            return Ok((campaign.state, campaign));
        }
        let before = self.compare_and_set(id, action, "BEFORE").await?;
        Ok((before.state, self.get(id).await?))
    }

    async fn compare_and_set(
        &self,
        id: CampaignId,
        action: CampaignAction,
        output: &str,
    ) -> Result<CampaignRecord, DbError> {
        let Some(target) = action.target() else {
            return Err(DbError::Query(format!(
                "{} does not change state",
                action.as_str()
            )));
        };

        let mut sets = vec!["state = $to", "updated_at = $now"];
        let mut conditions = vec!["state IN $from"];
        match action {
            CampaignAction::Start => {
                sets.push("started_at = started_at ?? $now");
                conditions.push("total_recipients > 0");
            }
            CampaignAction::Complete | CampaignAction::Cancel => {
                sets.push("completed_at = $now");
            }
            _ => {}
        }

        let query = format!(
            "UPDATE type::thing('campaign', $id) SET {} WHERE {} RETURN {}",
            sets.join(", "),
            conditions.join(" AND "),
            output
        );

        let mut result = self
            .db
            .query(&query)
            .bind(("id", id.to_string()))
            .bind(("to", target.as_str()))
            .bind(("from", state_names(action.allowed_from())))
            .bind(("now", timestamp::format(&timestamp::now())))
            .await?;

        let records: Vec<CampaignRecord> = result.take(0)?;

        match records.into_iter().next() {
            Some(record) => Ok(record),
            None => Err(self.explain_miss(id, action).await),
        }
    }

    /// Delete a campaign together with its recipients.
    pub async fn delete(&self, id: CampaignId) -> Result<(), DbError> {
        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                DELETE recipient WHERE campaign_id = $id;
                DELETE type::thing('campaign', $id);
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("id", id.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Scheduled campaigns whose start time has passed.
    pub async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM campaign
                WHERE state = 'scheduled' AND scheduled_at != NONE AND scheduled_at <= $now
                ORDER BY scheduled_at ASC
                "#,
            )
            .bind(("now", timestamp::format(&now)))
            .await?;

        let records: Vec<CampaignRecord> = result.take(0)?;
        into_campaigns(records)
    }

    /// Campaigns currently in `sending`.
    pub async fn list_sending(&self) -> Result<Vec<Campaign>, DbError> {
        self.list(CampaignFilter {
            state: Some(CampaignState::Sending),
            ..Default::default()
        })
        .await
    }

    /// Count campaigns by state.
    pub async fn count_by_state(&self) -> Result<HashMap<CampaignState, u64>, DbError> {
        let mut result = self
            .db
            .query("SELECT state, count() AS count FROM campaign GROUP BY state")
            .await?;

        let counts: Vec<StateCount> = result.take(0)?;

        let mut map = HashMap::new();
        for row in counts {
            if let Some(state) = row.state
                && let Ok(state) = serde_json::from_value::<CampaignState>(serde_json::json!(state))
            {
                map.insert(state, row.count as u64);
            }
        }

        Ok(map)
    }

    /// Work out why a conditional update matched nothing.
    pub(crate) async fn explain_miss(&self, id: CampaignId, action: CampaignAction) -> DbError {
        match self.get(id).await {
            Err(e) => e,
            Ok(campaign) if !action.is_allowed(campaign.state) => DbError::Conflict(format!(
                "Cannot {} campaign {} while {}",
                action.as_str(),
                id,
                campaign.state
            )),
            Ok(_) => DbError::Conflict(format!("Campaign {} has no recipients", id)),
        }
    }
}
