//! Campaign recipient repository.
//!
//! Recipient state changes and the matching campaign counter increments
//! commit in one transaction, which keeps `sent + failed` equal to the
//! number of terminal recipients.

use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use dispatch_core::{
    CampaignAction, CampaignId, ContactId, Recipient, RecipientId, RecipientState, timestamp,
};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use super::campaign_repo::edit_sets;
use super::{CampaignRepository, CampaignUpdate, StateCount, parse_key};
use crate::{Database, DbError};

/// Repository for recipient persistence operations.
#[derive(Clone)]
pub struct RecipientRepository {
    db: Database,
}

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct RecipientRecord {
    #[serde(default)]
    id: Option<Thing>,
    campaign_id: String,
    contact_id: String,
    position: u64,
    state: RecipientState,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, with = "timestamp::option")]
    sent_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    replied_at: Option<DateTime<Utc>>,
}

impl RecipientRecord {
    fn into_recipient(self) -> Result<Recipient, DbError> {
        let campaign_id = CampaignId::parse(&self.campaign_id)
            .map_err(|e| DbError::Serialization(format!("Invalid campaign id: {}", e)))?;
        let contact_id = ContactId::parse(&self.contact_id)
            .map_err(|e| DbError::Serialization(format!("Invalid contact id: {}", e)))?;
        Ok(Recipient {
            id: parse_key("recipient", self.id.as_ref())?,
            campaign_id,
            contact_id,
            position: self.position,
            state: self.state,
            error: self.error,
            sent_at: self.sent_at,
            replied_at: self.replied_at,
        })
    }
}

fn into_recipients(records: Vec<RecipientRecord>) -> Result<Vec<Recipient>, DbError> {
    records
        .into_iter()
        .map(RecipientRecord::into_recipient)
        .collect()
}

/// Row shape for bulk inserts; `id` becomes the record key.
#[derive(Debug, Clone, Serialize)]
struct RecipientInsert {
    id: String,
    campaign_id: String,
    contact_id: String,
    position: u64,
    state: RecipientState,
}

/// Paging and state filter for recipient listings.
#[derive(Debug, Default, Clone)]
pub struct RecipientPage {
    pub state: Option<RecipientState>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl RecipientRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get a recipient by ID.
    pub async fn get(&self, id: RecipientId) -> Result<Recipient, DbError> {
        let record: Option<RecipientRecord> = self.db.select(("recipient", id.to_string())).await?;

        record
            .map(RecipientRecord::into_recipient)
            .transpose()?
            .ok_or_else(|| DbError::NotFound(format!("Recipient not found: {}", id)))
    }

    /// Replace the recipient set of an editable campaign.
    ///
    /// Old rows are discarded, one pending row per contact is inserted in
    /// the given order, `total_recipients` becomes the row count and the
    /// delivery counters restart. Returns the new count.
    pub async fn replace_for_campaign(
        &self,
        campaign_id: CampaignId,
        contacts: &[ContactId],
    ) -> Result<u64, DbError> {
        self.replace_with_edit(campaign_id, &CampaignUpdate::default(), contacts)
            .await
    }

    /// Apply `changes` to an editable campaign and replace its recipient
    /// set in the same transaction. Either both land or neither does.
    pub async fn replace_with_edit(
        &self,
        campaign_id: CampaignId,
        changes: &CampaignUpdate,
        contacts: &[ContactId],
    ) -> Result<u64, DbError> {
        let (edits, edit_bindings) = edit_sets(changes);
        let edits: String = edits.iter().map(|set| format!(",\n                    {}", set)).collect();

        let rows: Vec<RecipientInsert> = contacts
            .iter()
            .enumerate()
            .map(|(position, contact_id)| RecipientInsert {
                id: RecipientId::new().to_string(),
                campaign_id: campaign_id.to_string(),
                contact_id: contact_id.to_string(),
                position: position as u64,
                state: RecipientState::Pending,
            })
            .collect();
        let count = rows.len() as u64;

        let insert = if rows.is_empty() {
            ""
        } else {
            "INSERT INTO recipient $rows;"
        };
        let query = format!(
            r#"
            BEGIN TRANSACTION;
            LET $campaign = (
                UPDATE type::thing('campaign', $campaign_id)
                SET total_recipients = $count,
                    sent = 0,
                    failed = 0,
                    replied = 0,
                    last_send_at = NONE,
                    updated_at = $now{edits}
                WHERE state IN $editable
                RETURN AFTER
            );
            IF array::len($campaign) = 0 {{ THROW "campaign is not editable"; }};
            DELETE recipient WHERE campaign_id = $campaign_id;
            {insert}
            COMMIT TRANSACTION;
            "#
        );

        let editable: Vec<&'static str> = CampaignAction::Edit
            .allowed_from()
            .iter()
            .map(|s| s.as_str())
            .collect();

        let mut request = self
            .db
            .query(&query)
            .bind(("campaign_id", campaign_id.to_string()))
            .bind(("count", count))
            .bind(("editable", editable))
            .bind(("now", timestamp::format(&timestamp::now())))
            .bind(("rows", rows));
        for (name, value) in edit_bindings {
            request = request.bind((name, value));
        }
        let outcome = request.await.and_then(|response| response.check());

        match outcome {
            Ok(_) => Ok(count),
            Err(e) => {
                let campaigns = CampaignRepository::new(self.db.clone());
                match campaigns.get(campaign_id).await {
                    Err(missing) => Err(missing),
                    Ok(c) if !CampaignAction::Edit.is_allowed(c.state) => Err(campaigns
                        .explain_miss(campaign_id, CampaignAction::Edit)
                        .await),
                    Ok(_) => Err(e.into()),
                }
            }
        }
    }

    /// The next recipient to attempt, by position.
    pub async fn next_pending(&self, campaign_id: CampaignId) -> Result<Option<Recipient>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM recipient
                WHERE campaign_id = $campaign_id AND state = 'pending'
                ORDER BY position ASC
                LIMIT 1
                "#,
            )
            .bind(("campaign_id", campaign_id.to_string()))
            .await?;

        let records: Vec<RecipientRecord> = result.take(0)?;
        Ok(into_recipients(records)?.into_iter().next())
    }

    /// Recipients of a campaign by position.
    pub async fn list(
        &self,
        campaign_id: CampaignId,
        page: RecipientPage,
    ) -> Result<Vec<Recipient>, DbError> {
        let state_clause = if page.state.is_some() {
            "AND state = $state"
        } else {
            ""
        };

        let limit_clause = page
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let offset_clause = page
            .offset
            .map(|o| format!("START {}", o))
            .unwrap_or_default();

        let query = format!(
            "SELECT * FROM recipient WHERE campaign_id = $campaign_id {} ORDER BY position ASC {} {}",
            state_clause, limit_clause, offset_clause
        );

        let mut result = self
            .db
            .query(&query)
            .bind(("campaign_id", campaign_id.to_string()));
        if let Some(state) = page.state {
            result = result.bind(("state", state.as_str()));
        }

        let mut response = result.await?;
        let records: Vec<RecipientRecord> = response.take(0)?;
        into_recipients(records)
    }

    /// Count a campaign's recipients by state.
    pub async fn count_by_state(
        &self,
        campaign_id: CampaignId,
    ) -> Result<HashMap<RecipientState, u64>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT state, count() AS count
                FROM recipient
                WHERE campaign_id = $campaign_id
                GROUP BY state
                "#,
            )
            .bind(("campaign_id", campaign_id.to_string()))
            .await?;

        let counts: Vec<StateCount> = result.take(0)?;

        let mut map = HashMap::new();
        for row in counts {
            if let Some(state) = row.state
                && let Ok(state) = serde_json::from_value::<RecipientState>(serde_json::json!(state))
            {
                map.insert(state, row.count as u64);
            }
        }

        Ok(map)
    }

    /// Total recipients of a campaign.
    pub async fn count(&self, campaign_id: CampaignId) -> Result<u64, DbError> {
        Ok(self.count_by_state(campaign_id).await?.values().sum())
    }

    /// Record a successful send and bump the campaign's `sent` counter.
    pub async fn mark_sent(
        &self,
        recipient: &Recipient,
        at: DateTime<Utc>,
    ) -> Result<Recipient, DbError> {
        self.finish_attempt(recipient, RecipientState::Sent, None, at)
            .await
    }

    /// Record a failed attempt and bump the campaign's `failed` counter.
    pub async fn mark_failed(
        &self,
        recipient: &Recipient,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<Recipient, DbError> {
        let error = dispatch_core::template::truncate(error, dispatch_core::template::MAX_ERROR_LEN);
        self.finish_attempt(recipient, RecipientState::Failed, Some(error), at)
            .await
    }

    async fn finish_attempt(
        &self,
        recipient: &Recipient,
        to: RecipientState,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Recipient, DbError> {
        let (recipient_set, counter) = match to {
            RecipientState::Sent => ("sent_at = $at", "sent"),
            _ => ("error = $error", "failed"),
        };

        let query = format!(
            r#"
            BEGIN TRANSACTION;
            LET $updated = (
                UPDATE type::thing('recipient', $recipient_id)
                SET state = $to, {recipient_set}
                WHERE state = 'pending'
                RETURN AFTER
            );
            IF array::len($updated) = 0 {{ THROW "recipient is not pending"; }};
            UPDATE type::thing('campaign', $campaign_id)
            SET {counter} += 1, last_send_at = $at, updated_at = $at;
            COMMIT TRANSACTION;
            "#
        );

        let outcome = self
            .db
            .query(&query)
            .bind(("recipient_id", recipient.id.to_string()))
            .bind(("campaign_id", recipient.campaign_id.to_string()))
            .bind(("to", to.as_str()))
            .bind(("error", error.unwrap_or_default()))
            .bind(("at", timestamp::format(&at)))
            .await
            .and_then(|response| response.check());

        let current = self.get(recipient.id).await?;
        match outcome {
            Ok(_) => Ok(current),
            Err(_) if current.state != RecipientState::Pending => Err(DbError::Conflict(format!(
                "Recipient {} is {}",
                recipient.id, current.state
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Mark every `sent` recipient of `contact_id` as replied and bump the
    /// owning campaigns' `replied` counters. Returns the campaigns touched.
    pub async fn mark_replied_for_contact(
        &self,
        contact_id: ContactId,
        at: DateTime<Utc>,
    ) -> Result<Vec<CampaignId>, DbError> {
        let at = at.trunc_subsecs(6);
        let mut result = self
            .db
            .query("SELECT * FROM recipient WHERE contact_id = $contact_id AND state = 'sent'")
            .bind(("contact_id", contact_id.to_string()))
            .await?;
        let records: Vec<RecipientRecord> = result.take(0)?;

        let mut touched = Vec::new();
        for recipient in into_recipients(records)? {
            self.db
                .query(
                    r#"
                    BEGIN TRANSACTION;
                    LET $updated = (
                        UPDATE type::thing('recipient', $recipient_id)
                        SET state = 'replied', replied_at = $at
                        WHERE state = 'sent'
                        RETURN AFTER
                    );
                    IF array::len($updated) > 0 {
                        UPDATE type::thing('campaign', $campaign_id) SET replied += 1;
                    };
                    COMMIT TRANSACTION;
                    "#,
                )
                .bind(("recipient_id", recipient.id.to_string()))
                .bind(("campaign_id", recipient.campaign_id.to_string()))
                .bind(("at", timestamp::format(&at)))
                .await?
                .check()?;

            let current = self.get(recipient.id).await?;
            if current.state == RecipientState::Replied && current.replied_at == Some(at) {
                touched.push(recipient.campaign_id);
            }
        }

        Ok(touched)
    }
}
