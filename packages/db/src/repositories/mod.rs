//! Repository implementations for database operations.

mod campaign_repo;
mod contact_repo;
mod job_repo;
mod recipient_repo;

pub use campaign_repo::{CampaignFilter, CampaignRepository, CampaignUpdate};
pub use contact_repo::{ContactRepository, SYNC_ORIGIN, UpsertOutcome};
pub use job_repo::{JobChange, JobFilter, JobRepository, ORPHAN_MESSAGE};
pub use recipient_repo::{RecipientPage, RecipientRepository};

use std::str::FromStr;

use surrealdb::sql::Thing;

use crate::DbError;

/// Parse the key part of a record id back into a domain id.
fn parse_key<T>(table: &str, id: Option<&Thing>) -> Result<T, DbError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = id
        .map(|t| t.id.to_raw())
        .ok_or_else(|| DbError::Serialization(format!("{} record without id", table)))?;
    T::from_str(&raw)
        .map_err(|e| DbError::Serialization(format!("Invalid {} id {}: {}", table, raw, e)))
}

/// `GROUP BY state` row shape shared by the count queries.
#[derive(Debug, serde::Deserialize)]
struct StateCount {
    state: Option<String>,
    count: i64,
}
