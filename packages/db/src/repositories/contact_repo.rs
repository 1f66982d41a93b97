//! Contact repository: the contact directory read by handlers and filters.

use chrono::{DateTime, Utc};
use dispatch_core::{Contact, ContactId, ContactStatus, RemoteContact, timestamp};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use super::parse_key;
use crate::{Database, DbError};

/// Origin recorded on contacts imported from the messaging network.
pub const SYNC_ORIGIN: &str = "whatsapp_sync";

/// Repository for contact persistence operations.
#[derive(Clone)]
pub struct ContactRepository {
    db: Database,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContactRecord {
    #[serde(default, skip_serializing)]
    id: Option<Thing>,
    phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    photo_url: Option<String>,
    status: ContactStatus,
    #[serde(default)]
    tags: Vec<String>,
    origin: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option"
    )]
    last_message_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
}

impl From<&Contact> for ContactRecord {
    fn from(contact: &Contact) -> Self {
        Self {
            id: None,
            phone: contact.phone.clone(),
            name: contact.name.clone(),
            photo_url: contact.photo_url.clone(),
            status: contact.status,
            tags: contact.tags.clone(),
            origin: contact.origin.clone(),
            last_message_at: contact.last_message_at,
            created_at: contact.created_at,
        }
    }
}

impl ContactRecord {
    fn into_contact(self) -> Result<Contact, DbError> {
        Ok(Contact {
            id: parse_key("contact", self.id.as_ref())?,
            phone: self.phone,
            name: self.name,
            photo_url: self.photo_url,
            status: self.status,
            tags: self.tags,
            origin: self.origin,
            last_message_at: self.last_message_at,
            created_at: self.created_at,
        })
    }
}

fn into_contacts(records: Vec<ContactRecord>) -> Result<Vec<Contact>, DbError> {
    records.into_iter().map(ContactRecord::into_contact).collect()
}

/// What an upsert of a remote contact did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// Missing name or photo filled from the remote record.
    Updated,
    Unchanged,
}

impl ContactRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a contact. Fails if the phone is already taken.
    pub async fn create(&self, contact: &Contact) -> Result<Contact, DbError> {
        let record: Option<ContactRecord> = self
            .db
            .create(("contact", contact.id.to_string()))
            .content(ContactRecord::from(contact))
            .await?;

        record
            .map(ContactRecord::into_contact)
            .transpose()?
            .ok_or_else(|| DbError::Query("Failed to create contact".into()))
    }

    /// Get a contact by ID.
    pub async fn get(&self, id: ContactId) -> Result<Contact, DbError> {
        let record: Option<ContactRecord> = self.db.select(("contact", id.to_string())).await?;

        record
            .map(ContactRecord::into_contact)
            .transpose()?
            .ok_or_else(|| DbError::NotFound(format!("Contact not found: {}", id)))
    }

    /// Look a contact up by phone number.
    pub async fn find_by_phone(&self, phone: &str) -> Result<Option<Contact>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM contact WHERE phone = $phone LIMIT 1")
            .bind(("phone", phone.to_string()))
            .await?;

        let records: Vec<ContactRecord> = result.take(0)?;
        Ok(into_contacts(records)?.into_iter().next())
    }

    /// Contacts with the given status, oldest first.
    pub async fn list_by_status(&self, status: ContactStatus) -> Result<Vec<Contact>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM contact WHERE status = $status ORDER BY created_at ASC")
            .bind(("status", status.as_str()))
            .await?;

        let records: Vec<ContactRecord> = result.take(0)?;
        into_contacts(records)
    }

    /// Every contact a campaign may target, oldest first.
    pub async fn list_candidates(&self) -> Result<Vec<Contact>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM contact WHERE status != 'blocked' ORDER BY created_at ASC")
            .await?;

        let records: Vec<ContactRecord> = result.take(0)?;
        into_contacts(records)
    }

    /// Set a contact's status.
    pub async fn set_status(&self, id: ContactId, status: ContactStatus) -> Result<Contact, DbError> {
        let mut result = self
            .db
            .query("UPDATE type::thing('contact', $id) SET status = $status RETURN AFTER")
            .bind(("id", id.to_string()))
            .bind(("status", status.as_str()))
            .await?;

        let records: Vec<ContactRecord> = result.take(0)?;
        into_contacts(records)?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Contact not found: {}", id)))
    }

    /// Delete a contact. Recipients pointing at it stay and fail on send.
    pub async fn delete(&self, id: ContactId) -> Result<(), DbError> {
        let _: Option<ContactRecord> = self.db.delete(("contact", id.to_string())).await?;
        Ok(())
    }

    /// Merge a contact reported by the messaging network.
    ///
    /// New phones become active contacts. Existing contacts only gain a
    /// name or photo they were missing.
    pub async fn upsert_remote(&self, remote: &RemoteContact) -> Result<UpsertOutcome, DbError> {
        let Some(existing) = self.find_by_phone(&remote.phone).await? else {
            let mut contact = Contact::new(&remote.phone).with_origin(SYNC_ORIGIN);
            contact.name = remote.name.clone().filter(|n| !n.trim().is_empty());
            contact.photo_url = remote.photo_url.clone();
            self.create(&contact).await?;
            return Ok(UpsertOutcome::Created);
        };

        let mut sets = Vec::new();
        let mut bindings: Vec<(&str, String)> = Vec::new();

        if existing.display_name().is_none()
            && let Some(name) = remote.name.as_ref().filter(|n| !n.trim().is_empty())
        {
            sets.push("name = $name");
            bindings.push(("name", name.clone()));
        }
        if existing.photo_url.is_none()
            && let Some(photo) = &remote.photo_url
        {
            sets.push("photo_url = $photo_url");
            bindings.push(("photo_url", photo.clone()));
        }

        if sets.is_empty() {
            return Ok(UpsertOutcome::Unchanged);
        }

        let query = format!(
            "UPDATE type::thing('contact', $id) SET {}",
            sets.join(", ")
        );
        let mut result = self
            .db
            .query(&query)
            .bind(("id", existing.id.to_string()));
        for (name, value) in bindings {
            result = result.bind((name, value));
        }
        result.await?.check()?;

        Ok(UpsertOutcome::Updated)
    }

    /// Stamp an inbound message from `phone`.
    pub async fn touch_inbound(
        &self,
        phone: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Contact>, DbError> {
        let mut result = self
            .db
            .query("UPDATE contact SET last_message_at = $at WHERE phone = $phone RETURN AFTER")
            .bind(("phone", phone.to_string()))
            .bind(("at", timestamp::format(&at)))
            .await?;

        let records: Vec<ContactRecord> = result.take(0)?;
        Ok(into_contacts(records)?.into_iter().next())
    }
}
