//! Core domain types for the dispatch engine.
//!
//! This crate contains shared types used across all packages:
//! - Job and JobState for background work
//! - Campaign, Recipient and RecipientFilter for bulk messaging
//! - Contact records read by handlers and the campaign controller
//! - Events for real-time updates

mod campaign;
mod contact;
mod events;
mod ids;
mod job;
pub mod template;
pub mod timestamp;

pub use campaign::{
    Campaign, CampaignAction, CampaignKind, CampaignState, DEFAULT_INACTIVE_DAYS,
    DEFAULT_PACING_SECS, MAX_PACING_SECS, Recipient, RecipientFilter, RecipientState,
};
pub use contact::{Contact, ContactStatus, RemoteContact};
pub use events::EngineEvent;
pub use ids::{CampaignId, ContactId, JobId, RecipientId};
pub use job::{Job, JobState, QueueItem, job_types};
