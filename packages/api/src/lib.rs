//! In-process API for the job engine.
//!
//! [`Engine`] bundles the store, queue and supervisor and exposes:
//! - Job management (submit, get, list, cancel)
//! - Campaign management (CRUD, start, pause, resume, cancel, recipients)
//! - Inbound message side effects
//! - Real-time events

mod campaigns;
mod init;
mod jobs;
mod realtime;

pub use campaigns::{
    CampaignDetail, CreateCampaignRequest, ListCampaignsRequest, ListRecipientsRequest,
    TestSendResult,
};
pub use init::{Engine, EngineBuilder};
pub use jobs::{JobView, ListJobsRequest, SubmitJobRequest};
pub use realtime::format_sse_event;

// Re-export core types for convenience
pub use actors::{EngineConfig, EngineError, EngineResult, EngineStatus, MessageTransport};
pub use db::DbConfig;
pub use db::repositories::CampaignUpdate;
pub use dispatch_core::{
    Campaign, CampaignId, CampaignState, EngineEvent, Job, JobId, JobState, Recipient,
    RecipientFilter, RecipientState, job_types,
};
