//! SurrealDB integration for the dispatch engine.
//!
//! This crate provides database connectivity and repositories for
//! persisting jobs, campaigns, recipients and contacts. Every state change
//! is a single conditional statement or one transaction, so several worker
//! processes may share one database.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage
//! - `remote`: Connect to a SurrealDB server over websockets

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use schema::init_schema;

use repositories::{CampaignRepository, ContactRepository, JobRepository, RecipientRepository};

/// Connect and apply the schema.
///
/// This should be called once at application startup.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}

/// All repositories over one connection.
#[derive(Clone)]
pub struct Store {
    pub jobs: JobRepository,
    pub campaigns: CampaignRepository,
    pub recipients: RecipientRepository,
    pub contacts: ContactRepository,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self {
            jobs: JobRepository::new(db.clone()),
            campaigns: CampaignRepository::new(db.clone()),
            recipients: RecipientRepository::new(db.clone()),
            contacts: ContactRepository::new(db),
        }
    }
}
