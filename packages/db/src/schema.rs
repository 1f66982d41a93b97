//! Database schema definitions using SurrealQL.
//!
//! Tables are schemaless so that payloads and filters keep their shape;
//! the scalar columns the engine filters on are typed and indexed.
//! Timestamps are fixed-width RFC 3339 strings.

use crate::{Database, DbError};

/// Initialize the database schema. Safe to run on every start.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(CONTACT_SCHEMA).await?.check()?;
    db.query(CAMPAIGN_SCHEMA).await?.check()?;
    db.query(RECIPIENT_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS job_type ON job TYPE string;
DEFINE FIELD IF NOT EXISTS state ON job TYPE string DEFAULT "pending";
DEFINE FIELD IF NOT EXISTS total ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS processed ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS succeeded ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS failed ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS message ON job TYPE string DEFAULT "";
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE string;

DEFINE INDEX IF NOT EXISTS job_type_state ON job FIELDS job_type, state;
DEFINE INDEX IF NOT EXISTS job_state_lease ON job FIELDS state, lease_expires_at;
DEFINE INDEX IF NOT EXISTS job_created ON job FIELDS created_at;
"#;

/// Contact directory schema.
const CONTACT_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS contact SCHEMALESS;

DEFINE FIELD IF NOT EXISTS phone ON contact TYPE string;
DEFINE FIELD IF NOT EXISTS status ON contact TYPE string DEFAULT "active";
DEFINE FIELD IF NOT EXISTS tags ON contact TYPE array<string> DEFAULT [];
DEFINE FIELD IF NOT EXISTS origin ON contact TYPE string DEFAULT "manual";
DEFINE FIELD IF NOT EXISTS created_at ON contact TYPE string;

DEFINE INDEX IF NOT EXISTS contact_phone ON contact FIELDS phone UNIQUE;
DEFINE INDEX IF NOT EXISTS contact_status ON contact FIELDS status;
"#;

/// Campaign table schema.
const CAMPAIGN_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS campaign SCHEMALESS;

DEFINE FIELD IF NOT EXISTS name ON campaign TYPE string;
DEFINE FIELD IF NOT EXISTS message ON campaign TYPE string;
DEFINE FIELD IF NOT EXISTS kind ON campaign TYPE string DEFAULT "one_shot";
DEFINE FIELD IF NOT EXISTS state ON campaign TYPE string DEFAULT "draft";
DEFINE FIELD IF NOT EXISTS pacing_secs ON campaign TYPE int DEFAULT 30;
DEFINE FIELD IF NOT EXISTS total_recipients ON campaign TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS sent ON campaign TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS failed ON campaign TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS replied ON campaign TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS created_at ON campaign TYPE string;
DEFINE FIELD IF NOT EXISTS updated_at ON campaign TYPE string;

DEFINE INDEX IF NOT EXISTS campaign_state ON campaign FIELDS state;
DEFINE INDEX IF NOT EXISTS campaign_schedule ON campaign FIELDS state, scheduled_at;
"#;

/// Campaign recipient schema.
const RECIPIENT_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS recipient SCHEMALESS;

DEFINE FIELD IF NOT EXISTS campaign_id ON recipient TYPE string;
DEFINE FIELD IF NOT EXISTS contact_id ON recipient TYPE string;
DEFINE FIELD IF NOT EXISTS position ON recipient TYPE int;
DEFINE FIELD IF NOT EXISTS state ON recipient TYPE string DEFAULT "pending";

DEFINE INDEX IF NOT EXISTS recipient_campaign_state ON recipient FIELDS campaign_id, state, position;
DEFINE INDEX IF NOT EXISTS recipient_contact_state ON recipient FIELDS contact_id, state;
"#;
