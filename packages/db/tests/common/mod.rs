use db::{Database, DbConfig, DbError, Store};

/// Fresh in-memory database with the schema applied.
///
/// Every `mem://` connection opens its own datastore, so tests do not
/// share state.
pub async fn setup_db() -> Result<Database, DbError> {
    db::init(&DbConfig::memory()).await
}

#[allow(dead_code)]
pub async fn setup_store() -> Result<Store, DbError> {
    Ok(Store::new(setup_db().await?))
}
