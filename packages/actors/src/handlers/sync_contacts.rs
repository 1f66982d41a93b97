//! Imports the connected account's contact list.

use std::sync::Arc;

use db::Store;
use db::repositories::{JobChange, UpsertOutcome};
use dispatch_core::job_types;

use crate::handler::{HandlerFuture, HandlerResult, JobContext, JobHandler};
use crate::transport::MessageTransport;

/// Handler for `sync_contacts` jobs.
#[derive(Clone)]
pub struct SyncContactsHandler {
    store: Store,
    transport: Arc<dyn MessageTransport>,
}

impl SyncContactsHandler {
    pub fn new(store: Store, transport: Arc<dyn MessageTransport>) -> Self {
        Self { store, transport }
    }

    async fn run(self, ctx: JobContext) -> HandlerResult {
        let remote = self.transport.list_contacts().await?;
        ctx.progress
            .report(JobChange::default().with_total(remote.len() as u64))
            .await?;

        let (mut created, mut updated) = (0u64, 0u64);
        for contact in &remote {
            ctx.check_cancelled()?;

            let outcome = self.store.contacts.upsert_remote(contact).await?;
            match outcome {
                UpsertOutcome::Created => created += 1,
                UpsertOutcome::Updated => updated += 1,
                UpsertOutcome::Unchanged => {}
            }

            let change = JobChange {
                processed: 1,
                succeeded: u64::from(outcome == UpsertOutcome::Created),
                ..Default::default()
            };
            ctx.progress.report(change).await?;
        }

        Ok(format!("Completed: {} new, {} updated", created, updated))
    }
}

impl JobHandler for SyncContactsHandler {
    fn job_type(&self) -> &str {
        job_types::SYNC_CONTACTS
    }

    fn handle(&self, ctx: JobContext) -> HandlerFuture {
        Box::pin(self.clone().run(ctx))
    }
}
