//! Checks that contacts are still registered on the network.

use std::sync::Arc;
use std::time::Duration;

use db::Store;
use db::repositories::JobChange;
use dispatch_core::{ContactStatus, job_types};

use crate::handler::{HandlerError, HandlerFuture, HandlerResult, JobContext, JobHandler};
use crate::transport::MessageTransport;

/// Handler for `verify_contacts` jobs.
///
/// Payload: `{"status": "active"}` selects which contacts to check
/// (default `active`). Contacts that no longer exist are marked inactive.
#[derive(Clone)]
pub struct VerifyContactsHandler {
    store: Store,
    transport: Arc<dyn MessageTransport>,
    delay: Duration,
}

impl VerifyContactsHandler {
    pub fn new(store: Store, transport: Arc<dyn MessageTransport>, delay: Duration) -> Self {
        Self {
            store,
            transport,
            delay,
        }
    }

    async fn run(self, ctx: JobContext) -> HandlerResult {
        let status = match ctx.job.payload.get("status") {
            Some(value) => serde_json::from_value::<ContactStatus>(value.clone())
                .map_err(|e| HandlerError::Failed(format!("Invalid status filter: {}", e)))?,
            None => ContactStatus::Active,
        };

        let contacts = self.store.contacts.list_by_status(status).await?;
        ctx.progress
            .report(JobChange::default().with_total(contacts.len() as u64))
            .await?;

        let (mut active, mut inactive) = (0u64, 0u64);
        for (index, contact) in contacts.iter().enumerate() {
            ctx.check_cancelled()?;
            if index > 0 && !self.delay.is_zero() && !ctx.cancel.sleep(self.delay).await {
                return Err(HandlerError::Interrupted);
            }

            let exists = match self.transport.check_exists(&contact.phone).await {
                Ok(exists) => exists,
                Err(e) => {
                    tracing::warn!(
                        contact_id = %contact.id,
                        error = %e,
                        "Existence check failed"
                    );
                    ctx.progress.report(JobChange::step(false)).await?;
                    continue;
                }
            };

            if exists {
                active += 1;
            } else {
                inactive += 1;
                if contact.status != ContactStatus::Inactive {
                    self.store
                        .contacts
                        .set_status(contact.id, ContactStatus::Inactive)
                        .await?;
                }
                tracing::debug!(contact_id = %contact.id, "Contact no longer exists");
            }
            ctx.progress.report(JobChange::step(exists)).await?;
        }

        Ok(format!("Completed: {} active, {} inactive", active, inactive))
    }
}

impl JobHandler for VerifyContactsHandler {
    fn job_type(&self) -> &str {
        job_types::VERIFY_CONTACTS
    }

    fn handle(&self, ctx: JobContext) -> HandlerFuture {
        Box::pin(self.clone().run(ctx))
    }
}
