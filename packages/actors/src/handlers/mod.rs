//! Built-in job handlers.

mod campaign_send;
mod sync_contacts;
mod verify_contacts;

use std::sync::Arc;

use db::Store;
use dispatch_core::EngineEvent;
use tokio::sync::broadcast;

use crate::config::EngineConfig;
use crate::handler::JobHandlerRegistry;
use crate::transport::MessageTransport;

pub use campaign_send::{CONTACT_MISSING, CampaignSendHandler, CampaignSender, SendStep};
pub use sync_contacts::SyncContactsHandler;
pub use verify_contacts::VerifyContactsHandler;

/// A registry with the verify, sync and campaign handlers.
pub fn builtin_registry(
    store: &Store,
    transport: Arc<dyn MessageTransport>,
    events: broadcast::Sender<EngineEvent>,
    config: &EngineConfig,
) -> JobHandlerRegistry {
    let mut registry = JobHandlerRegistry::new();
    registry.register(VerifyContactsHandler::new(
        store.clone(),
        transport.clone(),
        config.verify_delay,
    ));
    registry.register(SyncContactsHandler::new(store.clone(), transport.clone()));

    let sender = CampaignSender::new(store.clone(), transport, events);
    registry.register(CampaignSendHandler::new(
        sender,
        store.clone(),
        config.sender_tick,
    ));
    registry
}
