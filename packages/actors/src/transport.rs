//! Outbound messaging transport.

use dispatch_core::RemoteContact;
use futures_util::future::BoxFuture;

/// Transport failures. Never fatal to the engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

/// The messaging network as seen by handlers.
pub trait MessageTransport: Send + Sync + 'static {
    /// Deliver `text` to `phone`.
    fn send<'a>(&'a self, phone: &'a str, text: &'a str) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Whether `phone` is registered on the network.
    fn check_exists<'a>(&'a self, phone: &'a str) -> BoxFuture<'a, Result<bool, TransportError>>;

    /// Every contact known to the connected account.
    fn list_contacts(&self) -> BoxFuture<'_, Result<Vec<RemoteContact>, TransportError>>;
}
