//! Actor system for the job engine.
//!
//! This crate provides the Ractor-based supervisor and workers, the job
//! handlers, and the campaign controller.
//!
//! # Architecture
//!
//! - `Supervisor` - Recovers orphaned jobs at startup, owns the worker pool
//!   and runs periodic housekeeping
//! - `WorkerActor` - Pulls job hints from the queue, claims the job under a
//!   lease and runs its handler
//! - `CampaignController` - Campaign state machine and recipient computation
//!
//! # Usage
//!
//! ```ignore
//! use actors::{Dispatcher, InMemoryQueue, SupervisorArgs, start_supervisor};
//!
//! let dispatcher = Dispatcher::new(store, Arc::new(InMemoryQueue::new()), events);
//! let (supervisor, handle) = start_supervisor(args).await?;
//! dispatcher.submit("sync_contacts", 0, "Syncing contacts", json!({})).await?;
//! ```

mod campaign;
mod cancel;
mod config;
mod dispatcher;
mod error;
mod handler;
pub mod handlers;
mod messages;
mod queue;
mod redis_queue;
mod supervisor;
mod transport;
mod worker_actor;

pub use campaign::CampaignController;
pub use cancel::CancellationToken;
pub use config::EngineConfig;
pub use dispatcher::Dispatcher;
pub use error::{EngineError, EngineResult};
pub use handler::{
    FnHandler, HandlerError, HandlerFuture, HandlerResult, JobContext, JobHandler,
    JobHandlerRegistry, ProgressReporter,
};
pub use messages::{EngineStatus, SupervisorMessage, WorkerMessage};
pub use queue::{InMemoryQueue, JobQueue, QueueError};
pub use redis_queue::{DEFAULT_QUEUE_KEY, RedisQueue};
pub use supervisor::{Supervisor, SupervisorArgs, start_supervisor};
pub use transport::{MessageTransport, TransportError};
pub use worker_actor::{WorkerActor, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
