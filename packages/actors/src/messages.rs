//! Message types for actor communication.

use std::collections::HashMap;

use dispatch_core::JobState;
use ractor::RpcReplyPort;
use serde::{Deserialize, Serialize};

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Pull one item from the queue and run it, then poll again.
    Poll,

    /// Stop after the current item.
    Shutdown,
}

/// Snapshot of the engine returned by [`SupervisorMessage::GetStatus`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Live worker actors.
    pub workers: usize,
    /// Items waiting in the queue.
    pub queued: usize,
    /// Jobs by state in the store.
    pub jobs: HashMap<JobState, u64>,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Periodic housekeeping: orphan recovery, scheduled campaign starts and
    /// sender reconciliation.
    Tick,

    GetStatus { reply: RpcReplyPort<EngineStatus> },

    /// Cancel running handlers, stop every worker, then reply.
    Shutdown { reply: RpcReplyPort<()> },
}
