//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use db::DbError;
use db::repositories::{JobChange, JobRepository};
use dispatch_core::{EngineEvent, Job, timestamp};
use tokio::sync::broadcast;

use crate::cancel::CancellationToken;
use crate::error::EngineError;
use crate::transport::TransportError;

/// Why a handler stopped without producing a summary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The job failed; the message becomes the job's status line.
    #[error("{0}")]
    Failed(String),

    /// Shutdown was observed at a suspension point. The job is left
    /// running with its lease released so recovery picks it up.
    #[error("interrupted by shutdown")]
    Interrupted,
}

impl From<DbError> for HandlerError {
    fn from(err: DbError) -> Self {
        HandlerError::Failed(err.to_string())
    }
}

impl From<TransportError> for HandlerError {
    fn from(err: TransportError) -> Self {
        HandlerError::Failed(err.to_string())
    }
}

impl From<EngineError> for HandlerError {
    fn from(err: EngineError) -> Self {
        HandlerError::Failed(err.to_string())
    }
}

/// Result type for job handlers: the final status line on success.
pub type HandlerResult = Result<String, HandlerError>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Writes progress for the job being handled.
#[derive(Clone)]
pub struct ProgressReporter {
    job: Job,
    jobs: JobRepository,
    events: broadcast::Sender<EngineEvent>,
}

impl ProgressReporter {
    pub fn new(job: Job, jobs: JobRepository, events: broadcast::Sender<EngineEvent>) -> Self {
        Self { job, jobs, events }
    }

    /// Apply counter deltas atomically and broadcast the new position.
    pub async fn report(&self, change: JobChange) -> Result<Job, HandlerError> {
        let job = self.jobs.record_progress(self.job.id, change).await?;
        let _ = self.events.send(EngineEvent::JobProgress {
            job_id: job.id,
            processed: job.processed,
            total: job.total,
            timestamp: timestamp::now(),
        });
        Ok(job)
    }
}

/// Everything a handler gets for one run.
#[derive(Clone)]
pub struct JobContext {
    /// The job as claimed.
    pub job: Job,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
}

impl JobContext {
    /// Short-circuit with [`HandlerError::Interrupted`] once shutdown began.
    pub fn check_cancelled(&self) -> Result<(), HandlerError> {
        if self.cancel.is_cancelled() {
            Err(HandlerError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a specific type are processed.
pub trait JobHandler: Send + Sync + 'static {
    /// The job type this handler processes.
    fn job_type(&self) -> &str;

    /// Process a job and return its summary.
    fn handle(&self, ctx: JobContext) -> HandlerFuture;
}

/// Registry for job handlers.
///
/// Maps job types to their handlers for dynamic dispatch.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job type, replacing any previous one.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        let job_type = handler.job_type().to_string();
        self.handlers.insert(job_type, Arc::new(handler));
    }

    /// Move every handler of `other` into this registry, replacing
    /// handlers for the same type.
    pub fn extend(&mut self, other: JobHandlerRegistry) {
        self.handlers.extend(other.handlers);
    }

    /// Get a handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Check if a handler exists for a job type.
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// List all registered job types.
    pub fn job_types(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    job_type: String,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(job_type: impl Into<String>, handler: F) -> Self {
        Self {
            job_type: job_type.into(),
            handler,
        }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn handle(&self, ctx: JobContext) -> HandlerFuture {
        (self.handler)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_routes_by_type() {
        let mut registry = JobHandlerRegistry::new();
        registry.register(FnHandler::new("echo", |ctx: JobContext| {
            Box::pin(async move { Ok(ctx.job.message) }) as HandlerFuture
        }));

        assert!(registry.has_handler("echo"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.job_types(), vec!["echo"]);
    }
}
