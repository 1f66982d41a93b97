//! Worker actor for executing jobs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use db::DbError;
use db::repositories::JobRepository;
use dispatch_core::{EngineEvent, JobId, JobState, QueueItem, timestamp};
use futures_util::FutureExt;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::task::JoinHandle;

use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::handler::{HandlerError, JobContext, JobHandlerRegistry, ProgressReporter};
use crate::messages::WorkerMessage;
use crate::queue::QueueError;

/// Worker actor arguments.
#[derive(Clone)]
pub struct WorkerArgs {
    pub worker_id: String,
    pub dispatcher: Dispatcher,
    pub handlers: Arc<JobHandlerRegistry>,
    pub config: EngineConfig,
    pub cancel: CancellationToken,
}

/// State for the worker actor.
pub struct WorkerActorState {
    args: WorkerArgs,
}

impl WorkerActorState {
    pub fn worker_id(&self) -> &str {
        &self.args.worker_id
    }

    fn jobs(&self) -> &JobRepository {
        &self.args.dispatcher.store().jobs
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.args.dispatcher.events().send(event);
    }

    /// Run one dequeued item to a final state.
    ///
    /// Stale or duplicate items (job gone, no longer pending, claim lost)
    /// are skipped. Only store failures are returned.
    async fn process(&self, item: QueueItem) -> EngineResult<()> {
        let job = match self.jobs().get(item.job_id).await {
            Ok(job) => job,
            Err(DbError::NotFound(_)) => {
                tracing::debug!(job_id = %item.job_id, "Skipping vanished job");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if job.state != JobState::Pending {
            tracing::debug!(job_id = %job.id, state = %job.state, "Skipping job that is not pending");
            return Ok(());
        }

        let Some(handler) = self.args.handlers.get(&job.job_type) else {
            let error = EngineError::UnknownJobType(job.job_type.clone()).to_string();
            tracing::warn!(job_id = %job.id, job_type = %job.job_type, "No handler for job type");
            let failed = self.jobs().fail(job.id, &error).await?;
            self.emit(EngineEvent::JobFailed {
                job_id: failed.id,
                error: failed.message,
                timestamp: timestamp::now(),
            });
            return Ok(());
        };

        let job = match self
            .jobs()
            .claim(job.id, self.worker_id(), self.args.config.lease_until())
            .await
        {
            Ok(job) => job,
            Err(DbError::Conflict(_)) => {
                tracing::debug!(job_id = %item.job_id, "Claim lost to another worker");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            worker_id = %self.worker_id(),
            "Job started"
        );
        self.emit(EngineEvent::JobStarted {
            job_id: job.id,
            worker_id: self.worker_id().to_string(),
            timestamp: timestamp::now(),
        });

        let started = Instant::now();
        let renewal = self.spawn_lease_renewal(job.id);

        let ctx = JobContext {
            job: job.clone(),
            progress: ProgressReporter::new(
                job.clone(),
                self.jobs().clone(),
                self.args.dispatcher.events().clone(),
            ),
            cancel: self.args.cancel.clone(),
        };
        let outcome = AssertUnwindSafe(handler.handle(ctx)).catch_unwind().await;

        renewal.abort();

        let result = match outcome {
            Ok(Ok(summary)) => {
                let done = self.jobs().complete(job.id, summary).await?;
                tracing::info!(
                    job_id = %done.id,
                    processed = done.processed,
                    "Job completed: {}",
                    done.message
                );
                self.emit(EngineEvent::JobCompleted {
                    job_id: done.id,
                    message: done.message,
                    duration_ms: started.elapsed().as_millis() as u64,
                    timestamp: timestamp::now(),
                });
                return Ok(());
            }
            Ok(Err(HandlerError::Interrupted)) => {
                self.jobs().release_lease(job.id, self.worker_id()).await?;
                tracing::info!(job_id = %job.id, "Job interrupted by shutdown");
                self.emit(EngineEvent::JobInterrupted {
                    job_id: job.id,
                    state: JobState::Running,
                    timestamp: timestamp::now(),
                });
                return Ok(());
            }
            Ok(Err(HandlerError::Failed(error))) => error,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                format!("Handler panicked: {}", reason)
            }
        };

        let failed = self.jobs().fail(job.id, result).await?;
        tracing::warn!(job_id = %failed.id, error = %failed.message, "Job failed");
        self.emit(EngineEvent::JobFailed {
            job_id: failed.id,
            error: failed.message,
            timestamp: timestamp::now(),
        });
        Ok(())
    }

    /// Keep the claim alive while the handler runs. Stops by itself once
    /// the job is no longer running under this worker.
    fn spawn_lease_renewal(&self, job_id: JobId) -> JoinHandle<()> {
        let jobs = self.jobs().clone();
        let worker_id = self.worker_id().to_string();
        let config = self.args.config.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.renew_interval());
            interval.tick().await;
            loop {
                interval.tick().await;
                match jobs.renew_lease(job_id, &worker_id, config.lease_until()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Lease renewal failed");
                    }
                }
            }
        })
    }
}

/// Worker actor that pulls jobs from the queue and runs them one at a time.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(worker_id = %args.worker_id, "Starting worker");

        let state = WorkerActorState { args };
        state.emit(EngineEvent::WorkerConnected {
            worker_id: state.worker_id().to_string(),
            timestamp: timestamp::now(),
        });

        myself.send_message(WorkerMessage::Poll)?;
        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(worker_id = %state.worker_id(), "Worker stopped");
        state.emit(EngineEvent::WorkerDisconnected {
            worker_id: state.worker_id().to_string(),
            timestamp: timestamp::now(),
        });
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if state.args.cancel.is_cancelled() {
                    return Ok(());
                }

                let queue = state.args.dispatcher.queue().clone();
                let cancel = state.args.cancel.clone();
                let polled = tokio::select! {
                    _ = cancel.cancelled() => Ok(None),
                    polled = queue.dequeue(state.args.config.poll_timeout) => polled,
                };

                match polled {
                    Ok(Some(item)) => {
                        if let Err(e) = state.process(item).await {
                            tracing::error!(
                                worker_id = %state.worker_id(),
                                error = %e,
                                "Store failure while processing job"
                            );
                        }
                    }
                    Ok(None) => {}
                    // already dropped from the queue, move on
                    Err(QueueError::Malformed(_)) => {}
                    Err(e) => {
                        tracing::error!(worker_id = %state.worker_id(), error = %e, "Dequeue failed");
                        cancel.sleep(state.args.config.poll_timeout).await;
                    }
                }

                if !cancel.is_cancelled() {
                    myself.send_message(WorkerMessage::Poll)?;
                }
            }

            WorkerMessage::Shutdown => {
                tracing::info!(worker_id = %state.worker_id(), "Shutting down worker");
                myself.stop(None);
            }
        }

        Ok(())
    }
}
