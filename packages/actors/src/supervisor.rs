//! Supervisor actor owning the worker pool and engine housekeeping.

use std::collections::HashMap;
use std::sync::Arc;

use ractor::{Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::task::JoinHandle;

use dispatch_core::timestamp;

use crate::campaign::CampaignController;
use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::handler::JobHandlerRegistry;
use crate::messages::{EngineStatus, SupervisorMessage, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Supervisor arguments.
pub struct SupervisorArgs {
    pub dispatcher: Dispatcher,
    pub campaigns: CampaignController,
    pub handlers: JobHandlerRegistry,
    pub config: EngineConfig,
    /// Shared with every worker and handed to handlers.
    pub cancel: CancellationToken,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    dispatcher: Dispatcher,
    campaigns: CampaignController,
    handlers: Arc<JobHandlerRegistry>,
    config: EngineConfig,
    cancel: CancellationToken,
    /// Live workers by actor id.
    workers: HashMap<ActorId, (String, ActorRef<WorkerMessage>)>,
    ticker: Option<JoinHandle<()>>,
    /// Worker counter for unique IDs.
    worker_counter: u64,
    shutting_down: bool,
}

impl SupervisorState {
    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> String {
        self.worker_counter += 1;
        format!("{}-worker-{}", self.config.instance_id, self.worker_counter)
    }

    async fn spawn_worker(&mut self, supervisor: ActorCell) -> Result<(), ActorProcessingErr> {
        let worker_id = self.next_worker_id();
        let args = WorkerArgs {
            worker_id: worker_id.clone(),
            dispatcher: self.dispatcher.clone(),
            handlers: self.handlers.clone(),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
        };

        let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, supervisor)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;
        self.workers.insert(worker.get_id(), (worker_id, worker));
        Ok(())
    }

    /// Reap expired leases, re-enqueue stranded pending jobs, start due
    /// campaigns and restore missing senders.
    async fn housekeeping(&self) {
        let now = timestamp::now();
        if let Err(e) = self.dispatcher.recover_orphans(now).await {
            tracing::error!(error = %e, "Orphan recovery failed");
        }
        if let Err(e) = self
            .dispatcher
            .rescue_pending(now, self.config.tick_interval)
            .await
        {
            tracing::error!(error = %e, "Pending job rescue failed");
        }
        if let Err(e) = self.campaigns.start_due(now).await {
            tracing::error!(error = %e, "Scheduled campaign check failed");
        }
        if let Err(e) = self.campaigns.reconcile_senders().await {
            tracing::error!(error = %e, "Sender reconciliation failed");
        }
    }
}

/// Supervisor actor that manages the workers.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            instance_id = %args.config.instance_id,
            workers = args.config.worker_count,
            "Starting job supervisor"
        );

        // no worker may accept work before orphans are back on the queue
        args.dispatcher
            .restore(timestamp::now())
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Startup recovery failed: {}", e)))?;

        let mut state = SupervisorState {
            dispatcher: args.dispatcher,
            campaigns: args.campaigns,
            handlers: Arc::new(args.handlers),
            config: args.config,
            cancel: args.cancel,
            workers: HashMap::new(),
            ticker: None,
            worker_counter: 0,
            shutting_down: false,
        };

        for _ in 0..state.config.worker_count {
            state.spawn_worker(myself.get_cell()).await?;
        }

        // Start periodic tick
        let myself_clone = myself.clone();
        let period = state.config.tick_interval;
        state.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if myself_clone.send_message(SupervisorMessage::Tick).is_err() {
                    break;
                }
            }
        }));

        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.cancel.cancel();
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Tick => {
                if !state.shutting_down {
                    state.housekeeping().await;
                }
            }

            SupervisorMessage::GetStatus { reply } => {
                let jobs = match state.dispatcher.store().jobs.count_by_state().await {
                    Ok(jobs) => jobs,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to count jobs");
                        HashMap::new()
                    }
                };
                let queued = match state.dispatcher.queue().len().await {
                    Ok(queued) => queued,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read queue length");
                        0
                    }
                };
                let _ = reply.send(EngineStatus {
                    workers: state.workers.len(),
                    queued,
                    jobs,
                });
            }

            SupervisorMessage::Shutdown { reply } => {
                tracing::info!("Shutting down supervisor");
                state.shutting_down = true;
                state.cancel.cancel();
                if let Some(ticker) = state.ticker.take() {
                    ticker.abort();
                }

                let workers: Vec<_> = state.workers.drain().map(|(_, (_, w))| w).collect();
                for worker in workers {
                    let _ = worker.send_message(WorkerMessage::Shutdown);
                    if let Err(e) = worker.stop_and_wait(None, None).await {
                        tracing::warn!(error = %e, "Worker did not stop cleanly");
                    }
                }

                let _ = reply.send(());
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if let Some((worker_id, _)) = state.workers.remove(&cell.get_id()) {
                    tracing::info!(worker_id = %worker_id, ?reason, "Worker terminated");
                }
            }
            SupervisionEvent::ActorFailed(cell, error) => {
                if let Some((worker_id, _)) = state.workers.remove(&cell.get_id()) {
                    tracing::error!(worker_id = %worker_id, error = %error, "Worker failed");
                    if !state.shutting_down {
                        state.spawn_worker(myself.get_cell()).await?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Start the supervisor, recovering orphaned jobs before any worker runs.
pub async fn start_supervisor(
    args: SupervisorArgs,
) -> Result<(ActorRef<SupervisorMessage>, JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(None, Supervisor, args).await
}
