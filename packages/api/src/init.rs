//! Engine initialization.

use std::sync::Arc;
use std::time::Duration;

use actors::{
    ActorRef, CampaignController, CancellationToken, Dispatcher, EngineConfig, EngineError,
    EngineResult, EngineStatus, InMemoryQueue, JobHandlerRegistry, JobQueue, MessageTransport,
    SupervisorArgs, SupervisorMessage, start_supervisor,
};
use db::{DbConfig, Store};
use dispatch_core::EngineEvent;
use ractor::rpc::CallResult;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

/// How long status and shutdown calls wait for the supervisor.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A running engine: store, queue, supervisor and workers.
///
/// Cheap to clone; every clone drives the same engine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) campaigns: CampaignController,
    supervisor: ActorRef<SupervisorMessage>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    transport: Arc<dyn MessageTransport>,
    queue: Arc<dyn JobQueue>,
    handlers: Option<JobHandlerRegistry>,
}

impl EngineBuilder {
    pub fn new(transport: Arc<dyn MessageTransport>) -> Self {
        Self {
            config: EngineConfig::default(),
            transport,
            queue: Arc::new(InMemoryQueue::new()),
            handlers: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the in-process queue, e.g. with a networked one shared by
    /// several worker processes.
    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = queue;
        self
    }

    /// Handlers registered in addition to the built-in ones. A handler for
    /// a built-in type replaces it.
    pub fn with_handlers(mut self, handlers: JobHandlerRegistry) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Connect to the database and start the engine.
    pub async fn connect(self, db_config: &DbConfig) -> EngineResult<Engine> {
        let db = db::init(db_config).await?;
        self.start(Store::new(db)).await
    }

    /// Start the engine over an existing store.
    pub async fn start(self, store: Store) -> EngineResult<Engine> {
        tracing::info!("Initializing job engine...");

        let (events, _) = broadcast::channel::<EngineEvent>(self.config.event_capacity);
        let dispatcher = Dispatcher::new(store.clone(), self.queue, events.clone());
        let campaigns = CampaignController::new(dispatcher.clone(), self.transport.clone());

        let mut handlers =
            actors::handlers::builtin_registry(&store, self.transport, events, &self.config);
        if let Some(extra) = self.handlers {
            handlers.extend(extra);
        }

        let (supervisor, handle) = start_supervisor(SupervisorArgs {
            dispatcher: dispatcher.clone(),
            campaigns: campaigns.clone(),
            handlers,
            config: self.config,
            cancel: CancellationToken::new(),
        })
        .await
        .map_err(|e| EngineError::Actor(format!("Failed to start supervisor: {}", e)))?;

        tracing::info!("Job engine initialized");
        Ok(Engine {
            dispatcher,
            campaigns,
            supervisor,
            handle: Arc::new(Mutex::new(Some(handle))),
        })
    }
}

impl Engine {
    pub fn builder(transport: Arc<dyn MessageTransport>) -> EngineBuilder {
        EngineBuilder::new(transport)
    }

    pub fn store(&self) -> &Store {
        self.dispatcher.store()
    }

    pub fn supervisor(&self) -> &ActorRef<SupervisorMessage> {
        &self.supervisor
    }

    /// Worker, queue and job counts.
    pub async fn status(&self) -> EngineResult<EngineStatus> {
        let result = ractor::rpc::call(
            &self.supervisor,
            |reply| SupervisorMessage::GetStatus { reply },
            Some(CALL_TIMEOUT),
        )
        .await
        .map_err(|e| EngineError::Actor(format!("Failed to send message: {}", e)))?;

        match result {
            CallResult::Success(status) => Ok(status),
            CallResult::Timeout => Err(EngineError::Actor("Status request timed out".into())),
            CallResult::SenderError => Err(EngineError::Actor("Supervisor not available".into())),
        }
    }

    /// Interrupt running handlers, stop the workers and wait for the
    /// supervisor to exit. Interrupted jobs are recovered on next start.
    pub async fn shutdown(&self) -> EngineResult<()> {
        let Some(handle) = self.handle.lock().await.take() else {
            return Ok(());
        };

        tracing::info!("Shutting down job engine");
        let result = ractor::rpc::call(
            &self.supervisor,
            |reply| SupervisorMessage::Shutdown { reply },
            Some(CALL_TIMEOUT),
        )
        .await
        .map_err(|e| EngineError::Actor(format!("Failed to send message: {}", e)))?;

        if !matches!(result, CallResult::Success(())) {
            tracing::warn!("Supervisor did not acknowledge shutdown");
            self.supervisor.stop(None);
        }

        handle
            .await
            .map_err(|e| EngineError::Actor(format!("Supervisor task failed: {}", e)))?;
        Ok(())
    }
}
