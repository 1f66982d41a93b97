#![allow(dead_code)]

use std::collections::HashSet;
use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use actors::{
    ActorRef, CampaignController, CancellationToken, Dispatcher, EngineConfig, InMemoryQueue,
    JobHandlerRegistry, MessageTransport, SupervisorArgs, SupervisorMessage, TransportError,
    start_supervisor,
};
use db::{DbConfig, Store};
use dispatch_core::{Contact, EngineEvent, Job, JobId, RemoteContact};
use futures_util::future::BoxFuture;
use tokio::sync::broadcast;

/// One delivered message as seen by [`FakeTransport`].
#[derive(Debug, Clone)]
pub struct Delivery {
    pub phone: String,
    pub text: String,
    pub at: Instant,
}

/// Scriptable transport recording every send.
#[derive(Default)]
pub struct FakeTransport {
    deliveries: Mutex<Vec<Delivery>>,
    failing: HashSet<String>,
    unregistered: HashSet<String>,
    remote: Vec<RemoteContact>,
    list_error: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to `phone` are rejected.
    pub fn failing(mut self, phone: &str) -> Self {
        self.failing.insert(phone.to_string());
        self
    }

    /// `phone` is not on the network.
    pub fn unregistered(mut self, phone: &str) -> Self {
        self.unregistered.insert(phone.to_string());
        self
    }

    pub fn with_remote(mut self, remote: Vec<RemoteContact>) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_list_error(mut self) -> Self {
        self.list_error = true;
        self
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl MessageTransport for FakeTransport {
    fn send<'a>(&'a self, phone: &'a str, text: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if self.failing.contains(phone) {
                return Err(TransportError::Rejected {
                    status: 500,
                    body: format!("cannot deliver to {}", phone),
                });
            }
            self.deliveries.lock().unwrap().push(Delivery {
                phone: phone.to_string(),
                text: text.to_string(),
                at: Instant::now(),
            });
            Ok(())
        })
    }

    fn check_exists<'a>(&'a self, phone: &'a str) -> BoxFuture<'a, Result<bool, TransportError>> {
        Box::pin(async move { Ok(!self.unregistered.contains(phone)) })
    }

    fn list_contacts(&self) -> BoxFuture<'_, Result<Vec<RemoteContact>, TransportError>> {
        Box::pin(async move {
            if self.list_error {
                return Err(TransportError::Request("connection refused".into()));
            }
            Ok(self.remote.clone())
        })
    }
}

/// Configuration with short timers for tests.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_instance_id("test")
        .with_poll_timeout(Duration::from_millis(100))
        .with_tick_interval(Duration::from_millis(200))
        .with_lease_duration(Duration::from_secs(2))
        .with_verify_delay(Duration::ZERO)
        .with_sender_tick(Duration::from_millis(50))
}

/// Engine pieces over a fresh in-memory store.
pub struct Harness {
    pub store: Store,
    pub dispatcher: Dispatcher,
    pub campaigns: CampaignController,
    pub transport: Arc<FakeTransport>,
    pub config: EngineConfig,
}

impl Harness {
    pub async fn new(transport: FakeTransport) -> Result<Self, Box<dyn Error>> {
        let store = Store::new(db::init(&DbConfig::memory()).await?);
        let (events, _) = broadcast::channel::<EngineEvent>(256);
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(InMemoryQueue::new()), events);
        let transport = Arc::new(transport);
        let campaigns = CampaignController::new(dispatcher.clone(), transport.clone());

        Ok(Self {
            store,
            dispatcher,
            campaigns,
            transport,
            config: test_config(),
        })
    }

    /// A dispatcher over the same store with a queue of its own, as a
    /// second process would have.
    pub fn peer_dispatcher(&self) -> Dispatcher {
        let (events, _) = broadcast::channel::<EngineEvent>(16);
        Dispatcher::new(self.store.clone(), Arc::new(InMemoryQueue::new()), events)
    }

    /// Registry with the built-in handlers wired to the fake transport.
    pub fn builtin_handlers(&self) -> JobHandlerRegistry {
        actors::handlers::builtin_registry(
            &self.store,
            self.transport.clone(),
            self.dispatcher.events().clone(),
            &self.config,
        )
    }

    pub async fn start(
        &self,
        handlers: JobHandlerRegistry,
    ) -> Result<ActorRef<SupervisorMessage>, Box<dyn Error>> {
        let (supervisor, _handle) = start_supervisor(SupervisorArgs {
            dispatcher: self.dispatcher.clone(),
            campaigns: self.campaigns.clone(),
            handlers,
            config: self.config.clone(),
            cancel: CancellationToken::new(),
        })
        .await?;
        Ok(supervisor)
    }

    pub async fn add_contacts(&self, phones: &[&str]) -> Result<Vec<Contact>, Box<dyn Error>> {
        let mut created = Vec::new();
        for (i, phone) in phones.iter().enumerate() {
            let contact = Contact::new(*phone).with_name(format!("Contact {}", i + 1));
            created.push(self.store.contacts.create(&contact).await?);
        }
        Ok(created)
    }

    /// Poll until the job reaches a terminal state.
    pub async fn wait_for_job(&self, id: JobId, timeout: Duration) -> Result<Job, Box<dyn Error>> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.store.jobs.get(id).await?;
            if job.state.is_terminal() {
                return Ok(job);
            }
            if Instant::now() > deadline {
                return Err(format!("job {} still {} after {:?}", id, job.state, timeout).into());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub async fn shutdown(supervisor: &ActorRef<SupervisorMessage>) -> Result<(), Box<dyn Error>> {
    let result = ractor::rpc::call(
        supervisor,
        |reply| SupervisorMessage::Shutdown { reply },
        Some(Duration::from_secs(10)),
    )
    .await
    .map_err(|e| e.to_string())?;
    match result {
        ractor::rpc::CallResult::Success(()) => Ok(()),
        _ => Err("supervisor did not acknowledge shutdown".into()),
    }
}
