//! Engine tuning knobs.

use std::time::Duration;

/// Runtime configuration shared by the supervisor, workers and handlers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Prefix for worker ids; distinguishes processes sharing one store.
    pub instance_id: String,
    /// Worker actors pulling from the queue.
    pub worker_count: usize,
    /// Bound on one blocking dequeue.
    pub poll_timeout: Duration,
    /// How long a claim stays valid without renewal.
    pub lease_duration: Duration,
    /// Supervisor housekeeping period (lease reaping, scheduled starts,
    /// sender reconciliation).
    pub tick_interval: Duration,
    /// Pause between two contact checks in `verify_contacts`.
    pub verify_delay: Duration,
    /// Longest single sleep of the campaign sender before it re-reads the
    /// campaign, so pause and cancel are noticed quickly.
    pub sender_tick: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("pid{}", std::process::id()),
            worker_count: 1,
            poll_timeout: Duration::from_secs(5),
            lease_duration: Duration::from_secs(60),
            tick_interval: Duration::from_secs(5),
            verify_delay: Duration::from_millis(500),
            sender_tick: Duration::from_secs(1),
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    pub fn with_workers(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.verify_delay = delay;
        self
    }

    pub fn with_sender_tick(mut self, tick: Duration) -> Self {
        self.sender_tick = tick;
        self
    }

    /// Lease expiry for a claim made now.
    pub fn lease_until(&self) -> chrono::DateTime<chrono::Utc> {
        let lease = chrono::Duration::from_std(self.lease_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        dispatch_core::timestamp::now() + lease
    }

    /// Interval between lease renewals while a handler runs.
    pub fn renew_interval(&self) -> Duration {
        (self.lease_duration / 3).max(Duration::from_millis(100))
    }
}
