//! Real-time event streaming.

use dispatch_core::EngineEvent;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;

use crate::Engine;

impl Engine {
    /// Subscribe to the engine's event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.dispatcher.events().subscribe()
    }

    /// Events as a stream. Lagging consumers skip what they missed; the
    /// stream ends when the engine is dropped.
    pub fn event_stream(&self) -> BoxStream<'static, EngineEvent> {
        let rx = self.subscribe_events();
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

/// Helper to format an event for SSE.
pub fn format_sse_event(event: &EngineEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("event: {}\ndata: {}\n\n", event_name(event), json)
}

fn event_name(event: &EngineEvent) -> &'static str {
    match event {
        EngineEvent::JobEnqueued { .. } => "job_enqueued",
        EngineEvent::JobStarted { .. } => "job_started",
        EngineEvent::JobProgress { .. } => "job_progress",
        EngineEvent::JobCompleted { .. } => "job_completed",
        EngineEvent::JobFailed { .. } => "job_failed",
        EngineEvent::JobInterrupted { .. } => "job_interrupted",
        EngineEvent::JobRecovered { .. } => "job_recovered",
        EngineEvent::CampaignStateChanged { .. } => "campaign_state_changed",
        EngineEvent::RecipientDelivered { .. } => "recipient_delivered",
        EngineEvent::WorkerConnected { .. } => "worker_connected",
        EngineEvent::WorkerDisconnected { .. } => "worker_disconnected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::{JobId, timestamp};

    #[test]
    fn sse_frame_names_the_event() {
        let event = EngineEvent::JobRecovered {
            job_id: JobId::new(),
            timestamp: timestamp::now(),
        };
        let frame = format_sse_event(&event);

        assert!(frame.starts_with("event: job_recovered\ndata: {"));
        assert!(frame.contains(r#""event":"job_recovered""#));
        assert!(frame.ends_with("\n\n"));
    }
}
