#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{FnHandler, HandlerFuture, HandlerResult, JobContext, JobHandlerRegistry};
use chrono::Duration as ChronoDuration;
use common::{FakeTransport, Harness};
use db::repositories::JobChange;
use dispatch_core::{ContactStatus, Job, JobState, RemoteContact, job_types, timestamp};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(10);

fn recording_registry(seen: Arc<Mutex<Vec<String>>>) -> JobHandlerRegistry {
    let mut registry = JobHandlerRegistry::new();
    registry.register(FnHandler::new("record", move |ctx: JobContext| {
        let seen = seen.clone();
        Box::pin(async move {
            let label = ctx.job.payload["label"].as_str().unwrap_or_default().to_string();
            seen.lock().unwrap().push(label.clone());
            ctx.progress.report(JobChange::step(true).with_total(1)).await?;
            Ok(format!("recorded {}", label))
        }) as HandlerFuture
    }));
    registry
}

#[tokio::test]
async fn test_jobs_run_in_submission_order() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(FakeTransport::new()).await?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let supervisor = harness.start(recording_registry(seen.clone())).await?;

    let mut ids = Vec::new();
    for label in ["A", "B", "C"] {
        let job = harness
            .dispatcher
            .submit("record", 0, "Queued", json!({ "label": label }))
            .await?;
        ids.push(job.id);
    }

    for id in &ids {
        let job = harness.wait_for_job(*id, WAIT).await?;
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.processed, job.total);
        assert_eq!(job.progress(), 100.0);
    }
    assert_eq!(*seen.lock().unwrap(), vec!["A", "B", "C"]);

    common::shutdown(&supervisor).await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_job_type_fails_without_retry() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(FakeTransport::new()).await?;
    let supervisor = harness.start(JobHandlerRegistry::new()).await?;

    let job = harness
        .dispatcher
        .submit("reindex_everything", 0, "Queued", json!({}))
        .await?;
    let job = harness.wait_for_job(job.id, WAIT).await?;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.message, "Unknown job type: reindex_everything");
    assert!(job.completed_at.is_some());

    common::shutdown(&supervisor).await?;
    Ok(())
}

#[tokio::test]
async fn test_handler_panic_fails_job_and_worker_survives() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(FakeTransport::new()).await?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = recording_registry(seen.clone());
    registry.register(FnHandler::new("explode", |_ctx: JobContext| {
        Box::pin(async move {
            #[allow(unreachable_code)]
            let result: HandlerResult = panic!("handler blew up");
            #[allow(unreachable_code)]
            result
        }) as HandlerFuture
    }));
    let supervisor = harness.start(registry).await?;

    let bad = harness
        .dispatcher
        .submit("explode", 0, "Queued", json!({}))
        .await?;
    let good = harness
        .dispatcher
        .submit("record", 0, "Queued", json!({ "label": "after" }))
        .await?;

    let bad = harness.wait_for_job(bad.id, WAIT).await?;
    assert_eq!(bad.state, JobState::Failed);
    assert!(bad.message.contains("handler blew up"));

    // the same worker keeps serving the queue
    let good = harness.wait_for_job(good.id, WAIT).await?;
    assert_eq!(good.state, JobState::Completed);

    common::shutdown(&supervisor).await?;
    Ok(())
}

#[tokio::test]
async fn test_orphaned_job_is_recovered_on_startup() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(FakeTransport::new()).await?;

    // a previous worker claimed the job and died mid-handler
    let job = Job::new("record", json!({ "label": "orphan" })).with_total(1);
    let job = harness.store.jobs.create(&job).await?;
    let expired = timestamp::now() - ChronoDuration::seconds(5);
    harness.store.jobs.claim(job.id, "dead-worker", expired).await?;
    harness
        .store
        .jobs
        .record_progress(job.id, JobChange::step(true))
        .await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let supervisor = harness.start(recording_registry(seen.clone())).await?;

    let job = harness.wait_for_job(job.id, WAIT).await?;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.processed, 1);
    assert_eq!(job.total, 1);
    assert_ne!(job.worker_id.as_deref(), Some("dead-worker"));
    assert_eq!(*seen.lock().unwrap(), vec!["orphan"]);

    common::shutdown(&supervisor).await?;
    Ok(())
}

#[tokio::test]
async fn test_verify_contacts_marks_unregistered_inactive() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(FakeTransport::new().unregistered("+15550000002")).await?;
    harness
        .add_contacts(&["+15550000001", "+15550000002", "+15550000003"])
        .await?;
    let supervisor = harness.start(harness.builtin_handlers()).await?;

    let job = harness
        .dispatcher
        .submit(job_types::VERIFY_CONTACTS, 0, "Verifying contacts", json!({}))
        .await?;
    let job = harness.wait_for_job(job.id, WAIT).await?;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!((job.total, job.processed), (3, 3));
    assert_eq!((job.succeeded, job.failed), (2, 1));
    assert_eq!(job.message, "Completed: 2 active, 1 inactive");

    let gone = harness
        .store
        .contacts
        .find_by_phone("+15550000002")
        .await?
        .ok_or("contact missing")?;
    assert_eq!(gone.status, ContactStatus::Inactive);

    common::shutdown(&supervisor).await?;
    Ok(())
}

#[tokio::test]
async fn test_sync_contacts_imports_remote_list() -> Result<(), Box<dyn Error>> {
    let remote = vec![
        RemoteContact {
            phone: "+15550000001".into(),
            name: Some("Ada".into()),
            photo_url: None,
        },
        RemoteContact {
            phone: "+15550000009".into(),
            name: Some("Grace".into()),
            photo_url: Some("https://example.invalid/g.png".into()),
        },
        RemoteContact {
            phone: "+15550000010".into(),
            name: None,
            photo_url: None,
        },
    ];
    let harness = Harness::new(FakeTransport::new().with_remote(remote)).await?;
    // known locally, but without a name
    harness
        .store
        .contacts
        .create(&dispatch_core::Contact::new("+15550000001"))
        .await?;
    let supervisor = harness.start(harness.builtin_handlers()).await?;

    let job = harness
        .dispatcher
        .submit(job_types::SYNC_CONTACTS, 0, "Syncing contacts", json!({}))
        .await?;
    let job = harness.wait_for_job(job.id, WAIT).await?;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.message, "Completed: 2 new, 1 updated");
    assert_eq!((job.processed, job.succeeded), (3, 2));

    let ada = harness
        .store
        .contacts
        .find_by_phone("+15550000001")
        .await?
        .ok_or("contact missing")?;
    assert_eq!(ada.name.as_deref(), Some("Ada"));
    assert_eq!(ada.origin, "manual");

    let grace = harness
        .store
        .contacts
        .find_by_phone("+15550000009")
        .await?
        .ok_or("contact missing")?;
    assert_eq!(grace.origin, db::repositories::SYNC_ORIGIN);
    assert_eq!(grace.status, ContactStatus::Active);

    common::shutdown(&supervisor).await?;
    Ok(())
}

#[tokio::test]
async fn test_sync_contacts_transport_error_fails_job() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(FakeTransport::new().with_list_error()).await?;
    let supervisor = harness.start(harness.builtin_handlers()).await?;

    let job = harness
        .dispatcher
        .submit(job_types::SYNC_CONTACTS, 0, "Syncing contacts", json!({}))
        .await?;
    let job = harness.wait_for_job(job.id, WAIT).await?;

    assert_eq!(job.state, JobState::Failed);
    assert!(job.message.contains("connection refused"));

    common::shutdown(&supervisor).await?;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_interrupts_long_handler() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(FakeTransport::new()).await?;
    let mut registry = JobHandlerRegistry::new();
    registry.register(FnHandler::new("slow", |ctx: JobContext| {
        Box::pin(async move {
            if !ctx.cancel.sleep(Duration::from_secs(60)).await {
                return Err(actors::HandlerError::Interrupted);
            }
            Ok("finished".to_string())
        }) as HandlerFuture
    }));
    let supervisor = harness.start(registry).await?;

    let job = harness
        .dispatcher
        .submit("slow", 0, "Queued", json!({}))
        .await?;

    let deadline = std::time::Instant::now() + WAIT;
    while harness.store.jobs.get(job.id).await?.state != JobState::Running {
        assert!(std::time::Instant::now() < deadline, "job never started");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    common::shutdown(&supervisor).await?;

    // left running without a lease, so the next recovery pass takes it
    let job = harness.store.jobs.get(job.id).await?;
    assert_eq!(job.state, JobState::Running);
    assert!(job.lease_expires_at.is_none());

    let recovered = harness.store.jobs.recover_orphans(timestamp::now()).await?;
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].state, JobState::Pending);
    Ok(())
}

#[tokio::test]
async fn test_job_submitted_by_another_process_runs() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(FakeTransport::new()).await?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let supervisor = harness.start(recording_registry(seen.clone())).await?;

    // the hint lands in the peer's queue, which nobody here consumes
    let peer = harness.peer_dispatcher();
    let job = peer.submit("record", 0, "Queued", json!({ "label": "remote" })).await?;

    let job = harness.wait_for_job(job.id, WAIT).await?;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(*seen.lock().unwrap(), vec!["remote"]);

    common::shutdown(&supervisor).await?;
    Ok(())
}

#[tokio::test]
async fn test_rescue_waits_for_queue_to_drain() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(FakeTransport::new()).await?;
    let peer = harness.peer_dispatcher();
    let stranded = peer.submit("record", 0, "Queued", json!({ "label": "a" })).await?;
    let queued = harness
        .dispatcher
        .submit("record", 0, "Queued", json!({ "label": "b" }))
        .await?;

    let later = timestamp::now() + ChronoDuration::seconds(60);
    let min_age = Duration::from_secs(1);

    // local backlog present, nothing is added
    assert_eq!(harness.dispatcher.rescue_pending(later, min_age).await?, 0);
    assert_eq!(harness.dispatcher.queue().len().await?, 1);

    let item = harness.dispatcher.queue().dequeue(Duration::ZERO).await?;
    assert_eq!(item.map(|i| i.job_id), Some(queued.id));

    // too young to rescue
    let young = harness
        .dispatcher
        .rescue_pending(timestamp::now(), Duration::from_secs(3600))
        .await?;
    assert_eq!(young, 0);

    // oldest first
    assert_eq!(harness.dispatcher.rescue_pending(later, min_age).await?, 2);
    let first = harness.dispatcher.queue().dequeue(Duration::ZERO).await?;
    assert_eq!(first.map(|i| i.job_id), Some(stranded.id));
    Ok(())
}
