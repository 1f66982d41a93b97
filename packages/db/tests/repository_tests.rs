#![allow(clippy::disallowed_methods)]

mod common;

use chrono::Duration;
use dispatch_core::{
    Contact, ContactStatus, Job, JobId, JobState, RemoteContact, job_types, timestamp,
};
use serde_json::json;
use std::error::Error;

use db::DbError;
use db::repositories::{JobChange, JobFilter, UpsertOutcome};

#[tokio::test]
async fn test_job_lifecycle() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let jobs = &store.jobs;

    let job = Job::new(job_types::VERIFY_CONTACTS, json!({ "status": "active" }))
        .with_total(2)
        .with_message("Starting");
    let created = jobs.create(&job).await?;
    assert_eq!(created.id, job.id);
    assert_eq!(created.state, JobState::Pending);
    assert_eq!(created.payload, json!({ "status": "active" }));

    let lease = timestamp::now() + Duration::seconds(60);
    let claimed = jobs.claim(job.id, "worker-1", lease).await?;
    assert_eq!(claimed.state, JobState::Running);
    assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
    assert!(claimed.started_at.is_some());

    // second claim loses the race
    let again = jobs.claim(job.id, "worker-2", lease).await;
    assert!(matches!(again, Err(DbError::Conflict(_))));

    let progressed = jobs.record_progress(job.id, JobChange::step(true)).await?;
    assert_eq!((progressed.processed, progressed.succeeded), (1, 1));
    let progressed = jobs.record_progress(job.id, JobChange::step(false)).await?;
    assert_eq!((progressed.processed, progressed.failed), (2, 1));

    let done = jobs.complete(job.id, "Completed: 1 active, 1 inactive").await?;
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.processed, done.total);
    assert_eq!(done.message, "Completed: 1 active, 1 inactive");
    assert!(done.completed_at.is_some());
    assert!(done.worker_id.is_none());

    let after = jobs.fail(job.id, "too late").await;
    assert!(matches!(after, Err(DbError::Conflict(_))));

    let missing = jobs.get(JobId::new()).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_progress_never_exceeds_total() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let jobs = &store.jobs;

    let job = jobs
        .create(&Job::new(job_types::VERIFY_CONTACTS, json!({})).with_total(1))
        .await?;
    jobs.claim(job.id, "w", timestamp::now() + Duration::seconds(30))
        .await?;

    jobs.record_progress(job.id, JobChange::step(true)).await?;
    let overshoot = jobs.record_progress(job.id, JobChange::step(true)).await;
    assert!(matches!(overshoot, Err(DbError::Conflict(_))));

    let stored = jobs.get(job.id).await?;
    assert_eq!((stored.processed, stored.total), (1, 1));

    // raising the total makes room again
    let raised = jobs
        .record_progress(job.id, JobChange::step(true).with_total(3))
        .await?;
    assert_eq!((raised.processed, raised.total), (2, 3));

    // a total below the work already done is refused
    let shrink = jobs
        .record_progress(job.id, JobChange::default().with_total(1))
        .await;
    assert!(matches!(shrink, Err(DbError::Conflict(_))));

    // completion pins total to processed
    let done = jobs.complete(job.id, "done").await?;
    assert_eq!((done.processed, done.total), (2, 2));

    Ok(())
}

#[tokio::test]
async fn test_cancel_and_fail_rules() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let jobs = &store.jobs;

    let pending = jobs.create(&Job::new(job_types::SYNC_CONTACTS, json!({}))).await?;
    let cancelled = jobs.cancel(pending.id).await?;
    assert_eq!(cancelled.state, JobState::Cancelled);

    let running = jobs.create(&Job::new(job_types::SYNC_CONTACTS, json!({}))).await?;
    jobs.claim(running.id, "w", timestamp::now() + Duration::seconds(30))
        .await?;
    let refused = jobs.cancel(running.id).await;
    assert!(matches!(refused, Err(DbError::Conflict(_))));

    let long_error = "e".repeat(800);
    let failed = jobs.fail(running.id, long_error).await?;
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.message.chars().count(), 500);

    // pending jobs may fail directly (unknown type)
    let unknown = jobs.create(&Job::new("mystery", json!({}))).await?;
    let failed = jobs.fail(unknown.id, "Unknown job type: mystery").await?;
    assert_eq!(failed.state, JobState::Failed);

    Ok(())
}

#[tokio::test]
async fn test_orphan_recovery_is_idempotent() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let jobs = &store.jobs;
    let now = timestamp::now();

    let expired = jobs.create(&Job::new(job_types::SYNC_CONTACTS, json!({}))).await?;
    jobs.claim(expired.id, "dead", now - Duration::seconds(5)).await?;
    jobs.record_progress(expired.id, JobChange::step(true).with_total(4))
        .await?;

    let live = jobs.create(&Job::new(job_types::SYNC_CONTACTS, json!({}))).await?;
    jobs.claim(live.id, "alive", now + Duration::seconds(60)).await?;

    let released = jobs.create(&Job::new(job_types::SYNC_CONTACTS, json!({}))).await?;
    jobs.claim(released.id, "stopping", now + Duration::seconds(60))
        .await?;
    assert!(jobs.release_lease(released.id, "stopping").await?);

    let recovered = jobs.recover_orphans(now).await?;
    let mut ids: Vec<JobId> = recovered.iter().map(|j| j.id).collect();
    ids.sort();
    let mut expected = vec![expired.id, released.id];
    expected.sort();
    assert_eq!(ids, expected);

    let reset = jobs.get(expired.id).await?;
    assert_eq!(reset.state, JobState::Pending);
    assert_eq!(reset.message, "Re-queued after worker restart");
    assert_eq!(reset.processed, 0);
    assert!(reset.worker_id.is_none());

    assert_eq!(jobs.get(live.id).await?.state, JobState::Running);

    let second = jobs.recover_orphans(now).await?;
    assert!(second.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_lease_renewal_requires_owner() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let jobs = &store.jobs;
    let now = timestamp::now();

    let job = jobs.create(&Job::new(job_types::SYNC_CONTACTS, json!({}))).await?;
    jobs.claim(job.id, "owner", now + Duration::seconds(1)).await?;

    let later = now + Duration::seconds(120);
    assert!(jobs.renew_lease(job.id, "owner", later).await?);
    assert!(!jobs.renew_lease(job.id, "intruder", later).await?);
    assert_eq!(jobs.get(job.id).await?.lease_expires_at, Some(later));

    jobs.complete(job.id, "ok").await?;
    assert!(!jobs.renew_lease(job.id, "owner", later).await?);

    Ok(())
}

#[tokio::test]
async fn test_job_queries() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let jobs = &store.jobs;

    let first = jobs.create(&Job::new(job_types::VERIFY_CONTACTS, json!({}))).await?;
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let second = jobs.create(&Job::new(job_types::VERIFY_CONTACTS, json!({}))).await?;
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let other = jobs.create(&Job::new(job_types::SYNC_CONTACTS, json!({}))).await?;

    jobs.cancel(first.id).await?;

    let active = jobs.get_active(job_types::VERIFY_CONTACTS).await?;
    assert_eq!(active.map(|j| j.id), Some(second.id));

    let latest = jobs.get_latest(job_types::VERIFY_CONTACTS).await?;
    assert_eq!(latest.map(|j| j.id), Some(second.id));

    let latest_two = jobs.list_latest(job_types::VERIFY_CONTACTS, 5).await?;
    assert_eq!(
        latest_two.iter().map(|j| j.id).collect::<Vec<_>>(),
        vec![second.id, first.id]
    );

    let cancelled = jobs
        .list(JobFilter {
            state: Some(JobState::Cancelled),
            ..Default::default()
        })
        .await?;
    assert_eq!(cancelled.len(), 1);

    let sync = jobs
        .list(JobFilter {
            job_type: Some(job_types::SYNC_CONTACTS.to_string()),
            ..Default::default()
        })
        .await?;
    assert_eq!(sync.iter().map(|j| j.id).collect::<Vec<_>>(), vec![other.id]);

    let counts = jobs.count_by_state().await?;
    assert_eq!(counts.get(&JobState::Pending).copied(), Some(2));
    assert_eq!(counts.get(&JobState::Cancelled).copied(), Some(1));

    Ok(())
}

#[tokio::test]
async fn test_contact_directory() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let contacts = &store.contacts;

    let ana = contacts.create(&Contact::new("+5511900000001")).await?;
    let blocked = contacts
        .create(&Contact::new("+5511900000002").with_status(ContactStatus::Blocked))
        .await?;

    let duplicate = contacts.create(&Contact::new("+5511900000001")).await;
    assert!(duplicate.is_err());

    let found = contacts.find_by_phone("+5511900000001").await?;
    assert_eq!(found.map(|c| c.id), Some(ana.id));

    let candidates = contacts.list_candidates().await?;
    assert_eq!(candidates.iter().map(|c| c.id).collect::<Vec<_>>(), vec![ana.id]);

    let inactive = contacts.set_status(ana.id, ContactStatus::Inactive).await?;
    assert_eq!(inactive.status, ContactStatus::Inactive);
    assert!(contacts.list_by_status(ContactStatus::Active).await?.is_empty());
    assert_eq!(contacts.get(blocked.id).await?.status, ContactStatus::Blocked);

    // upsert fills a missing name once and never overwrites it
    let remote = RemoteContact {
        phone: "+5511900000001".into(),
        name: Some("Ana".into()),
        photo_url: None,
    };
    assert_eq!(contacts.upsert_remote(&remote).await?, UpsertOutcome::Updated);
    assert_eq!(contacts.get(ana.id).await?.name.as_deref(), Some("Ana"));

    let renamed = RemoteContact {
        name: Some("Someone else".into()),
        ..remote.clone()
    };
    assert_eq!(contacts.upsert_remote(&renamed).await?, UpsertOutcome::Unchanged);
    assert_eq!(contacts.get(ana.id).await?.name.as_deref(), Some("Ana"));

    let fresh = RemoteContact {
        phone: "+5511900000003".into(),
        name: Some("Bia".into()),
        photo_url: Some("https://example.test/bia.png".into()),
    };
    assert_eq!(contacts.upsert_remote(&fresh).await?, UpsertOutcome::Created);
    let bia = contacts.find_by_phone("+5511900000003").await?;
    let bia = bia.ok_or("synced contact missing")?;
    assert_eq!(bia.origin, "whatsapp_sync");
    assert_eq!(bia.status, ContactStatus::Active);

    let at = timestamp::now();
    let touched = contacts.touch_inbound("+5511900000003", at).await?;
    assert_eq!(touched.and_then(|c| c.last_message_at), Some(at));
    assert!(contacts.touch_inbound("+0000", at).await?.is_none());

    Ok(())
}
