// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end session tests against the in-memory store, mock cluster and
//! mock queue.

mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::io::AsyncWriteExt;

use common::*;
use judger_coordinator::cluster::{ClusterCall, JobStatus, MockCluster, WatchEventKind};
use judger_coordinator::lease::lease_key;
use judger_coordinator::queue::{MockQueue, QueueCall};
use judger_coordinator::session::{SessionOutcome, SessionSettings};
use judger_coordinator::store::LeaseStore;
use judger_protocol::status;

fn running() -> JobStatus {
    JobStatus {
        active: 1,
        ready: Some(1),
        ..JobStatus::default()
    }
}

/// Wait until the cluster has seen a call matching `pred`.
async fn wait_for_call(ctx: &TestContext, pred: impl Fn(&ClusterCall) -> bool) {
    for _ in 0..500 {
        if ctx.cluster.calls().await.iter().any(&pred) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected cluster call never happened");
}

fn is_watch(call: &ClusterCall) -> bool {
    matches!(call, ClusterCall::WatchJob { .. })
}

/// Assert the three-step failure report for `t1`.
async fn assert_failure_reported(ctx: &TestContext, reason: &str) {
    let calls = ctx.queue.calls_for("s1", "t1").await;
    let tail = &calls[calls.len() - 3..];
    match &tail[0] {
        QueueCall::Patch { info, .. } => {
            assert_eq!(info.status, status::ERROR);
            assert_eq!(info.score, 0.0);
            assert_eq!(info.message, reason);
        }
        other => panic!("expected patch, got {:?}", other),
    }
    match &tail[1] {
        QueueCall::SaveDetails { details, .. } => assert_eq!(details.summary, reason),
        other => panic!("expected details, got {:?}", other),
    }
    assert!(matches!(tail[2], QueueCall::Complete { .. }));
}

/// Assert everything a finished session leaves behind is gone.
async fn assert_cleaned_up(ctx: &TestContext, id: &judger_coordinator::work_item::SessionId) {
    assert!(ctx.cluster.deleted_namespaces().await.contains(&"j-t1".to_string()));
    assert!(
        ctx.cluster
            .calls()
            .await
            .contains(&ClusterCall::DeleteBinding("j-t1-judge-binding".to_string()))
    );
    assert!(!ctx.store.exists(&lease_key(id)).await.unwrap());
    assert!(!ctx.store.exists(&id.watermark_key()).await.unwrap());
    assert!(!ctx.store.exists(id.as_str()).await.unwrap());
    assert_eq!(ctx.admitted().await, 0);
}

#[tokio::test]
async fn test_session_end_to_end() {
    let ctx = TestContext::new().await;
    ctx.cluster
        .set_log("j-t1", log(&[GREET, PATCH_50, COMPLETE]))
        .await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    let outcome = ctx.run_session(id.clone()).await;
    assert_eq!(outcome, SessionOutcome::Succeeded);

    let patches = ctx.queue.patches("s1", "t1").await;
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].score, 50.0);
    assert_eq!(patches[0].status, "Accepted");
    assert_eq!(ctx.queue.completions("s1", "t1").await, 1);

    // Namespace, quota, limit range and binding documents.
    let submitted: Vec<_> = ctx
        .cluster
        .calls()
        .await
        .into_iter()
        .filter_map(|call| match call {
            ClusterCall::Submit { document, .. } => Some(document),
            _ => None,
        })
        .collect();
    assert_eq!(submitted.len(), 4);
    assert!(submitted[0].contains("name: j-t1"));
    assert!(submitted[0].contains("judger/cpu: \"2\""));
    assert!(submitted[3].contains("j-t1-judge-binding"));

    let jobs = ctx.cluster.created_jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["metadata"]["name"], "judge");
    assert_eq!(jobs[0]["metadata"]["namespace"], "j-t1");
    let env = &jobs[0]["spec"]["template"]["spec"]["containers"][0]["env"];
    assert_eq!(env, &json!([{"name": "SOLUTION_URL", "value": SOLUTION_URL}]));

    assert!(!ctx.cluster.namespace_present("j-t1").await);
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_log_without_complete_gets_final_complete() {
    let ctx = TestContext::new().await;
    ctx.cluster.set_log("j-t1", log(&[GREET, PATCH_50])).await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    assert_eq!(ctx.run_session(id).await, SessionOutcome::Succeeded);
    assert_eq!(
        ctx.queue.calls_for("s1", "t1").await.last(),
        Some(&QueueCall::Complete {
            solution_id: "s1".to_string(),
            task_id: "t1".to_string(),
        })
    );
    assert_eq!(ctx.queue.completions("s1", "t1").await, 1);
}

#[tokio::test]
async fn test_quit_stops_reading() {
    let ctx = TestContext::new().await;
    let late = r#"{"action":"patch","body":{"score":100,"status":"Accepted","message":"late"}}"#;
    ctx.cluster
        .set_log("j-t1", log(&[PATCH_50, QUIT, late, COMPLETE]))
        .await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    assert_eq!(ctx.run_session(id.clone()).await, SessionOutcome::Succeeded);

    let patches = ctx.queue.patches("s1", "t1").await;
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].score, 50.0);
    assert_eq!(ctx.queue.completions("s1", "t1").await, 1);
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_blank_and_noop_lines_are_skipped() {
    let ctx = TestContext::new().await;
    ctx.cluster
        .set_log(
            "j-t1",
            format!("\n   \n{}\n{}\n{}\n", r#"{"action":"noop"}"#, PATCH_50, COMPLETE),
        )
        .await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    assert_eq!(ctx.run_session(id).await, SessionOutcome::Succeeded);
    assert_eq!(ctx.queue.calls_for("s1", "t1").await.len(), 2);
}

#[tokio::test]
async fn test_detail_is_uploaded() {
    let ctx = TestContext::new().await;
    let detail = r#"{"action":"detail","body":{"version":1,"jobs":[],"summary":"all good"}}"#;
    ctx.cluster
        .set_log("j-t1", log(&[detail, COMPLETE]))
        .await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    assert_eq!(ctx.run_session(id).await, SessionOutcome::Succeeded);
    match &ctx.queue.calls_for("s1", "t1").await[0] {
        QueueCall::SaveDetails { details, .. } => assert_eq!(details.summary, "all good"),
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_action_fails_session() {
    let ctx = TestContext::new().await;
    ctx.cluster
        .set_log("j-t1", log(&[PATCH_50, r#"{"action":"dance"}"#, COMPLETE]))
        .await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    let outcome = ctx.run_session(id.clone()).await;
    let SessionOutcome::Failed(reason) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(reason.starts_with("Failed to run session: "));
    assert!(reason.contains("unknown action"));

    // The patch before the bad line went through; the complete after it did not.
    assert_eq!(ctx.queue.patches("s1", "t1").await[0].score, 50.0);
    assert_failure_reported(&ctx, &reason).await;
    assert_eq!(ctx.queue.completions("s1", "t1").await, 1);
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_judge_error_fails_session() {
    let ctx = TestContext::new().await;
    ctx.cluster
        .set_log("j-t1", log(&[r#"{"action":"error","body":"checker crashed"}"#]))
        .await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    let outcome = ctx.run_session(id.clone()).await;
    assert_eq!(
        outcome,
        SessionOutcome::Failed(
            "Failed to run session: Judge reported an error: checker crashed".to_string()
        )
    );
    assert_failure_reported(
        &ctx,
        "Failed to run session: Judge reported an error: checker crashed",
    )
    .await;
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_upstream_patch_failure_fails_session() {
    let ctx = TestContext::build(
        MockCluster::new(),
        MockQueue::new().failing_patches(),
        SessionSettings::default(),
    )
    .await;
    ctx.cluster
        .set_log("j-t1", log(&[PATCH_50, COMPLETE]))
        .await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    let outcome = ctx.run_session(id.clone()).await;
    let SessionOutcome::Failed(reason) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(reason.contains("Failed to forward"));

    // The failure patch is attempted too; details and complete still follow.
    assert_failure_reported(&ctx, &reason).await;
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_broken_log_stream_fails_session() {
    let cluster = MockCluster::new().failing_log_stream("`kubectl logs judge-0` failed: Forbidden");
    let ctx = TestContext::with_cluster(cluster).await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    let outcome = ctx.run_session(id.clone()).await;
    let SessionOutcome::Failed(reason) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(reason.contains("Failed to read job log"));
    assert!(reason.contains("Forbidden"));

    // Only the failure report reaches upstream; no bare completion.
    assert_eq!(ctx.queue.calls_for("s1", "t1").await.len(), 3);
    assert_failure_reported(&ctx, &reason).await;
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout() {
    let ctx = TestContext::with_cluster(MockCluster::never_ready()).await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    let outcome = ctx.run_session(id.clone()).await;
    let reason = "Failed to run session: Timed out after 600s waiting for the job to start";
    assert_eq!(outcome, SessionOutcome::Failed(reason.to_string()));
    assert_failure_reported(&ctx, reason).await;
    assert!(
        !ctx.cluster
            .calls()
            .await
            .iter()
            .any(|call| matches!(call, ClusterCall::StreamLog { .. }))
    );
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_readiness_reached_through_watch() {
    let ctx = TestContext::with_cluster(MockCluster::never_ready()).await;
    ctx.cluster.set_log("j-t1", log(&[PATCH_50, COMPLETE])).await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    assert!(ctx.ctx.admission.try_admit().await.unwrap());
    let spawned = ctx.ctx.spawn_session(id.clone());

    wait_for_call(&ctx, is_watch).await;
    ctx.cluster
        .push_job_event("j-t1", "judge", WatchEventKind::Modified, running())
        .await;

    assert_eq!(spawned.handle.await.unwrap(), SessionOutcome::Succeeded);
    assert_eq!(ctx.queue.patches("s1", "t1").await.len(), 1);
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_job_deleted_before_start() {
    let ctx = TestContext::with_cluster(MockCluster::never_ready()).await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    assert!(ctx.ctx.admission.try_admit().await.unwrap());
    let spawned = ctx.ctx.spawn_session(id.clone());

    wait_for_call(&ctx, is_watch).await;
    ctx.cluster
        .push_job_event("j-t1", "judge", WatchEventKind::Deleted, JobStatus::default())
        .await;

    let outcome = spawned.handle.await.unwrap();
    let SessionOutcome::Failed(reason) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(reason.contains("Job not running"));
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_watch_closed() {
    let ctx = TestContext::with_cluster(MockCluster::never_ready().closing_watches()).await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    let outcome = ctx.run_session(id.clone()).await;
    assert_eq!(
        outcome,
        SessionOutcome::Failed("Failed to run session: Job watch closed unexpectedly".to_string())
    );
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_skipped_when_leased_elsewhere() {
    let ctx = TestContext::new().await;
    let id = ctx.persist(&work_item("s1", "t1")).await;
    ctx.store
        .set_if_absent(&lease_key(&id), "coordinator-other", Duration::from_secs(360))
        .await
        .unwrap();

    assert_eq!(ctx.run_session(id.clone()).await, SessionOutcome::Skipped);

    assert!(ctx.queue.calls().await.is_empty());
    assert!(ctx.cluster.calls().await.is_empty());
    assert_eq!(
        ctx.store.get(&lease_key(&id)).await.unwrap().as_deref(),
        Some("coordinator-other")
    );
    assert!(ctx.store.exists(id.as_str()).await.unwrap());
    assert_eq!(ctx.admitted().await, 0);
}

#[tokio::test]
async fn test_abandoned_when_item_missing() {
    let ctx = TestContext::new().await;
    let id = judger_coordinator::work_item::SessionId::for_task("s1", "t1");

    let outcome = ctx.run_session(id.clone()).await;
    assert!(matches!(outcome, SessionOutcome::Abandoned(_)));
    assert!(!ctx.store.exists(&lease_key(&id)).await.unwrap());
    assert!(ctx.queue.calls().await.is_empty());
    assert_eq!(ctx.admitted().await, 0);
}

#[tokio::test]
async fn test_existing_environment_and_job_are_reused() {
    let ctx = TestContext::new().await;
    ctx.cluster.add_namespace("j-t1").await;
    ctx.cluster.add_job("j-t1", "judge", running()).await;
    ctx.cluster.set_log("j-t1", log(&[COMPLETE])).await;

    let id = ctx.persist(&work_item("s1", "t1")).await;
    let mark = Utc.with_ymd_and_hms(2025, 1, 20, 8, 30, 0).unwrap();
    ctx.ctx.work_items.set_watermark(&id, mark).await.unwrap();

    assert_eq!(ctx.run_session(id.clone()).await, SessionOutcome::Succeeded);

    let calls = ctx.cluster.calls().await;
    assert!(!calls.iter().any(|c| matches!(c, ClusterCall::Submit { .. })));
    assert!(ctx.cluster.created_jobs().await.is_empty());
    assert!(calls.contains(&ClusterCall::StreamLog {
        namespace: "j-t1".to_string(),
        pod: "judge-0".to_string(),
        follow: true,
        since: Some(mark),
    }));
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_provisioning_failure() {
    let cluster = MockCluster::new().failing_documents("ClusterRoleBinding");
    let ctx = TestContext::with_cluster(cluster).await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    let outcome = ctx.run_session(id.clone()).await;
    let SessionOutcome::Failed(reason) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(reason.contains("Failed to provision 20-binding.yaml"));
    assert!(ctx.cluster.created_jobs().await.is_empty());
    assert_failure_reported(&ctx, &reason).await;
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_missing_job_template() {
    let ctx = TestContext::new().await;
    let item = work_item_with_config("s1", "t1", json!({"variables": {"cpu": "1"}}));
    let id = ctx.persist(&item).await;

    let outcome = ctx.run_session(id.clone()).await;
    assert_eq!(
        outcome,
        SessionOutcome::Failed("Failed to run session: job template is missing".to_string())
    );
    assert!(ctx.cluster.created_jobs().await.is_empty());
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_teardown_failure_is_best_effort() {
    let ctx = TestContext::with_cluster(MockCluster::new().failing_namespace_delete()).await;
    ctx.cluster.set_log("j-t1", log(&[COMPLETE])).await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    assert_eq!(ctx.run_session(id.clone()).await, SessionOutcome::Succeeded);

    // The namespace survives but every later step still ran.
    assert!(ctx.cluster.namespace_present("j-t1").await);
    assert_cleaned_up(&ctx, &id).await;
}

#[tokio::test]
async fn test_replay_repeats_the_same_calls() {
    let ctx = TestContext::new().await;
    let item = work_item("s1", "t1");
    let lines = log(&[GREET, PATCH_50, COMPLETE]);

    ctx.cluster.set_log("j-t1", lines.clone()).await;
    let id = ctx.persist(&item).await;
    assert_eq!(ctx.run_session(id).await, SessionOutcome::Succeeded);
    let first_queue = ctx.queue.calls().await;
    let first_cluster = ctx.cluster.calls().await;

    let id = ctx.persist(&item).await;
    assert_eq!(ctx.run_session(id).await, SessionOutcome::Succeeded);
    let queue = ctx.queue.calls().await;
    let cluster = ctx.cluster.calls().await;

    assert_eq!(&queue[first_queue.len()..], first_queue.as_slice());
    assert_eq!(&cluster[first_cluster.len()..], first_cluster.as_slice());
}

#[tokio::test(start_paused = true)]
async fn test_lease_loss_abandons_session() {
    let settings = SessionSettings {
        lease_ttl: Duration::from_secs(30),
        refresh_interval: Duration::from_secs(10),
        ..SessionSettings::default()
    };
    let ctx = TestContext::build(MockCluster::new(), MockQueue::new(), settings).await;
    let mut writer = ctx.cluster.attach_live_log("j-t1").await;
    let id = ctx.persist(&work_item("s1", "t1")).await;

    assert!(ctx.ctx.admission.try_admit().await.unwrap());
    let spawned = ctx.ctx.spawn_session(id.clone());

    writer.write_all(format!("{}\n", PATCH_50).as_bytes()).await.unwrap();
    for _ in 0..100 {
        if !ctx.queue.patches("s1", "t1").await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(ctx.queue.patches("s1", "t1").await.len(), 1);

    // Another coordinator's view: the lease expired and was taken over.
    ctx.store.delete(&lease_key(&id)).await.unwrap();

    assert_eq!(spawned.handle.await.unwrap(), SessionOutcome::LeaseLost);

    // Nothing is reported and nothing is torn down.
    assert_eq!(ctx.queue.completions("s1", "t1").await, 0);
    assert_eq!(ctx.queue.calls().await.len(), 1);
    assert!(ctx.cluster.deleted_namespaces().await.is_empty());
    assert!(ctx.store.exists(id.as_str()).await.unwrap());
    assert!(ctx.store.exists(&id.watermark_key()).await.unwrap());
    assert_eq!(ctx.admitted().await, 0);
    drop(writer);
}
