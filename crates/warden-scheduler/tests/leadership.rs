// End-to-end leadership cycles against the in-process coordination backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use warden_coordination::{CoordinationStore, LocalElection, LocalElectionRegistry, MemoryStore};
use warden_scheduler::{
    leader::peek_status, ExecutionContext, FixedDelay, FnJob, InvocationOutcome, Job, JobError,
    JobExecutor, JobLeader, JobSchedule,
};

const DAY_MS: u64 = 86_400_000;

fn local_election(registry: &LocalElectionRegistry, node: &str) -> Arc<LocalElection> {
    Arc::new(LocalElection::new(
        registry.clone(),
        node,
        Duration::from_millis(10),
    ))
}

#[tokio::test(start_paused = true)]
async fn nightly_job_first_run_then_next_day() {
    let runs = Arc::new(AtomicUsize::new(0));
    let job: Arc<dyn Job> = {
        let runs = Arc::clone(&runs);
        Arc::new(FnJob::new("nightly", move |_ctx| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<(), JobError>(())
            }
        }))
    };
    let store = Arc::new(MemoryStore::new());
    let schedule = Arc::new(FixedDelay::from_millis(DAY_MS));
    let leader = JobLeader::new(
        job,
        schedule.clone(),
        Arc::new(JobExecutor::new(Duration::from_secs(60))),
        store.clone(),
        local_election(&LocalElectionRegistry::new(), "node-a"),
    );

    let before = Utc::now();
    let outcome = leader.run_cycle().await.unwrap();
    let after = Utc::now();
    assert_eq!(outcome, InvocationOutcome::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let status = peek_status(store.as_ref(), "nightly")
        .await
        .unwrap()
        .expect("status persisted");
    let completion = status.last_actual_completion_time.unwrap();
    // wall clock did not move while tokio time was paused
    assert!(completion >= before - ChronoDuration::milliseconds(1));
    assert!(completion <= after);

    let next = schedule.next_time(
        status.last_scheduled_time,
        status.last_actual_start_time,
        Some(completion),
    );
    assert_eq!(next, completion + ChronoDuration::milliseconds(DAY_MS as i64));
}

/// Two nodes compete for the same job: runs never overlap and the schedule
/// carries over between leaders through the shared store.
#[tokio::test(start_paused = true)]
async fn competing_nodes_never_overlap() {
    let registry = LocalElectionRegistry::new();
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let active = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let runs_by_node = Arc::new(Mutex::new(Vec::<String>::new()));

    let mut leaders = Vec::new();
    for node in ["node-a", "node-b"] {
        let active = Arc::clone(&active);
        let overlaps = Arc::clone(&overlaps);
        let runs_by_node = Arc::clone(&runs_by_node);
        let job: Arc<dyn Job> = Arc::new(FnJob::new("shared", move |_ctx: ExecutionContext| {
            let active = Arc::clone(&active);
            let overlaps = Arc::clone(&overlaps);
            let runs_by_node = Arc::clone(&runs_by_node);
            async move {
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(15)).await;
                runs_by_node.lock().unwrap().push(node.to_string());
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), JobError>(())
            }
        }));

        let leader = JobLeader::new(
            job,
            Arc::new(FixedDelay::from_millis(0)),
            Arc::new(JobExecutor::new(Duration::from_millis(100))),
            Arc::clone(&store),
            local_election(&registry, node),
        );
        leader.start().await.unwrap();
        leaders.push(leader);
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    // stop releases leadership without waiting for a run already in flight,
    // so only the steady state is checked
    let overlaps_seen = overlaps.load(Ordering::SeqCst);
    let runs = runs_by_node.lock().unwrap().clone();
    for leader in &leaders {
        leader.stop().await;
    }

    assert_eq!(overlaps_seen, 0);
    assert!(runs.len() >= 10, "expected steady progress, got {}", runs.len());
    assert!(runs.iter().any(|n| n == "node-a"));
    assert!(runs.iter().any(|n| n == "node-b"));

    let status = peek_status(store.as_ref(), "shared").await.unwrap().unwrap();
    assert!(status.last_actual_completion_time.is_some());
}

/// A leader that stops mid-wait never fires the pending run, and the next
/// leader reschedules from whatever record the store holds.
#[tokio::test(start_paused = true)]
async fn stopped_leader_hands_schedule_to_next_leader() {
    let registry = LocalElectionRegistry::new();
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let make_job = |runs: Arc<AtomicUsize>| -> Arc<dyn Job> {
        Arc::new(FnJob::new("handover", move |_ctx| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<(), JobError>(())
            }
        }))
    };

    // first node completes one cycle, then waits a minute for the next one
    let first = JobLeader::new(
        make_job(runs.clone()),
        Arc::new(FixedDelay::from_millis(60_000)),
        Arc::new(JobExecutor::new(Duration::from_secs(1))),
        Arc::clone(&store),
        local_election(&registry, "node-a"),
    );
    first.run_cycle().await.unwrap();

    first.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    first.stop().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    // either the earlier record, or the cancelled run's backfilled one
    let persisted = peek_status(store.as_ref(), "handover").await.unwrap().unwrap();
    assert!(persisted.last_actual_completion_time.is_some());

    let second = JobLeader::new(
        make_job(runs.clone()),
        Arc::new(FixedDelay::from_millis(60_000)),
        Arc::new(JobExecutor::new(Duration::from_secs(1))),
        Arc::clone(&store),
        local_election(&registry, "node-b"),
    );
    second.run_cycle().await.unwrap();
    let rescheduled = peek_status(store.as_ref(), "handover").await.unwrap().unwrap();
    assert_eq!(
        rescheduled.last_scheduled_time,
        Some(persisted.last_actual_completion_time.unwrap() + ChronoDuration::milliseconds(60_000))
    );
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}
