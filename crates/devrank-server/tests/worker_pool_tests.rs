//! Worker pool against the in-process queue

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use devrank_common::{HarvestRequest, JobKind, SubjectKey};
use devrank_server::harvest::{
    HarvestError, HarvestJob, HarvestQueue, JobHandler, JobStatus, MemoryHarvestQueue, ProgressReporter,
    UpstreamError, WorkerPool, WorkerPoolConfig,
};

/// `flaky` fails twice with a retryable error, `broken` fails terminally,
/// everything else succeeds after reporting progress
#[derive(Default)]
struct ScriptedHandler {
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedHandler {
    fn calls(&self, login: &str) -> usize {
        self.calls.lock().unwrap().get(login).copied().unwrap_or(0)
    }
}

#[async_trait]
impl JobHandler for ScriptedHandler {
    async fn handle(&self, job: &HarvestJob, progress: &ProgressReporter) -> Result<(), HarvestError> {
        let login = job.subject.to_string();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(login.clone()).or_default();
            *count += 1;
            *count
        };

        match login.as_str() {
            "flaky" if call <= 2 => Err(HarvestError::Upstream(UpstreamError::Server {
                status: 502,
                path: "/users/flaky".into(),
            })),
            "broken" => Err(HarvestError::Upstream(UpstreamError::NotFound("/users/broken".into()))),
            _ => {
                progress.report(50).await;
                Ok(())
            }
        }
    }
}

fn config(workers: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        workers,
        poll_interval: Duration::from_millis(10),
        stale_job_timeout: Duration::from_secs(60),
    }
}

async fn enqueue(queue: &MemoryHarvestQueue, login: &str) -> uuid::Uuid {
    let request = HarvestRequest::new(SubjectKey::parse(login).unwrap(), JobKind::Full);
    queue.enqueue(&request).await.unwrap().job_id
}

fn pool(queue: &MemoryHarvestQueue, handler: &Arc<ScriptedHandler>, workers: usize) -> WorkerPool {
    WorkerPool::new(Arc::new(queue.clone()), handler.clone(), config(workers))
}

#[tokio::test]
async fn test_drain_completes_jobs() {
    let queue = MemoryHarvestQueue::new(3, Duration::ZERO);
    let handler = Arc::new(ScriptedHandler::default());

    let id = enqueue(&queue, "octocat").await;
    let ran = pool(&queue, &handler, 1).drain().await.unwrap();

    assert_eq!(ran, 1);
    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn test_retryable_failures_are_retried_until_success() {
    let queue = MemoryHarvestQueue::new(3, Duration::ZERO);
    let handler = Arc::new(ScriptedHandler::default());

    let id = enqueue(&queue, "flaky").await;
    pool(&queue, &handler, 1).drain().await.unwrap();

    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(handler.calls("flaky"), 3);
}

#[tokio::test]
async fn test_retries_stop_at_attempt_ceiling() {
    let queue = MemoryHarvestQueue::new(2, Duration::ZERO);
    let handler = Arc::new(ScriptedHandler::default());

    let id = enqueue(&queue, "flaky").await;
    pool(&queue, &handler, 1).drain().await.unwrap();

    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert!(job.last_error.unwrap().contains("502"));
}

#[tokio::test]
async fn test_terminal_failure_is_not_retried() {
    let queue = MemoryHarvestQueue::new(5, Duration::ZERO);
    let handler = Arc::new(ScriptedHandler::default());

    let id = enqueue(&queue, "broken").await;
    pool(&queue, &handler, 1).drain().await.unwrap();

    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(handler.calls("broken"), 1);
}

#[tokio::test]
async fn test_spawned_pool_drains_and_stops_on_shutdown() {
    let queue = MemoryHarvestQueue::new(3, Duration::ZERO);
    let handler = Arc::new(ScriptedHandler::default());

    for login in ["alice", "bob", "carol", "flaky"] {
        enqueue(&queue, login).await;
    }

    let shutdown = CancellationToken::new();
    let handle = pool(&queue, &handler, 2).spawn(shutdown.clone());

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if queue.metrics().await.unwrap().completed == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "pool did not drain the queue");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pool stops after shutdown")
        .unwrap();

    // Each subject ran exactly as often as its script requires
    assert_eq!(handler.calls("alice"), 1);
    assert_eq!(handler.calls("flaky"), 3);
}

/// Sleeps without reporting progress, recording how many copies run at once
#[derive(Default)]
struct SlowHandler {
    running: AtomicUsize,
    max_running: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl JobHandler for SlowHandler {
    async fn handle(&self, _job: &HarvestJob, _progress: &ProgressReporter) -> Result<(), HarvestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(1200)).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn wait_for_completed(queue: &MemoryHarvestQueue, count: i64) {
    let done = tokio::time::timeout(Duration::from_secs(10), async {
        while queue.metrics().await.unwrap().completed < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(done.is_ok(), "jobs did not complete in time");
}

#[tokio::test]
async fn test_long_running_job_is_not_reclaimed_while_alive() {
    let queue = MemoryHarvestQueue::new(3, Duration::ZERO);
    let handler = Arc::new(SlowHandler::default());
    let id = enqueue(&queue, "octocat").await;

    let config = WorkerPoolConfig {
        workers: 2,
        poll_interval: Duration::from_millis(10),
        stale_job_timeout: Duration::from_millis(300),
    };
    let shutdown = CancellationToken::new();
    let handle = WorkerPool::new(Arc::new(queue.clone()), handler.clone(), config).spawn(shutdown.clone());

    wait_for_completed(&queue, 1).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(handler.max_running.load(Ordering::SeqCst), 1);

    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
}

/// Panics on its first job, succeeds afterwards
#[derive(Default)]
struct PanicOnceHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl JobHandler for PanicOnceHandler {
    async fn handle(&self, job: &HarvestJob, _progress: &ProgressReporter) -> Result<(), HarvestError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("handler crashed on {}", job.subject);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_panicked_worker_is_replaced() {
    let queue = MemoryHarvestQueue::new(3, Duration::ZERO);
    let handler = Arc::new(PanicOnceHandler::default());

    let shutdown = CancellationToken::new();
    let handle = WorkerPool::new(Arc::new(queue.clone()), handler.clone(), config(1)).spawn(shutdown.clone());

    enqueue(&queue, "crasher").await;
    let survivor = enqueue(&queue, "alice").await;

    // The single worker died on the first job; only a replacement can run the second
    wait_for_completed(&queue, 1).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    let job = queue.get(survivor).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}
