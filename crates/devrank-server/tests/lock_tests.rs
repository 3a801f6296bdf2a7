//! Singleton execution across competing lock holders

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use devrank_server::lock::{DistributedLock, LockOutcome, RANKING_UPDATE_LOCK};
use devrank_server::store::{MemoryStore, SharedStore};

#[tokio::test]
async fn test_only_one_concurrent_holder_runs() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let runs = Arc::new(AtomicUsize::new(0));

    // Separate lock handles over one store behave like separate instances
    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let lock = DistributedLock::new(store.clone());
            let runs = runs.clone();
            tokio::spawn(async move {
                lock.run_exclusively(RANKING_UPDATE_LOCK, Duration::from_secs(30), || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                })
                .await
                .unwrap()
            })
        })
        .collect();

    let mut executed = 0;
    for attempt in attempts {
        if attempt.await.unwrap().is_executed() {
            executed += 1;
        }
    }

    assert_eq!(executed, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_lock_can_be_taken_over() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let first = DistributedLock::new(store.clone());
    let second = DistributedLock::new(store);

    let guard = first
        .try_acquire(RANKING_UPDATE_LOCK, Duration::from_secs(5))
        .await
        .unwrap()
        .expect("first acquisition");

    let blocked = second
        .run_exclusively(RANKING_UPDATE_LOCK, Duration::from_secs(5), || async { "ran" })
        .await
        .unwrap();
    assert_eq!(blocked, LockOutcome::Skipped);

    tokio::time::advance(Duration::from_secs(6)).await;

    let taken = second
        .run_exclusively(RANKING_UPDATE_LOCK, Duration::from_secs(5), || async { "ran" })
        .await
        .unwrap();
    assert_eq!(taken, LockOutcome::Executed("ran"));

    // The original owner's late release is a no-op
    assert!(!first.release(&guard).await.unwrap());
}
