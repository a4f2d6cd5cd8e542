//! Races between appenders, drainers and lock contenders sharing one cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wb_cache::{BufferStore, Cache, ConversationLock, MemoryCache};
use wb_domain::{ConversationId, Fragment};

fn conv(id: &str) -> ConversationId {
    ConversationId::parse(id).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_contender_wins_the_lock() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let lock = Arc::new(ConversationLock::new(cache, Duration::from_secs(30)));
    let winners = Arc::new(AtomicUsize::new(0));
    let c = conv("5511999990000");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let lock = lock.clone();
        let winners = winners.clone();
        let c = c.clone();
        handles.push(tokio::spawn(async move {
            if let Some(guard) = lock.try_acquire(&c).await.unwrap() {
                winners.fetch_add(1, Ordering::SeqCst);
                // Hold it long enough for every other contender to try.
                tokio::time::sleep(Duration::from_millis(50)).await;
                guard.release().await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn locked_drains_never_duplicate_fragments() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let buffers = Arc::new(BufferStore::new(cache.clone(), Duration::from_secs(300)));
    let lock = Arc::new(ConversationLock::new(cache, Duration::from_secs(30)));
    let c = conv("447700900123");

    for i in 0..10 {
        buffers
            .append(&c, Fragment::text(format!("m{i}")))
            .await
            .unwrap();
    }

    let drained_total = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let buffers = buffers.clone();
        let lock = lock.clone();
        let drained_total = drained_total.clone();
        let c = c.clone();
        handles.push(tokio::spawn(async move {
            let Some(guard) = lock.try_acquire(&c).await.unwrap() else {
                return;
            };
            let batch = buffers.drain(&c).await.unwrap();
            drained_total.fetch_add(batch.len(), Ordering::SeqCst);
            guard.release().await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(drained_total.load(Ordering::SeqCst), 10);
    assert_eq!(buffers.peek_length(&c).await.unwrap(), 0);
}
