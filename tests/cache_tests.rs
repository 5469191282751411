//! Memoization Cache Tests
//!
//! Concurrency behavior of [`MemoCache`]: at most one build per
//! fingerprint under contention, and shared artifacts across threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Barrier;

use lensflare::cache::MemoCache;

#[test]
fn racing_callers_build_once_and_share_the_artifact() {
    let cache: Arc<MemoCache<Vec<u64>>> = Arc::new(MemoCache::new(4));
    let builds = Arc::new(AtomicU32::new(0));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let builds = Arc::clone(&builds);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_try_insert_with(42, || {
                        builds.fetch_add(1, Ordering::SeqCst);
                        // widen the race window
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        Ok((0..1024).collect())
                    })
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<Arc<Vec<u64>>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(builds.load(Ordering::SeqCst), 1, "exactly one build");
    for pair in results.windows(2) {
        assert!(Arc::ptr_eq(&pair[0], &pair[1]), "all callers share one Arc");
    }
}

#[test]
fn distinct_keys_build_independently() {
    let cache: Arc<MemoCache<u64>> = Arc::new(MemoCache::new(16));
    let handles: Vec<_> = (0..8u64)
        .map(|key| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || *cache.get_or_try_insert_with(key, || Ok(key * 10)).unwrap())
        })
        .collect();
    let mut results: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    results.sort_unstable();
    assert_eq!(results, vec![0, 10, 20, 30, 40, 50, 60, 70]);
}
