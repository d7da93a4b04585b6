//! Per-filename mutual exclusion
//!
//! One async mutex per filename, created on first use and discarded when
//! the file's record goes away. Operations on different filenames never
//! contend.
//!
//! A waiter may wake up holding a mutex that was discarded while it slept;
//! `acquire` re-checks that the mutex it holds is still the registered one
//! and retries otherwise, so two holders of the same filename never coexist.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct FileLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `filename`.
    pub async fn acquire(&self, filename: &str) -> FileGuard<'_> {
        loop {
            let lock = self
                .locks
                .entry(filename.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value()
                .clone();

            let guard = lock.clone().lock_owned().await;

            let registered = self
                .locks
                .get(filename)
                .map(|entry| Arc::ptr_eq(entry.value(), &lock))
                .unwrap_or(false);

            if registered {
                return FileGuard {
                    locks: self,
                    filename: filename.to_string(),
                    lock,
                    _guard: guard,
                };
            }
            tracing::trace!(filename, "File lock discarded while waiting, retrying");
        }
    }

    /// Number of filenames with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one filename; released on drop.
pub struct FileGuard<'a> {
    locks: &'a FileLocks,
    filename: String,
    lock: Arc<Mutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl FileGuard<'_> {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Release the lock and drop its registry entry.
    pub fn discard(self) {
        self.locks
            .locks
            .remove_if(&self.filename, |_, lock| Arc::ptr_eq(lock, &self.lock));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_file_is_exclusive() {
        let locks = Arc::new(FileLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("f").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_files_do_not_contend() {
        let locks = FileLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_discard_removes_entry() {
        let locks = FileLocks::new();
        let guard = locks.acquire("f").await;
        assert_eq!(guard.filename(), "f");
        guard.discard();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_survives_discard() {
        let locks = Arc::new(FileLocks::new());
        let guard = locks.acquire("f").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let guard = locks.acquire("f").await;
                drop(guard);
                locks.len()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        guard.discard();

        // The waiter re-registers a fresh lock for "f".
        assert_eq!(waiter.await.unwrap(), 1);
    }
}
