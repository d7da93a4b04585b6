//! Deadline scheduler for in-flight operations
//!
//! Store and remove operations register an [`Expiry`] when they are
//! accepted. A single background task keeps the deadlines in a min-heap and
//! hands each expired entry back to the coordinator, which applies it under
//! the file's lock like any other command. Entries are never cancelled: an
//! expiry for an operation that already completed is recognised as stale by
//! its [`OpId`] and ignored.

use crate::coordinator::metadata::OpId;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryKind {
    Store,
    Remove,
}

/// An operation that must reach quorum before its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    pub filename: String,
    pub op: OpId,
    pub kind: ExpiryKind,
}

/// Registers deadlines with the scheduler task.
#[derive(Debug, Clone)]
pub struct TimeoutHandle {
    tx: mpsc::UnboundedSender<(Instant, Expiry)>,
    timeout: Duration,
}

impl TimeoutHandle {
    /// Arm a deadline `timeout` from now.
    pub fn schedule(&self, expiry: Expiry) {
        let deadline = Instant::now() + self.timeout;
        if self.tx.send((deadline, expiry)).is_err() {
            tracing::error!("Timeout scheduler is gone, operation will never expire");
        }
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    expiry: Expiry,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// The scheduler task's state.
pub struct TimeoutScheduler {
    rx: mpsc::UnboundedReceiver<(Instant, Expiry)>,
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
}

/// Create a connected handle/scheduler pair.
pub fn channel(timeout: Duration) -> (TimeoutHandle, TimeoutScheduler) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        TimeoutHandle { tx, timeout },
        TimeoutScheduler {
            rx,
            heap: BinaryHeap::new(),
            seq: 0,
        },
    )
}

impl TimeoutScheduler {
    /// Run until every handle is dropped, calling `on_expiry` for each
    /// deadline that passes.
    pub async fn run(mut self, mut on_expiry: impl FnMut(Expiry)) {
        loop {
            let next = self.heap.peek().map(|Reverse(entry)| entry.deadline);
            let wait = async move {
                match next {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some((deadline, expiry)) => {
                        self.seq += 1;
                        self.heap.push(Reverse(Entry { deadline, seq: self.seq, expiry }));
                    }
                    None => break,
                },
                _ = wait => {
                    let now = Instant::now();
                    while let Some(Reverse(entry)) = self.heap.peek() {
                        if entry.deadline > now {
                            break;
                        }
                        if let Some(Reverse(entry)) = self.heap.pop() {
                            on_expiry(entry.expiry);
                        }
                    }
                }
            }
        }
        tracing::debug!(pending = self.heap.len(), "Timeout scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expiry(name: &str) -> Expiry {
        Expiry {
            filename: name.to_string(),
            op: OpId::next(),
            kind: ExpiryKind::Store,
        }
    }

    #[tokio::test]
    async fn test_expiries_fire_in_deadline_order() {
        let (handle, scheduler) = channel(Duration::from_millis(30));
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
        tokio::spawn(scheduler.run(move |e| {
            let _ = fired_tx.send(e.filename);
        }));

        handle.schedule(expiry("a"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.schedule(expiry("b"));

        assert_eq!(fired_rx.recv().await.unwrap(), "a");
        assert_eq!(fired_rx.recv().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_expiry_waits_for_deadline() {
        let (handle, scheduler) = channel(Duration::from_millis(100));
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
        tokio::spawn(scheduler.run(move |e| {
            let _ = fired_tx.send(e);
        }));

        let start = Instant::now();
        let e = expiry("f");
        handle.schedule(e.clone());
        assert_eq!(fired_rx.recv().await.unwrap(), e);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_scheduler_stops_when_handles_drop() {
        let (handle, scheduler) = channel(Duration::from_millis(10));
        let task = tokio::spawn(scheduler.run(|_| {}));
        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
