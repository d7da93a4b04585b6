//! File index: filename → replication state
//!
//! Stores, per filename:
//! - status (storing, stored, removing) with the in-flight operation's
//!   pending acknowledgements and waiting requester
//! - the storage nodes holding (or about to hold) the bytes
//! - the declared size
//!
//! The index is safe for concurrent access, but every mutation of a given
//! filename's record happens while holding that filename's lock.

use crate::common::{Error, Result};
use crate::coordinator::membership::{ConnId, Peer};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

/// Identity of one store or remove operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(u64);

impl OpId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        OpId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// An operation waiting for storage-node acknowledgements.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub op: OpId,
    pub pending_acks: usize,
    pub requester: Peer,
    pub started_at: Instant,
}

impl InFlight {
    fn new(pending_acks: usize, requester: Peer) -> Self {
        Self {
            op: OpId::next(),
            pending_acks,
            requester,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FileStatus {
    Storing(InFlight),
    Stored,
    Removing(InFlight),
}

impl FileStatus {
    pub fn name(&self) -> &'static str {
        match self {
            FileStatus::Storing(_) => "storing",
            FileStatus::Stored => "stored",
            FileStatus::Removing(_) => "removing",
        }
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        match self {
            FileStatus::Storing(op) | FileStatus::Removing(op) => Some(op),
            FileStatus::Stored => None,
        }
    }
}

/// Which acknowledgement arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Store,
    Remove,
}

/// Result of applying one acknowledgement to a record.
#[derive(Debug)]
pub enum AckOutcome {
    /// Still waiting for this many acknowledgements.
    Pending(usize),
    /// Last store acknowledgement: the record is now stored.
    Stored(Peer),
    /// Last remove acknowledgement: the caller deletes the record.
    Removed(Peer),
    /// The record is not waiting for this kind of acknowledgement.
    Stray,
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub filename: String,
    pub status: FileStatus,
    pub replicas: Vec<ConnId>,
    pub size: u64,
}

impl FileRecord {
    /// A new record for an accepted store, waiting on one ack per replica.
    pub fn storing(filename: String, replicas: Vec<ConnId>, size: u64, requester: Peer) -> Self {
        let status = FileStatus::Storing(InFlight::new(replicas.len(), requester));
        Self {
            filename,
            status,
            replicas,
            size,
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self.status, FileStatus::Stored)
    }

    /// Stored → Removing, waiting on one ack per current replica.
    pub fn begin_remove(&mut self, requester: Peer) -> Result<OpId> {
        match self.status {
            FileStatus::Stored => {
                let op = InFlight::new(self.replicas.len(), requester);
                let id = op.op;
                self.status = FileStatus::Removing(op);
                Ok(id)
            }
            FileStatus::Storing(_) | FileStatus::Removing(_) => {
                Err(Error::FileDoesNotExist(self.filename.clone()))
            }
        }
    }

    /// Count one acknowledgement, transitioning when the count hits zero.
    pub fn ack(&mut self, kind: AckKind) -> AckOutcome {
        let op = match (&mut self.status, kind) {
            (FileStatus::Storing(op), AckKind::Store) => op,
            (FileStatus::Removing(op), AckKind::Remove) => op,
            (FileStatus::Storing(_), AckKind::Remove)
            | (FileStatus::Removing(_), AckKind::Store)
            | (FileStatus::Stored, _) => return AckOutcome::Stray,
        };

        op.pending_acks = op.pending_acks.saturating_sub(1);
        if op.pending_acks > 0 {
            return AckOutcome::Pending(op.pending_acks);
        }

        let requester = op.requester.clone();
        match kind {
            AckKind::Store => {
                self.status = FileStatus::Stored;
                AckOutcome::Stored(requester)
            }
            AckKind::Remove => AckOutcome::Removed(requester),
        }
    }
}

/// Concurrent filename → record map.
#[derive(Debug, Default)]
pub struct FileIndex {
    files: DashMap<String, FileRecord>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.files.contains_key(filename)
    }

    /// Snapshot of one record.
    pub fn get(&self, filename: &str) -> Option<FileRecord> {
        self.files.get(filename).map(|entry| entry.value().clone())
    }

    /// Snapshot of a record that is visible to readers.
    pub fn get_stored(&self, filename: &str) -> Result<FileRecord> {
        self.get(filename)
            .filter(FileRecord::is_stored)
            .ok_or_else(|| Error::FileDoesNotExist(filename.to_string()))
    }

    pub fn insert(&self, record: FileRecord) {
        self.files.insert(record.filename.clone(), record);
    }

    pub fn remove(&self, filename: &str) -> Option<FileRecord> {
        self.files.remove(filename).map(|(_, record)| record)
    }

    /// Mutate one record in place.
    pub fn update<R>(&self, filename: &str, f: impl FnOnce(&mut FileRecord) -> R) -> Option<R> {
        self.files.get_mut(filename).map(|mut entry| f(entry.value_mut()))
    }

    /// Filenames currently stored, sorted.
    pub fn stored_files(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .iter()
            .filter(|entry| entry.is_stored())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Drop a departed storage node from every replica set.
    ///
    /// Pending acknowledgement counts are left untouched.
    pub fn strip_replica(&self, node: ConnId) -> usize {
        let mut stripped = 0;
        for mut entry in self.files.iter_mut() {
            let before = entry.replicas.len();
            entry.replicas.retain(|id| *id != node);
            if entry.replicas.len() != before {
                stripped += 1;
            }
        }
        stripped
    }
}
