//! Replication state machine
//!
//! `CoordState` owns the membership registry, the file index, the per-file
//! locks and the deadline scheduler handle. Every command touching a file
//! runs its checks and transitions while holding that file's lock; the
//! locked sections are synchronous, since replies and instructions are
//! queued on unbounded per-connection channels.

use crate::common::{validate_filename, CoordinatorConfig, Error, Reply, Request, Result};
use crate::coordinator::locks::{FileGuard, FileLocks};
use crate::coordinator::membership::{ConnId, Membership, Peer};
use crate::coordinator::metadata::{AckKind, AckOutcome, FileIndex, FileRecord};
use crate::coordinator::placement::{LoadAttempt, PlacementManager};
use crate::coordinator::timeout::{self, Expiry, ExpiryKind, TimeoutHandle};
use std::sync::Arc;

/// State owned by one connection's task.
#[derive(Debug)]
pub struct Session {
    peer: Peer,
    load: Option<LoadAttempt>,
}

impl Session {
    pub fn new(peer: Peer) -> Self {
        Self { peer, load: None }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn id(&self) -> ConnId {
        self.peer.id
    }
}

pub struct CoordState {
    config: CoordinatorConfig,
    placement: PlacementManager,
    membership: Membership,
    index: FileIndex,
    locks: FileLocks,
    timeouts: TimeoutHandle,
}

impl CoordState {
    /// Build the state and spawn its deadline scheduler.
    ///
    /// The scheduler only holds a weak reference and stops once the state
    /// is dropped.
    pub fn start(config: CoordinatorConfig) -> Arc<Self> {
        let (timeouts, scheduler) = timeout::channel(config.timeout());
        let state = Arc::new(Self {
            placement: PlacementManager::new(config.replication_factor),
            config,
            membership: Membership::new(),
            index: FileIndex::new(),
            locks: FileLocks::new(),
            timeouts,
        });

        let weak = Arc::downgrade(&state);
        tokio::spawn(scheduler.run(move |expiry| {
            if let Some(state) = weak.upgrade() {
                tokio::spawn(async move { state.expire(expiry).await });
            }
        }));

        state
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Number of joined storage nodes.
    pub fn storage_nodes(&self) -> usize {
        self.membership.count()
    }

    /// Snapshot of a file's record, whatever its status.
    pub fn file(&self, filename: &str) -> Option<FileRecord> {
        self.index.get(filename)
    }

    /// Number of filenames with a live lock.
    pub fn lock_entries(&self) -> usize {
        self.locks.len()
    }

    /// Apply one request. `Ok(None)` means nothing is sent back right away.
    pub async fn handle(&self, session: &mut Session, request: Request) -> Result<Option<Reply>> {
        if !matches!(request, Request::Reload { .. }) {
            session.load = None;
        }

        match request {
            Request::Join { port } => {
                self.membership.join(&session.peer, port);
                tracing::info!(conn = %session.id(), port, "Storage node joined");
                Ok(Some(Reply::Ack))
            }
            Request::Store { filename, size } => {
                validate_filename(&filename)?;
                let guard = self.locks.acquire(&filename).await;
                let result = self.store_locked(&session.peer, &filename, size);
                self.release(guard);
                result.map(Some)
            }
            Request::StoreAck { filename } => {
                self.ack(&filename, AckKind::Store).await;
                Ok(None)
            }
            Request::Load { filename } => {
                let guard = self.locks.acquire(&filename).await;
                let result = self.load_locked(session, &filename);
                self.release(guard);
                result.map(Some)
            }
            Request::Reload {
                filename,
                failed_port,
            } => {
                let guard = self.locks.acquire(&filename).await;
                let result = self.reload_locked(session, &filename, failed_port);
                self.release(guard);
                result.map(Some)
            }
            Request::Remove { filename } => {
                let guard = self.locks.acquire(&filename).await;
                let result = self.remove_locked(&session.peer, &filename);
                self.release(guard);
                result.map(|_| None)
            }
            Request::RemoveAck { filename } => {
                self.ack(&filename, AckKind::Remove).await;
                Ok(None)
            }
            Request::RemoveMissing { filename } => {
                tracing::debug!(filename = %filename, conn = %session.id(), "Storage node did not hold file");
                self.ack(&filename, AckKind::Remove).await;
                Ok(None)
            }
            Request::List => {
                self.placement.ensure_capacity(self.membership.count())?;
                Ok(Some(Reply::List(self.index.stored_files())))
            }
        }
    }

    /// Forget a closed connection. A departed storage node is dropped from
    /// every replica set; pending acknowledgement counts are not adjusted.
    pub fn disconnect(&self, session: &Session) {
        if let Some(node) = self.membership.leave(session.id()) {
            let stripped = self.index.strip_replica(session.id());
            tracing::info!(
                conn = %session.id(),
                port = node.port,
                files = stripped,
                "Storage node disconnected"
            );
        }
    }

    /// Abort an operation that missed its deadline. The requester is not
    /// notified.
    pub async fn expire(&self, expiry: Expiry) {
        let guard = self.locks.acquire(&expiry.filename).await;

        let current = self.index.get(&expiry.filename).and_then(|record| {
            record
                .status
                .in_flight()
                .map(|op| (op.op, op.pending_acks, op.started_at))
        });

        if let Some((op, pending, started_at)) = current {
            if op == expiry.op {
                self.index.remove(&expiry.filename);
                tracing::warn!(
                    filename = %expiry.filename,
                    op = %expiry.op,
                    kind = ?expiry.kind,
                    pending,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Timeout expired before quorum, operation abandoned"
                );
            }
        }

        self.release(guard);
    }

    /// Drop the lock entry along with the guard once the file has no record.
    fn release(&self, guard: FileGuard<'_>) {
        if !self.index.contains(guard.filename()) {
            guard.discard();
        }
    }

    fn store_locked(&self, client: &Peer, filename: &str, size: u64) -> Result<Reply> {
        if let Some(record) = self.index.get(filename) {
            tracing::debug!(filename, status = record.status.name(), "File already exists");
            return Err(Error::FileAlreadyExists(filename.to_string()));
        }

        self.placement.ensure_capacity(self.membership.count())?;
        let selected = self.placement.select_nodes(&self.membership.snapshot())?;

        // A selected node may have left since the snapshot.
        let ports: Vec<u16> = selected
            .iter()
            .filter_map(|id| self.membership.port_of(*id))
            .collect();
        if ports.len() < self.placement.replicas() {
            return Err(Error::NotEnoughStorageNodes {
                needed: self.placement.replicas(),
                available: ports.len(),
            });
        }

        let record = FileRecord::storing(filename.to_string(), selected, size, client.clone());
        let op = record
            .status
            .in_flight()
            .map(|op| op.op)
            .ok_or_else(|| Error::Other("new record has no operation".into()))?;
        self.index.insert(record);
        self.timeouts.schedule(Expiry {
            filename: filename.to_string(),
            op,
            kind: ExpiryKind::Store,
        });

        tracing::info!(filename, size, ports = ?ports, "Storing file");
        Ok(Reply::StoreTo(ports))
    }

    async fn ack(&self, filename: &str, kind: AckKind) {
        let guard = self.locks.acquire(filename).await;
        self.ack_locked(filename, kind);
        self.release(guard);
    }

    fn ack_locked(&self, filename: &str, kind: AckKind) {
        match self.index.update(filename, |record| record.ack(kind)) {
            None => {
                tracing::warn!(filename, kind = ?kind, "Acknowledgement for unknown file ignored");
            }
            Some(AckOutcome::Stray) => {
                tracing::warn!(filename, kind = ?kind, "Unexpected acknowledgement ignored");
            }
            Some(AckOutcome::Pending(remaining)) => {
                tracing::debug!(filename, kind = ?kind, remaining, "Acknowledgement counted");
            }
            Some(AckOutcome::Stored(requester)) => {
                tracing::info!(filename, "Store complete");
                if !requester.send(Reply::StoreComplete) {
                    tracing::warn!(filename, conn = %requester.id, "Could not send STORE_COMPLETE to client");
                }
            }
            Some(AckOutcome::Removed(requester)) => {
                self.index.remove(filename);
                tracing::info!(filename, "Remove complete");
                if !requester.send(Reply::RemoveComplete) {
                    tracing::warn!(filename, conn = %requester.id, "Could not send REMOVE_COMPLETE to client");
                }
            }
        }
    }

    fn load_locked(&self, session: &mut Session, filename: &str) -> Result<Reply> {
        self.placement.ensure_capacity(self.membership.count())?;
        let record = self.index.get_stored(filename)?;

        let mut attempt = LoadAttempt::new(filename, &record.replicas);
        let reply = self.next_load_source(&mut attempt, record.size);
        session.load = Some(attempt);
        reply
    }

    fn reload_locked(&self, session: &mut Session, filename: &str, failed_port: u16) -> Result<Reply> {
        let record = self.index.get_stored(filename)?;

        let mut attempt = match session.load.take() {
            Some(attempt) if attempt.filename() == filename => attempt,
            _ => LoadAttempt::new(filename, &record.replicas),
        };
        attempt.exclude(|id| self.membership.port_of(id) == Some(failed_port));

        let reply = self.next_load_source(&mut attempt, record.size);
        session.load = Some(attempt);
        reply
    }

    /// Draw candidates until one is still joined.
    fn next_load_source(&self, attempt: &mut LoadAttempt, size: u64) -> Result<Reply> {
        while let Some(id) = attempt.next_candidate() {
            if let Some(port) = self.membership.port_of(id) {
                tracing::debug!(filename = attempt.filename(), port, "Serving load");
                return Ok(Reply::LoadFrom { port, size });
            }
        }
        Err(Error::LoadExhausted(attempt.filename().to_string()))
    }

    fn remove_locked(&self, client: &Peer, filename: &str) -> Result<()> {
        self.placement.ensure_capacity(self.membership.count())?;

        let (op, replicas) = self
            .index
            .update(filename, |record| {
                record
                    .begin_remove(client.clone())
                    .map(|op| (op, record.replicas.clone()))
            })
            .unwrap_or_else(|| Err(Error::FileDoesNotExist(filename.to_string())))?;

        if replicas.is_empty() {
            self.index.remove(filename);
            tracing::info!(filename, "Remove complete, no replicas left");
            client.send(Reply::RemoveComplete);
            return Ok(());
        }

        for id in &replicas {
            if !self.membership.send(*id, Reply::Remove(filename.to_string())) {
                tracing::warn!(filename, node = %id, "Could not forward REMOVE to storage node");
            }
        }

        self.timeouts.schedule(Expiry {
            filename: filename.to_string(),
            op,
            kind: ExpiryKind::Remove,
        });

        tracing::info!(filename, replicas = replicas.len(), "Removing file");
        Ok(())
    }
}
