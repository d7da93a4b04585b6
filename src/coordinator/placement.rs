//! Replica selection
//!
//! Stores go to a uniformly random subset of R joined storage nodes. Loads
//! are served from a uniformly random replica; a client's retry sequence
//! draws without replacement so a node that already failed it is never
//! offered again.

use crate::common::{Error, Result};
use crate::coordinator::membership::ConnId;
use rand::seq::SliceRandom;
use rand::Rng;

/// PlacementManager picks the storage nodes for new files.
#[derive(Debug, Clone)]
pub struct PlacementManager {
    /// Number of replicas per file
    replicas: usize,
}

impl PlacementManager {
    pub fn new(replicas: usize) -> Self {
        Self { replicas }
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Fail unless at least R storage nodes are joined.
    pub fn ensure_capacity(&self, available: usize) -> Result<()> {
        if available < self.replicas {
            return Err(Error::NotEnoughStorageNodes {
                needed: self.replicas,
                available,
            });
        }
        Ok(())
    }

    /// Select R distinct nodes from a membership snapshot.
    /// The returned order is the order announced to the client.
    pub fn select_nodes(&self, nodes: &[ConnId]) -> Result<Vec<ConnId>> {
        self.ensure_capacity(nodes.len())?;

        let mut selected = nodes.to_vec();
        selected.shuffle(&mut rand::thread_rng());
        selected.truncate(self.replicas);
        Ok(selected)
    }
}

/// A client's remaining load candidates for one file.
#[derive(Debug, Clone)]
pub struct LoadAttempt {
    filename: String,
    candidates: Vec<ConnId>,
}

impl LoadAttempt {
    pub fn new(filename: &str, replicas: &[ConnId]) -> Self {
        Self {
            filename: filename.to_string(),
            candidates: replicas.to_vec(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Drop every candidate matching `failed`.
    pub fn exclude(&mut self, mut failed: impl FnMut(ConnId) -> bool) {
        self.candidates.retain(|id| !failed(*id));
    }

    /// Remove and return a random remaining candidate.
    pub fn next_candidate(&mut self) -> Option<ConnId> {
        if self.candidates.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..self.candidates.len());
        Some(self.candidates.swap_remove(idx))
    }

    pub fn remaining(&self) -> usize {
        self.candidates.len()
    }
}
