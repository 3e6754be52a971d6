// Snapshot history for stepping backward through a VM run

mod trace;

pub use trace::{Outcome, Trace};

use crate::runtime::Vm;

/// VM state at the start of one statement.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub vm: Vm,
    /// Source line of the statement about to run, if the pc maps to one.
    pub line: Option<usize>,
}

impl Snapshot {
    /// Estimate the memory usage of this snapshot in bytes
    pub fn estimated_size(&self) -> usize {
        self.vm.footprint()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("snapshot memory limit exceeded: {used} + {size} > {limit}")]
pub struct HistoryFull {
    pub used: usize,
    pub size: usize,
    pub limit: usize,
}

/// Bounded execution history
#[derive(Debug)]
pub struct SnapshotManager {
    snapshots: Vec<Snapshot>,
    max_memory: usize,
    current_memory: usize,
}

impl SnapshotManager {
    pub fn new(max_memory: usize) -> Self {
        SnapshotManager {
            snapshots: Vec::new(),
            max_memory,
            current_memory: 0,
        }
    }

    /// Add a snapshot to history, refusing it once the limit would be passed.
    pub fn push(&mut self, snapshot: Snapshot) -> Result<(), HistoryFull> {
        let size = snapshot.estimated_size();
        if self.current_memory + size > self.max_memory {
            return Err(HistoryFull {
                used: self.current_memory,
                size,
                limit: self.max_memory,
            });
        }
        self.current_memory += size;
        self.snapshots.push(snapshot);
        Ok(())
    }

    /// Add the closing snapshot of a run. It is kept even past the limit,
    /// so a finished run always shows its final state.
    pub fn push_final(&mut self, snapshot: Snapshot) {
        let size = snapshot.estimated_size();
        if self.current_memory + size > self.max_memory {
            tracing::debug!(
                used = self.current_memory,
                size,
                limit = self.max_memory,
                "final snapshot exceeds the history limit"
            );
        }
        self.current_memory += size;
        self.snapshots.push(snapshot);
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn memory_limit(&self) -> usize {
        self.max_memory
    }
}
