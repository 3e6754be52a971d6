//! Recording a VM run statement by statement

use super::{Snapshot, SnapshotManager};
use crate::engine::Program;
use crate::runtime::{Status, Vm};

/// How a recorded run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `main` returned this value.
    Finished(i64),
    /// The VM stopped with a runtime error.
    Failed(String),
    /// The history filled up before the program finished.
    Truncated,
}

/// A recorded run with a cursor into its history.
#[derive(Debug)]
pub struct Trace {
    history: SnapshotManager,
    position: usize,
    outcome: Outcome,
}

fn is_statement_start(program: &Program, pc: usize) -> bool {
    program
        .lines()
        .binary_search_by_key(&pc, |entry| entry.offset)
        .is_ok()
}

impl Trace {
    /// Run `vm` to completion, taking a snapshot whenever it reaches the
    /// first instruction of a statement.
    pub fn record(program: &Program, mut vm: Vm, memory_limit: usize) -> Self {
        let mut history = SnapshotManager::new(memory_limit);
        let snapshot = |vm: &Vm| Snapshot {
            vm: vm.clone(),
            line: program.line_at(vm.pc()),
        };

        let outcome = if history.push(snapshot(&vm)).is_err() {
            Outcome::Truncated
        } else {
            loop {
                match vm.step() {
                    Ok(Status::Halted(value)) => {
                        history.push_final(snapshot(&vm));
                        break Outcome::Finished(value);
                    }
                    Ok(Status::Running) if is_statement_start(program, vm.pc()) => {
                        if let Err(full) = history.push(snapshot(&vm)) {
                            tracing::warn!(%full, "stopped recording");
                            break Outcome::Truncated;
                        }
                    }
                    Ok(Status::Running) => {}
                    Err(e) => break Outcome::Failed(e.to_string()),
                }
            }
        };
        tracing::debug!(
            snapshots = history.len(),
            bytes = history.memory_usage(),
            ?outcome,
            "recorded trace"
        );
        Trace {
            history,
            position: 0,
            outcome,
        }
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.history.get(self.position)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn at_end(&self) -> bool {
        self.position + 1 >= self.history.len()
    }

    pub fn history(&self) -> &SnapshotManager {
        &self.history
    }

    /// Returns false when already at the last snapshot.
    pub fn step_forward(&mut self) -> bool {
        if self.at_end() {
            return false;
        }
        self.position += 1;
        true
    }

    /// Returns false when already at the first snapshot.
    pub fn step_backward(&mut self) -> bool {
        if self.position == 0 {
            return false;
        }
        self.position -= 1;
        true
    }

    pub fn rewind_to_start(&mut self) {
        self.position = 0;
    }

    pub fn jump_to_end(&mut self) {
        self.position = self.history.len().saturating_sub(1);
    }
}
