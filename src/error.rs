use core::fmt;

use crate::process::{Level, Pid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
    /// No Unused slot left in the process table.
    TableFull,
    /// A priority level had no free slot. Capacity makes this unreachable in a
    /// consistent table.
    QueueFull,
    NoSuchProcess,
    NoChildren,
    /// Level argument outside 0..NLEVELS.
    InvalidPriority,
    /// Kernel stack or address space could not be allocated.
    OutOfMemory,
    /// The caller was killed while waiting.
    Killed,
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ProcError::TableFull => "process table full",
            ProcError::QueueFull => "no free slot in priority queue",
            ProcError::NoSuchProcess => "no such process",
            ProcError::NoChildren => "no children",
            ProcError::InvalidPriority => "invalid priority level",
            ProcError::OutOfMemory => "out of memory",
            ProcError::Killed => "killed",
        };
        f.write_str(msg)
    }
}

/// First broken invariant found by [`crate::ProcessTable::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inconsistency {
    /// A queued-state process has no slot recorded.
    Unqueued { pid: Pid },
    /// An Unused or Zombie process still holds a slot.
    StrayQueueEntry { pid: Pid, level: Level, slot: usize },
    /// The slot recorded in the PCB does not point back at it.
    SlotMismatch { pid: Pid, level: Level, slot: usize },
    /// A process is referenced from more than one slot.
    DoubleQueued { pid: Pid },
    CountMismatch { level: Level, count: usize, occupied: usize },
    DuplicatePid { pid: Pid },
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::Unqueued { pid } => write!(f, "pid {} is not queued", pid),
            Inconsistency::StrayQueueEntry { pid, level, slot } => {
                write!(f, "pid {} left in queue {} slot {}", pid, level, slot)
            }
            Inconsistency::SlotMismatch { pid, level, slot } => {
                write!(f, "pid {} expects queue {} slot {} but it holds something else", pid, level, slot)
            }
            Inconsistency::DoubleQueued { pid } => write!(f, "pid {} queued twice", pid),
            Inconsistency::CountMismatch { level, count, occupied } => write!(
                f,
                "queue {} count is {} but {} slots are occupied",
                level, count, occupied
            ),
            Inconsistency::DuplicatePid { pid } => write!(f, "pid {} used by two slots", pid),
        }
    }
}
