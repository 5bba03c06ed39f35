use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use super::pid::Pid;
use super::proc::State;
use super::queue::Level;
use super::table::Table;

/// Copy of one process table entry, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcInfo {
    pub pid: Pid,
    pub state: State,
    pub name: String,
    pub priority: Level,
    pub parent: Option<Pid>,
    pub killed: bool,
}

impl ProcInfo {
    pub(super) fn of(table: &Table, index: usize) -> Self {
        let proc = &table.procs[index];
        ProcInfo {
            pid: proc.pid,
            state: proc.state,
            name: proc.name.as_str().to_string(),
            priority: proc.priority,
            parent: proc
                .parent
                .and_then(|parent| table.resolve(parent))
                .map(|index| table.procs[index].pid),
            killed: proc.killed,
        }
    }
}

impl fmt::Display for ProcInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.pid,
            self.state.label(),
            self.name,
            self.priority
        )
    }
}

pub(super) fn snapshot(table: &Table) -> Vec<ProcInfo> {
    table
        .procs
        .iter()
        .enumerate()
        .filter(|(_, proc)| proc.state != State::Unused)
        .map(|(index, _)| ProcInfo::of(table, index))
        .collect()
}
