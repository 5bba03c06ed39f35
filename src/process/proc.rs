use core::fmt;

use super::pid::{Pid, ProcRef};
use super::queue::Level;
use super::resources::{AddressSpace, FileHandle, Inode, KernelStack};
use crate::config::{NAME_LEN, NOFILE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unused,
    Embryo,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

impl State {
    /// States that hold exactly one priority queue slot.
    pub const fn is_queued(self) -> bool {
        matches!(
            self,
            State::Embryo | State::Runnable | State::Running | State::Sleeping
        )
    }

    pub(super) const fn label(self) -> &'static str {
        match self {
            State::Unused => "unused",
            State::Embryo => "embryo",
            State::Sleeping => "sleep ",
            State::Runnable => "runble",
            State::Running => "run   ",
            State::Zombie => "zombie",
        }
    }
}

/// What a sleeping process waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Children of this process changing state.
    Proc(ProcRef),
    /// The tick counter reaching this deadline.
    Timer(u64),
    /// Any other key agreed between sleeper and waker.
    Key(u64),
}

// fixed buffer so the lock-free dump never chases a pointer
#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) struct Name {
    bytes: [u8; NAME_LEN],
    len: u8,
}

impl Name {
    pub(super) const EMPTY: Name = Name {
        bytes: [0; NAME_LEN],
        len: 0,
    };

    // truncates on a char boundary
    pub(super) fn new(name: &str) -> Self {
        let mut end = name.len().min(NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0; NAME_LEN];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        Name {
            bytes,
            len: end as u8,
        }
    }

    pub(super) fn as_str(&self) -> &str {
        let len = (self.len as usize).min(NAME_LEN);
        core::str::from_utf8(&self.bytes[..len]).unwrap_or("???")
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

// Process control block. Every field is guarded by the table lock.
#[derive(Debug, Clone, Copy)]
pub(super) struct Proc {
    pub(super) pid: Pid,
    pub(super) state: State,
    pub(super) generation: u32,
    pub(super) priority: Level,
    // valid while state.is_queued()
    pub(super) queue_slot: Option<usize>,
    pub(super) parent: Option<ProcRef>,
    // meaningful while Sleeping
    pub(super) chan: Option<Channel>,
    pub(super) killed: bool,
    // ticks charged since the last dispatch
    pub(super) ticks: u32,

    pub(super) kstack: Option<KernelStack>,
    pub(super) vm: Option<AddressSpace>,
    pub(super) files: [Option<FileHandle>; NOFILE],
    pub(super) cwd: Option<Inode>,
    pub(super) name: Name,
}

impl Proc {
    pub(super) const UNUSED: Proc = Proc {
        pid: Pid::NONE,
        state: State::Unused,
        generation: 0,
        priority: Level::MID,
        queue_slot: None,
        parent: None,
        chan: None,
        killed: false,
        ticks: 0,
        kstack: None,
        vm: None,
        files: [None; NOFILE],
        cwd: None,
        name: Name::EMPTY,
    };

    pub(super) fn handle(&self, index: usize) -> ProcRef {
        ProcRef {
            index,
            generation: self.generation,
        }
    }

    // back to Unused; the generation survives so old handles stay stale
    pub(super) fn clear(&mut self) {
        let generation = self.generation;
        *self = Proc::UNUSED;
        self.generation = generation;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn name_truncates_on_char_boundary() {
        assert_eq!(Name::new("sh").as_str(), "sh");
        assert_eq!(Name::new("a-very-long-process-name").as_str(), "a-very-long-proc");
        // 'é' is two bytes; it would straddle the 16 byte limit
        assert_eq!(Name::new("aaaaaaaaaaaaaaaé").as_str(), "aaaaaaaaaaaaaaa");
    }

    #[test]
    fn clear_keeps_generation() {
        let mut proc = Proc::UNUSED;
        proc.generation = 7;
        proc.state = State::Zombie;
        proc.killed = true;
        proc.clear();
        assert_eq!(proc.generation, 7);
        assert_eq!(proc.state, State::Unused);
        assert!(!proc.killed);
    }

    #[test]
    fn queued_states() {
        assert!(State::Embryo.is_queued());
        assert!(State::Sleeping.is_queued());
        assert!(!State::Zombie.is_queued());
        assert!(!State::Unused.is_queued());
    }
}
