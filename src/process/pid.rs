use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

// pids start at 1; 0 marks an Unused slot
#[derive(Debug)]
pub(super) struct PidCounter(AtomicU32);

impl PidCounter {
    pub(super) const fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    #[cfg(test)]
    pub(super) const fn starting_at(pid: u32) -> Self {
        Self(AtomicU32::new(pid))
    }

    // wraps around past u32::MAX, never handing out 0
    pub(super) fn next(&self) -> Pid {
        loop {
            let pid = self.0.fetch_add(1, Ordering::Relaxed);
            if pid != 0 {
                return Pid(pid);
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct Pid(pub(super) u32);

impl Pid {
    pub(super) const NONE: Pid = Pid(0);

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Pid from a syscall argument. Zero and negatives never name a process.
    pub fn from_raw(raw: i64) -> Option<Pid> {
        u32::try_from(raw).ok().filter(|&pid| pid != 0).map(Pid)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a process table slot.
///
/// Slots are reused, so the handle carries the generation it was issued for.
/// A handle whose generation no longer matches, or whose slot went back to
/// Unused, resolves to nothing.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct ProcRef {
    pub(super) index: usize,
    pub(super) generation: u32,
}

impl ProcRef {
    pub const fn index(self) -> usize {
        self.index
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pids_are_monotonic_from_one() {
        let counter = PidCounter::new();
        assert_eq!(counter.next(), Pid(1));
        assert_eq!(counter.next(), Pid(2));
        assert_eq!(counter.next(), Pid(3));
    }

    #[test]
    fn counter_wraps_past_zero() {
        let counter = PidCounter::starting_at(u32::MAX);
        assert_eq!(counter.next(), Pid(u32::MAX));
        assert_eq!(counter.next(), Pid(1));
    }

    #[test]
    fn raw_pid_rejects_zero_and_negative() {
        assert_eq!(Pid::from_raw(0), None);
        assert_eq!(Pid::from_raw(-3), None);
        assert_eq!(Pid::from_raw(i64::from(u32::MAX) + 1), None);
        assert_eq!(Pid::from_raw(7), Some(Pid(7)));
    }
}
