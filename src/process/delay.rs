use alloc::{collections::BinaryHeap, vec::Vec};
use core::cmp::Reverse;
use log::trace;

use super::pid::ProcRef;

#[derive(Debug)]
struct Delay(ProcRef, Reverse<u64>);

impl PartialEq for Delay {
    fn eq(&self, other: &Self) -> bool {
        self.1.eq(&other.1)
    }
}

impl Eq for Delay {}

impl PartialOrd for Delay {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delay {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.1.cmp(&other.1)
    }
}

// Deadlines of processes sleeping on Channel::Timer, soonest on top.
// Entries outlive a kill or reap until the next prune, so whoever pops one
// checks the handle is still asleep on that same deadline.
#[derive(Debug, Default)]
pub(super) struct Delays {
    heap: BinaryHeap<Delay>,
}

impl Delays {
    pub(super) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub(super) fn add(&mut self, proc: ProcRef, deadline: u64) {
        let delay = Delay(proc, Reverse(deadline));
        trace!("[delay] added {:?}", delay);
        self.heap.push(delay)
    }

    pub(super) fn retain(&mut self, mut keep: impl FnMut(ProcRef, u64) -> bool) {
        self.heap.retain(|Delay(proc, Reverse(deadline))| keep(*proc, *deadline));
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.heap.len()
    }

    // (sleeper, deadline) pairs that are due at `now`
    pub(super) fn expired(&mut self, now: u64) -> Vec<(ProcRef, u64)> {
        let mut expired = Vec::new();
        while let Some(Delay(proc, Reverse(deadline))) = self.heap.peek() {
            if *deadline > now {
                break;
            }
            expired.push((*proc, *deadline));
            self.heap.pop();
        }

        if !expired.is_empty() {
            trace!("[delay] tick {}: expired {:?}", now, expired);
        }
        expired
    }

    pub(super) fn next_deadline(&self) -> Option<u64> {
        self.heap.peek().map(|Delay(_, Reverse(deadline))| *deadline)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn handle(index: usize) -> ProcRef {
        ProcRef {
            index,
            generation: 1,
        }
    }

    #[test]
    fn expires_in_deadline_order() {
        let mut delays = Delays::new();
        delays.add(handle(0), 30);
        delays.add(handle(1), 10);
        delays.add(handle(2), 20);
        assert_eq!(delays.next_deadline(), Some(10));

        assert!(delays.expired(9).is_empty());
        assert_eq!(delays.expired(20), [(handle(1), 10), (handle(2), 20)]);
        assert_eq!(delays.next_deadline(), Some(30));
        assert_eq!(delays.expired(100), [(handle(0), 30)]);
        assert_eq!(delays.next_deadline(), None);
    }
}
