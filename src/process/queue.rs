use core::fmt;

use crate::config::{NLEVELS, NPROC};
use crate::error::ProcError;

/// Priority level, 0 (most favored) to `NLEVELS - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Level(u8);

impl Level {
    pub const HIGH: Level = Level(0);
    pub const MID: Level = Level(1);
    pub const LOW: Level = Level(2);

    pub const ALL: [Level; NLEVELS] = [Level::HIGH, Level::MID, Level::LOW];

    pub fn new(level: u8) -> Result<Level, ProcError> {
        if (level as usize) < NLEVELS {
            Ok(Level(level))
        } else {
            Err(ProcError::InvalidPriority)
        }
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Next less favored level, or `None` at the bottom.
    pub fn lower(self) -> Option<Level> {
        Level::new(self.0 + 1).ok()
    }

    /// Levels strictly more favored than this one, best first.
    pub fn above(self) -> impl Iterator<Item = Level> {
        (0..self.0).map(Level)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// One slot array per level. A slot holds a process table index.
// Callers hold the table lock; nothing in here synchronizes.
#[derive(Debug)]
pub(super) struct QueueSet {
    slots: [[Option<usize>; NPROC]; NLEVELS],
    count: [usize; NLEVELS],
}

impl QueueSet {
    pub(super) const fn new() -> Self {
        Self {
            slots: [[None; NPROC]; NLEVELS],
            count: [0; NLEVELS],
        }
    }

    // earliest free slot wins
    pub(super) fn insert(&mut self, level: Level, proc_index: usize) -> Result<usize, ProcError> {
        let row = &mut self.slots[level.index()];
        let slot = row
            .iter()
            .position(Option::is_none)
            .ok_or(ProcError::QueueFull)?;
        row[slot] = Some(proc_index);
        self.count[level.index()] += 1;
        Ok(slot)
    }

    // returns what the slot held; the caller checks it against the PCB
    pub(super) fn remove(&mut self, level: Level, slot: usize) -> Option<usize> {
        let held = self.slots[level.index()][slot].take();
        if held.is_some() {
            self.count[level.index()] -= 1;
        }
        held
    }

    pub(super) fn get(&self, level: Level, slot: usize) -> Option<usize> {
        self.slots[level.index()][slot]
    }

    pub(super) fn count(&self, level: Level) -> usize {
        self.count[level.index()]
    }

    // (slot, process index) pairs in scan order
    pub(super) fn occupied(&self, level: Level) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.slots[level.index()]
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.map(|proc_index| (slot, proc_index)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn level_bounds() {
        assert_eq!(Level::new(2), Ok(Level::LOW));
        assert_eq!(Level::new(3), Err(ProcError::InvalidPriority));
        assert_eq!(Level::MID.lower(), Some(Level::LOW));
        assert_eq!(Level::LOW.lower(), None);
        assert!(Level::LOW.above().eq([Level::HIGH, Level::MID]));
        assert_eq!(Level::HIGH.above().count(), 0);
    }

    #[test]
    fn insert_reuses_earliest_free_slot() {
        let mut queues = QueueSet::new();
        assert_eq!(queues.insert(Level::MID, 10), Ok(0));
        assert_eq!(queues.insert(Level::MID, 11), Ok(1));
        assert_eq!(queues.insert(Level::MID, 12), Ok(2));
        assert_eq!(queues.remove(Level::MID, 1), Some(11));
        assert_eq!(queues.count(Level::MID), 2);
        assert_eq!(queues.insert(Level::MID, 13), Ok(1));
        assert_eq!(queues.count(Level::MID), 3);
        assert_eq!(queues.count(Level::HIGH), 0);
    }

    #[test]
    fn full_level_is_an_error() {
        let mut queues = QueueSet::new();
        for i in 0..NPROC {
            queues.insert(Level::LOW, i).unwrap();
        }
        assert_eq!(queues.insert(Level::LOW, 0), Err(ProcError::QueueFull));
        assert_eq!(queues.insert(Level::HIGH, 0), Ok(0));
    }

    #[test]
    fn removing_an_empty_slot_leaves_count_alone() {
        let mut queues = QueueSet::new();
        queues.insert(Level::HIGH, 4).unwrap();
        assert_eq!(queues.remove(Level::HIGH, 5), None);
        assert_eq!(queues.count(Level::HIGH), 1);
        assert!(queues.occupied(Level::HIGH).eq([(0, 4)]));
    }
}
