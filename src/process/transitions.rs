//! Moving processes between priority levels.

use log::{debug, error, info};

use super::pid::Pid;
use super::queue::Level;
use super::table::Table;
use crate::config::NPROC;
use crate::error::ProcError;

impl Table {
    // clears `slot` at `level`, which must hold `index`
    fn unlink(&mut self, level: Level, slot: usize, index: usize) {
        match self.queues.remove(level, slot) {
            Some(held) if held == index => {}
            held => {
                error!(
                    "pid {}: queue {} slot {} holds {:?}, expected {}",
                    self.procs[index].pid, level, slot, held, index
                );
                panic!("queue {} slot {} does not reference its process", level, slot);
            }
        }
    }

    /// Requeues process `index` at `level`, keeping its PCB in step.
    ///
    /// The new slot is claimed before the old one is released, so on
    /// `QueueFull` the process stays where it was.
    pub(super) fn move_to(&mut self, index: usize, level: Level) -> Result<(), ProcError> {
        let proc = &self.procs[index];
        let from = proc.priority;
        let Some(old_slot) = proc.queue_slot else {
            error!("move_to: pid {} ({:?}) holds no queue slot", proc.pid, proc.state);
            panic!("move_to: pid {} is not queued", proc.pid);
        };

        let new_slot = self.queues.insert(level, index)?;
        self.unlink(from, old_slot, index);

        let proc = &mut self.procs[index];
        proc.priority = level;
        proc.queue_slot = Some(new_slot);
        debug!(
            "pid {}: queue {}[{}] -> queue {}[{}]",
            proc.pid, from, old_slot, level, new_slot
        );
        Ok(())
    }

    /// One level down, unless already at the bottom. Reports whether it moved.
    pub(super) fn demote(&mut self, index: usize) -> Result<bool, ProcError> {
        match self.procs[index].priority.lower() {
            Some(level) => self.move_to(index, level).map(|()| true),
            None => Ok(false),
        }
    }

    /// Finds `pid` by scanning the queues and moves it to `level`. Reports
    /// whether a move happened; asking for the current level is a no-op.
    pub(super) fn renice(&mut self, pid: Pid, level: Level) -> Result<bool, ProcError> {
        let found = Level::ALL.into_iter().find_map(|at| {
            self.queues
                .occupied(at)
                .find(|&(_, index)| self.procs[index].pid == pid)
                .map(|(_, index)| (at, index))
        });
        let Some((at, index)) = found else {
            return Err(ProcError::NoSuchProcess);
        };

        if at == level {
            return Ok(false);
        }
        self.move_to(index, level)?;
        Ok(true)
    }

    /// Lifts everything queued below the top level to the top level,
    /// sleepers included. Returns how many processes moved.
    pub(super) fn boost_all(&mut self) -> Result<usize, ProcError> {
        let mut moved = 0;
        for level in [Level::MID, Level::LOW] {
            for slot in 0..NPROC {
                if let Some(index) = self.queues.get(level, slot) {
                    self.move_to(index, Level::HIGH)?;
                    moved += 1;
                }
            }
        }
        if moved > 0 {
            info!("boost: {} processes lifted to queue {}", moved, Level::HIGH);
        }
        Ok(moved)
    }

    /// Drops process `index` from its queue ahead of it becoming a zombie.
    pub(super) fn remove_on_exit(&mut self, index: usize) {
        let proc = &self.procs[index];
        let level = proc.priority;
        let Some(slot) = proc.queue_slot else {
            error!("remove_on_exit: pid {} holds no queue slot", proc.pid);
            panic!("remove_on_exit: pid {} is not queued", proc.pid);
        };
        self.unlink(level, slot, index);
        self.procs[index].queue_slot = None;
    }
}

#[cfg(test)]
mod test {
    use crate::process::pid::ProcRef;
    use crate::process::proc::State;
    use crate::process::table::Table;
    use crate::process::queue::Level;
    use crate::error::ProcError;

    fn runnable(table: &mut Table) -> ProcRef {
        let proc = table.allocate().unwrap();
        table.get_mut(proc).unwrap().state = State::Runnable;
        proc
    }

    fn level_of(table: &Table, proc: ProcRef) -> Level {
        table.get(proc).unwrap().priority
    }

    #[test]
    fn demotion_stops_at_the_bottom() {
        let mut table = Table::new();
        let proc = runnable(&mut table);
        assert_eq!(table.demote(proc.index), Ok(true));
        assert_eq!(level_of(&table, proc), Level::LOW);
        assert_eq!(table.demote(proc.index), Ok(false));
        assert_eq!(table.demote(proc.index), Ok(false));
        assert_eq!(level_of(&table, proc), Level::LOW);
        assert_eq!(table.queues.count(Level::LOW), 1);
        assert_eq!(table.queues.count(Level::MID), 0);
        table.assert_consistent();
    }

    #[test]
    fn renice_twice_moves_once() {
        let mut table = Table::new();
        let proc = runnable(&mut table);
        let pid = table.get(proc).unwrap().pid;

        assert_eq!(table.renice(pid, Level::HIGH), Ok(true));
        assert_eq!(table.queues.count(Level::HIGH), 1);
        let slot = table.get(proc).unwrap().queue_slot;

        assert_eq!(table.renice(pid, Level::HIGH), Ok(false));
        assert_eq!(table.queues.count(Level::HIGH), 1);
        assert_eq!(table.get(proc).unwrap().queue_slot, slot);
        table.assert_consistent();
    }

    #[test]
    fn renice_skips_zombies() {
        let mut table = Table::new();
        let proc = runnable(&mut table);
        let pid = table.get(proc).unwrap().pid;
        table.remove_on_exit(proc.index);
        table.get_mut(proc).unwrap().state = State::Zombie;
        assert_eq!(table.renice(pid, Level::HIGH), Err(ProcError::NoSuchProcess));
    }

    #[test]
    fn boost_lifts_sleepers_too() {
        let mut table = Table::new();
        let a = runnable(&mut table);
        let b = runnable(&mut table);
        let c = runnable(&mut table);
        table.demote(b.index).unwrap();
        table.get_mut(c).unwrap().state = State::Sleeping;

        assert_eq!(table.boost_all(), Ok(3));
        for proc in [a, b, c] {
            assert_eq!(level_of(&table, proc), Level::HIGH);
        }
        assert_eq!(table.queues.count(Level::HIGH), 3);
        assert_eq!(table.get(c).unwrap().state, State::Sleeping);
        assert_eq!(table.boost_all(), Ok(0));
        table.assert_consistent();
    }

    #[test]
    fn remove_on_exit_frees_the_slot() {
        let mut table = Table::new();
        let a = runnable(&mut table);
        let b = runnable(&mut table);
        table.remove_on_exit(a.index);
        table.get_mut(a).unwrap().state = State::Zombie;
        assert_eq!(table.queues.count(Level::MID), 1);

        let c = runnable(&mut table);
        assert_eq!(table.get(c).unwrap().queue_slot, Some(0));
        assert_eq!(table.get(b).unwrap().queue_slot, Some(1));
        table.assert_consistent();
    }

    #[test]
    #[should_panic(expected = "not queued")]
    fn moving_an_unqueued_process_is_fatal() {
        let mut table = Table::new();
        let proc = runnable(&mut table);
        table.remove_on_exit(proc.index);
        let _ = table.move_to(proc.index, Level::HIGH);
    }
}
