use log::{error, info, warn};

use super::delay::Delays;
use super::pid::{Pid, PidCounter, ProcRef};
use super::proc::{Channel, Proc, State};
use super::queue::{Level, QueueSet};
use super::resources::{AddressSpace, KernelStack};
use crate::config::NPROC;
use crate::error::{Inconsistency, ProcError};

/// Level every new process starts at.
pub(super) const DEFAULT_LEVEL: Level = Level::MID;

pub(super) enum Reap {
    Reaped {
        pid: Pid,
        kstack: Option<KernelStack>,
        vm: Option<AddressSpace>,
    },
    // children exist, none has exited yet
    Pending,
    NoChildren,
}

#[derive(Debug)]
pub(super) struct Table {
    pub(super) procs: [Proc; NPROC],
    pub(super) queues: QueueSet,
    pids: PidCounter,
    // reparenting target for orphans
    pub(super) init: Option<ProcRef>,
    pub(super) delays: Delays,
    pub(super) ticks: u64,
}

impl Table {
    pub(super) fn new() -> Self {
        Self {
            procs: [Proc::UNUSED; NPROC],
            queues: QueueSet::new(),
            pids: PidCounter::new(),
            init: None,
            delays: Delays::new(),
            ticks: 0,
        }
    }

    pub(super) fn resolve(&self, proc: ProcRef) -> Option<usize> {
        let entry = self.procs.get(proc.index)?;
        (entry.generation == proc.generation && entry.state != State::Unused).then_some(proc.index)
    }

    pub(super) fn get(&self, proc: ProcRef) -> Result<&Proc, ProcError> {
        self.resolve(proc)
            .map(|index| &self.procs[index])
            .ok_or(ProcError::NoSuchProcess)
    }

    pub(super) fn get_mut(&mut self, proc: ProcRef) -> Result<&mut Proc, ProcError> {
        let index = self.resolve(proc).ok_or(ProcError::NoSuchProcess)?;
        Ok(&mut self.procs[index])
    }

    pub(super) fn handle(&self, index: usize) -> ProcRef {
        self.procs[index].handle(index)
    }

    /// Claims an Unused slot as an Embryo queued at the default level.
    pub(super) fn allocate(&mut self) -> Result<ProcRef, ProcError> {
        let Some(index) = self.procs.iter().position(|p| p.state == State::Unused) else {
            warn!("allocate: process table full");
            return Err(ProcError::TableFull);
        };

        let slot = self.queues.insert(DEFAULT_LEVEL, index).map_err(|err| {
            error!("allocate: queue {} has no free slot", DEFAULT_LEVEL);
            err
        })?;

        // after a wrap the counter can land on a pid that is still alive
        let pid = loop {
            let pid = self.pids.next();
            if self.find_pid(pid).is_none() {
                break pid;
            }
        };
        let proc = &mut self.procs[index];
        proc.clear();
        proc.generation = proc.generation.wrapping_add(1);
        proc.pid = pid;
        proc.state = State::Embryo;
        proc.priority = DEFAULT_LEVEL;
        proc.queue_slot = Some(slot);
        Ok(proc.handle(index))
    }

    /// Undoes [`Table::allocate`] for an Embryo whose setup failed.
    pub(super) fn discard_embryo(&mut self, index: usize) {
        let proc = self.procs[index];
        assert_eq!(proc.state, State::Embryo, "discard_embryo: pid {} is not an embryo", proc.pid);
        self.remove_on_exit(index);
        self.procs[index].clear();
    }

    pub(super) fn find_pid(&self, pid: Pid) -> Option<usize> {
        self.procs
            .iter()
            .position(|p| p.state != State::Unused && p.pid == pid)
    }

    /// Hands every child of `dead` to `heir`, waking `heir` if one of them
    /// has already exited.
    pub(super) fn reparent(&mut self, dead: ProcRef, heir: ProcRef) {
        let mut zombie_found = false;
        for proc in self.procs.iter_mut() {
            if proc.state != State::Unused && proc.parent == Some(dead) {
                proc.parent = Some(heir);
                zombie_found |= proc.state == State::Zombie;
            }
        }
        if zombie_found {
            self.wakeup(Channel::Proc(heir));
        }
    }

    /// Collects one exited child of `parent`. The returned handles still have
    /// to be given back to their owners.
    pub(super) fn reap(&mut self, parent: ProcRef) -> Reap {
        let mut have_kids = false;
        for proc in self.procs.iter_mut() {
            if proc.state == State::Unused || proc.parent != Some(parent) {
                continue;
            }
            have_kids = true;
            if proc.state == State::Zombie {
                let reaped = Reap::Reaped {
                    pid: proc.pid,
                    kstack: proc.kstack.take(),
                    vm: proc.vm.take(),
                };
                proc.clear();
                return reaped;
            }
        }

        if have_kids {
            Reap::Pending
        } else {
            Reap::NoChildren
        }
    }

    // drops heap entries whose sleeper has since woken, died or slept again
    pub(super) fn prune_delays(&mut self) {
        let procs = &self.procs;
        self.delays.retain(|proc, deadline| {
            procs.get(proc.index).map_or(false, |p| {
                p.generation == proc.generation
                    && p.state == State::Sleeping
                    && p.chan == Some(Channel::Timer(deadline))
            })
        });
    }

    pub(super) fn wakeup(&mut self, chan: Channel) -> usize {
        let mut woken = 0;
        for proc in self.procs.iter_mut() {
            if proc.state == State::Sleeping && proc.chan == Some(chan) {
                proc.state = State::Runnable;
                proc.chan = None;
                woken += 1;
            }
        }
        woken
    }

    /// Flags `pid` for termination and pulls it out of any sleep.
    pub(super) fn kill(&mut self, pid: Pid) -> Result<(), ProcError> {
        let index = self.find_pid(pid).ok_or(ProcError::NoSuchProcess)?;
        let proc = &mut self.procs[index];
        proc.killed = true;
        if proc.state == State::Sleeping {
            proc.state = State::Runnable;
            proc.chan = None;
        }
        info!("kill: pid {} flagged ({:?})", pid, proc.state);
        Ok(())
    }

    pub(super) fn runnable_at(&self, level: Level) -> bool {
        self.queues
            .occupied(level)
            .any(|(_, index)| self.procs[index].state == State::Runnable)
    }

    pub(super) fn verify(&self) -> Result<(), Inconsistency> {
        let mut seen = [false; NPROC];

        for level in Level::ALL {
            let mut occupied = 0;
            for (slot, index) in self.queues.occupied(level) {
                occupied += 1;
                let proc = &self.procs[index];
                if !proc.state.is_queued() {
                    return Err(Inconsistency::StrayQueueEntry {
                        pid: proc.pid,
                        level,
                        slot,
                    });
                }
                if seen[index] {
                    return Err(Inconsistency::DoubleQueued { pid: proc.pid });
                }
                seen[index] = true;
                if proc.priority != level || proc.queue_slot != Some(slot) {
                    return Err(Inconsistency::SlotMismatch {
                        pid: proc.pid,
                        level,
                        slot,
                    });
                }
            }

            let count = self.queues.count(level);
            if count != occupied {
                return Err(Inconsistency::CountMismatch {
                    level,
                    count,
                    occupied,
                });
            }
        }

        for (index, proc) in self.procs.iter().enumerate() {
            if proc.state.is_queued() && !seen[index] {
                return Err(Inconsistency::Unqueued { pid: proc.pid });
            }
            if proc.state == State::Unused {
                continue;
            }
            let duplicate = self.procs[index + 1..]
                .iter()
                .any(|other| other.state != State::Unused && other.pid == proc.pid);
            if duplicate {
                return Err(Inconsistency::DuplicatePid { pid: proc.pid });
            }
        }

        Ok(())
    }

    // scheduling a freed or doubled process is worse than stopping here
    pub(super) fn assert_consistent(&self) {
        if let Err(broken) = self.verify() {
            error!("process table inconsistent: {}", broken);
            panic!("process table inconsistent: {}", broken);
        }
    }
}
