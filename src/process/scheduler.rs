use log::{error, trace};

use super::pid::ProcRef;
use super::proc::State;
use super::queue::Level;
use super::{Held, ProcessTable};
use crate::arch::enable_interrupts;
use crate::config::NPROC;

/// Moves an execution unit into a process and back.
pub trait ContextSwitch {
    /// Runs `proc` until it hands the CPU back.
    ///
    /// `held` is the table lock, taken by the scheduler. The process releases
    /// it once it is running and returns the `Held` produced by whichever
    /// operation gave the CPU up (yield, sleep, exit or a blocked wait), so
    /// the lock is held on entry and again on return, exactly once each.
    fn switch_to<'t>(&mut self, cpu: &Cpu, held: Held<'t>, proc: ProcRef) -> Held<'t>;
}

/// Per execution unit state.
#[derive(Debug)]
pub struct Cpu {
    id: usize,
    proc: Option<ProcRef>,
    dispatches: u64,
}

impl Cpu {
    pub const fn new(id: usize) -> Self {
        Self {
            id,
            proc: None,
            dispatches: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn current(&self) -> Option<ProcRef> {
        self.proc
    }

    pub fn dispatches(&self) -> u64 {
        self.dispatches
    }
}

/// The scheduling loop of one execution unit.
pub struct Scheduler<'t> {
    table: &'t ProcessTable,
    cpu: Cpu,
}

impl<'t> Scheduler<'t> {
    pub fn new(table: &'t ProcessTable, cpu: Cpu) -> Self {
        Self { table, cpu }
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn run<S: ContextSwitch>(mut self, switch: &mut S) -> ! {
        loop {
            if self.round(switch) == 0 {
                core::hint::spin_loop();
            }
        }
    }

    /// One pass over the levels, most favored first. Returns how many
    /// processes were dispatched.
    ///
    /// A level is drained by repeated slot scans until a scan finds nothing
    /// Runnable, and is only entered while every level above it has no
    /// Runnable process. After every dispatch the levels above are checked
    /// again; if one of them gained Runnable work the pass starts over from
    /// the top, still under the same lock.
    pub fn round<S: ContextSwitch>(&mut self, switch: &mut S) -> usize {
        // let devices interrupt between rounds
        enable_interrupts();

        let mut held = self.table.lock();
        held.check();

        let mut dispatched = 0;
        'levels: loop {
            for level in Level::ALL {
                loop {
                    let mut progressed = false;
                    for slot in 0..NPROC {
                        let Some(index) = held.guard.queues.get(level, slot) else {
                            continue;
                        };
                        if held.guard.procs[index].state != State::Runnable {
                            continue;
                        }

                        let proc = held.guard.handle(index);
                        held = self.dispatch(held, switch, proc, level);
                        dispatched += 1;
                        progressed = true;

                        if level.above().any(|up| held.has_runnable(up)) {
                            trace!("cpu {}: preempting queue {}", self.cpu.id, level);
                            continue 'levels;
                        }
                    }
                    if !progressed {
                        break;
                    }
                }
            }
            break;
        }

        dispatched
    }

    fn dispatch<S: ContextSwitch>(
        &mut self,
        mut held: Held<'t>,
        switch: &mut S,
        proc: ProcRef,
        level: Level,
    ) -> Held<'t> {
        let entry = &mut held.guard.procs[proc.index];
        entry.state = State::Running;
        entry.ticks = 0;
        trace!(
            "cpu {}: dispatch pid {} from queue {}[{:?}]",
            self.cpu.id,
            entry.pid,
            level,
            entry.queue_slot
        );

        self.cpu.proc = Some(proc);
        self.cpu.dispatches += 1;
        let held = switch.switch_to(&self.cpu, held, proc);
        self.cpu.proc = None;

        if let Some(index) = held.guard.resolve(proc) {
            let entry = &held.guard.procs[index];
            if entry.state == State::Running {
                error!("cpu {}: pid {} came back still running", self.cpu.id, entry.pid);
                panic!("sched running");
            }
        }
        held
    }
}
