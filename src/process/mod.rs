mod delay;
mod dump;
mod pid;
mod proc;
mod queue;
mod resources;
mod scheduler;
mod table;
mod transitions;

use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, error, info, warn};

use self::table::{Reap, Table};
use crate::config::{DemoteOn, SchedConfig, NOFILE};
use crate::error::{Inconsistency, ProcError};
use crate::locks::{GuardIrq, SpinLockIrq};

pub use self::dump::ProcInfo;
pub use self::pid::{Pid, ProcRef};
pub use self::proc::{Channel, State};
pub use self::queue::Level;
pub use self::resources::{AddressSpace, FileHandle, Inode, KernelStack, Resources};
pub use self::scheduler::{ContextSwitch, Cpu, Scheduler};

/// The shared process table and its run queues.
pub struct ProcessTable {
    table: SpinLockIrq<Table>,
    resources: Arc<dyn Resources>,
    config: SchedConfig,
}

/// The table lock, held.
///
/// A `Held` is what crosses a context switch: the scheduler passes one into
/// [`ContextSwitch::switch_to`], the process gives it up with
/// [`Held::release`], and every operation that hands the CPU back (yield,
/// sleep, exit, a blocked wait) returns a fresh one for the scheduler to
/// resume with. The lock is therefore held exactly once on each side of the
/// switch.
pub struct Held<'t> {
    owner: &'t ProcessTable,
    guard: GuardIrq<'t, Table>,
}

/// Result of [`ProcessTable::wait_for_child`] that did not fail.
pub enum WaitStatus<'t> {
    Reaped(Pid),
    /// Children exist but none has exited. The caller is now Sleeping and
    /// must hand this back to the scheduler, then retry once resumed.
    Blocked(Held<'t>),
}

/// What one timer tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub ticks: u64,
    /// The running process has used up its quantum and should yield.
    pub quantum_expired: bool,
    pub woken: usize,
    pub boosted: usize,
}

impl ProcessTable {
    pub fn new(resources: Arc<dyn Resources>, config: SchedConfig) -> Self {
        Self {
            table: SpinLockIrq::new(Table::new()),
            resources,
            config,
        }
    }

    pub fn config(&self) -> SchedConfig {
        self.config
    }

    pub fn lock(&self) -> Held<'_> {
        Held {
            owner: self,
            guard: self.table.lock(),
        }
    }

    /// Claims a free slot: the new process is an Embryo with a fresh pid, a
    /// kernel stack, and a slot in the default queue.
    pub fn allocate_process(&self) -> Result<ProcRef, ProcError> {
        let mut held = self.lock();
        let proc = held.guard.allocate()?;

        let Some(stack) = self.resources.alloc_kernel_stack() else {
            held.guard.discard_embryo(proc.index);
            warn!("allocate: no memory for a kernel stack");
            return Err(ProcError::OutOfMemory);
        };
        held.guard.procs[proc.index].kstack = Some(stack);
        held.check();
        debug!("allocate: pid {} in slot {}", held.guard.procs[proc.index].pid, proc.index);
        Ok(proc)
    }

    /// Embryo -> Runnable once its execution context is set up.
    pub fn activate(&self, proc: ProcRef, name: &str) -> Result<(), ProcError> {
        let mut held = self.lock();
        let entry = held.guard.get_mut(proc)?;
        if entry.state != State::Embryo {
            return Err(ProcError::NoSuchProcess);
        }
        entry.name = proc::Name::new(name);
        entry.state = State::Runnable;
        Ok(())
    }

    /// Creates the first process. Orphans are handed to it, and it may never exit.
    pub fn spawn_init(&self, name: &str) -> Result<ProcRef, ProcError> {
        let proc = self.allocate_process()?;
        let Some(vm) = self.resources.create_address_space() else {
            self.lock().abandon(proc);
            warn!("spawn_init: no memory for an address space");
            return Err(ProcError::OutOfMemory);
        };
        let cwd = self.resources.root_dir();

        let mut held = self.lock();
        assert!(held.guard.init.is_none(), "spawn_init: init already exists");
        let entry = held.guard.get_mut(proc)?;
        entry.vm = Some(vm);
        entry.cwd = Some(cwd);
        entry.name = proc::Name::new(name);
        entry.state = State::Runnable;
        let pid = entry.pid;
        held.guard.init = Some(proc);
        info!("init: pid {} ({})", pid, name);
        Ok(proc)
    }

    /// Copies `parent` into a new Runnable child and returns the child's pid.
    pub fn fork(&self, parent: ProcRef) -> Result<Pid, ProcError> {
        let (vm, files, cwd, name) = {
            let held = self.lock();
            let entry = held.guard.get(parent)?;
            (entry.vm, entry.files, entry.cwd, entry.name)
        };

        let child = self.allocate_process()?;
        let vm = match vm {
            Some(vm) => match self.resources.copy_address_space(vm) {
                Some(copy) => Some(copy),
                None => {
                    self.lock().abandon(child);
                    warn!("fork: no memory to copy the address space");
                    return Err(ProcError::OutOfMemory);
                }
            },
            None => None,
        };
        let files = files.map(|file| file.map(|file| self.resources.dup_file(file)));
        let cwd = cwd.map(|dir| self.resources.dup_dir(dir));

        let mut held = self.lock();
        let parent_pid = held.current_mut(parent).pid;
        let entry = &mut held.guard.procs[child.index];
        entry.vm = vm;
        entry.files = files;
        entry.cwd = cwd;
        entry.name = name;
        entry.parent = Some(parent);
        entry.state = State::Runnable;
        let pid = entry.pid;
        held.check();
        info!("fork: pid {} -> pid {}", parent_pid, pid);
        Ok(pid)
    }

    /// Places `file` in the lowest free descriptor of `proc`.
    pub fn install_file(&self, proc: ProcRef, file: FileHandle) -> Option<usize> {
        let mut held = self.lock();
        let entry = held.guard.get_mut(proc).ok()?;
        let fd = entry.files.iter().position(Option::is_none)?;
        entry.files[fd] = Some(file);
        Some(fd)
    }

    /// Terminates the calling process. It turns into a Zombie until its parent
    /// reaps it; the returned lock goes straight back to the scheduler and the
    /// process never runs again.
    pub fn exit_current(&self, me: ProcRef) -> Held<'_> {
        let (files, cwd) = {
            let mut held = self.lock();
            if held.guard.init == Some(me) {
                error!("init exiting");
                panic!("init exiting");
            }
            let entry = held.current_mut(me);
            let files = core::mem::replace(&mut entry.files, [None; NOFILE]);
            (files, entry.cwd.take())
        };

        for file in files.into_iter().flatten() {
            self.resources.close_file(file);
        }
        if let Some(dir) = cwd {
            self.resources.put_dir(dir);
        }

        let mut held = self.lock();
        let entry = held.current_mut(me);
        let (pid, parent) = (entry.pid, entry.parent);

        // parent might be sleeping in wait
        if let Some(parent) = parent {
            held.guard.wakeup(Channel::Proc(parent));
        }
        if let Some(init) = held.guard.init {
            held.guard.reparent(me, init);
        }

        held.guard.remove_on_exit(me.index);
        held.guard.procs[me.index].state = State::Zombie;
        held.check();
        info!("exit: pid {}", pid);
        held.sched(me)
    }

    pub fn wait_for_child(&self, me: ProcRef) -> Result<WaitStatus<'_>, ProcError> {
        self.lock().wait_for_child(me)
    }

    pub fn yield_current(&self, me: ProcRef) -> Held<'_> {
        self.give_up(me, DemoteOn::VOLUNTARY)
    }

    /// Gives up the CPU because the timer said the quantum ran out.
    pub fn expire_quantum(&self, me: ProcRef) -> Held<'_> {
        self.give_up(me, DemoteOn::QUANTUM_EXPIRED)
    }

    fn give_up(&self, me: ProcRef, reason: DemoteOn) -> Held<'_> {
        let mut held = self.lock();
        held.current_mut(me);
        if self.config.demote_on.intersects(reason) {
            if let Err(err) = held.guard.demote(me.index) {
                warn!("yield: pid {} kept its level: {}", held.guard.procs[me.index].pid, err);
            }
        }
        held.guard.procs[me.index].state = State::Runnable;
        held.check();
        held.sched(me)
    }

    pub fn sleep_on(&self, me: ProcRef, chan: Channel) -> Held<'_> {
        self.lock().sleep_on(me, chan)
    }

    /// Sleeps until `ticks` more timer ticks have passed (or a kill arrives).
    pub fn sleep_ticks(&self, me: ProcRef, ticks: u64) -> Held<'_> {
        let mut held = self.lock();
        let deadline = held.guard.ticks.saturating_add(ticks);
        held.guard.prune_delays();
        held.guard.delays.add(me, deadline);
        held.sleep_on(me, Channel::Timer(deadline))
    }

    pub fn wakeup(&self, chan: Channel) -> usize {
        self.lock().wakeup(chan)
    }

    /// Asks `pid` to terminate at its next safe point.
    pub fn kill(&self, pid: Pid) -> Result<(), ProcError> {
        self.lock().guard.kill(pid)
    }

    pub fn is_killed(&self, proc: ProcRef) -> bool {
        self.lock()
            .guard
            .get(proc)
            .map(|entry| entry.killed)
            .unwrap_or(false)
    }

    /// Moves `pid` to `level`. Asking for the level it is already at is a no-op.
    pub fn renice(&self, level: Level, pid: Pid) -> Result<(), ProcError> {
        let mut held = self.lock();
        let moved = held.guard.renice(pid, level)?;
        held.check();
        debug!("renice: pid {} to queue {} (moved: {})", pid, level, moved);
        Ok(())
    }

    /// Lifts every process below the top level back to the top.
    pub fn boost_all(&self) -> Result<usize, ProcError> {
        let mut held = self.lock();
        let moved = held.guard.boost_all()?;
        held.check();
        Ok(moved)
    }

    /// Entry point for the timer driver, run once per tick with the process
    /// the ticking CPU was running.
    pub fn timer_tick(&self, running: Option<ProcRef>) -> TickOutcome {
        let mut held = self.lock();
        let table = &mut *held.guard;
        table.ticks += 1;
        let now = table.ticks;

        let mut woken = 0;
        for (proc, deadline) in table.delays.expired(now) {
            // the sleeper may have been killed, reaped, or gone back to sleep later
            let Ok(entry) = table.get_mut(proc) else { continue };
            if entry.state == State::Sleeping && entry.chan == Some(Channel::Timer(deadline)) {
                entry.state = State::Runnable;
                entry.chan = None;
                woken += 1;
            }
        }

        let interval = self.config.boost_interval;
        let boosted = if interval != 0 && now % interval == 0 {
            table.boost_all().unwrap_or_else(|err| {
                warn!("boost at tick {} failed: {}", now, err);
                0
            })
        } else {
            0
        };

        let quantum = self.config.quantum_ticks;
        let quantum_expired = running
            .and_then(|proc| table.get_mut(proc).ok())
            .filter(|entry| entry.state == State::Running)
            .map(|entry| {
                entry.ticks += 1;
                entry.ticks >= quantum
            })
            .unwrap_or(false);

        held.check();
        TickOutcome {
            ticks: now,
            quantum_expired,
            woken,
            boosted,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.lock().guard.ticks
    }

    /// Tick at which the earliest tick sleeper falls due, for a timer that
    /// only wants to fire when something is waiting.
    pub fn next_deadline(&self) -> Option<u64> {
        self.lock().guard.delays.next_deadline()
    }

    pub fn init_proc(&self) -> Option<ProcRef> {
        self.lock().guard.init
    }

    pub fn info(&self, proc: ProcRef) -> Option<ProcInfo> {
        self.lock().info(proc)
    }

    pub fn info_by_pid(&self, pid: Pid) -> Option<ProcInfo> {
        let held = self.lock();
        let index = held.guard.find_pid(pid)?;
        Some(ProcInfo::of(&held.guard, index))
    }

    pub fn find(&self, pid: Pid) -> Option<ProcRef> {
        let held = self.lock();
        held.guard.find_pid(pid).map(|index| held.guard.handle(index))
    }

    pub fn count(&self, level: Level) -> usize {
        self.lock().count(level)
    }

    pub fn verify(&self) -> Result<(), Inconsistency> {
        self.lock().verify()
    }

    pub fn ps(&self) -> Vec<ProcInfo> {
        dump::snapshot(&self.lock().guard)
    }

    /// Every live process, without waiting for the lock.
    ///
    /// If the lock is taken the table is read as it is, so the listing may be
    /// torn. It stays usable on a machine whose lock is wedged.
    pub fn dump_state(&self) -> Vec<ProcInfo> {
        if let Some(guard) = self.table.try_lock() {
            return dump::snapshot(&guard);
        }
        // SAFETY: diagnostics only. PCBs are plain data with fixed-size names,
        // so a racing writer can garble an entry but not send us off a pointer.
        let table = unsafe { self.table.peek_unsynchronized() };
        dump::snapshot(table)
    }

    pub fn procdump(&self) {
        for info in self.dump_state() {
            crate::kprintln!("{}", info);
        }
    }
}

impl<'t> Held<'t> {
    /// Gives the lock up, e.g. right after a process has been switched in.
    pub fn release(self) -> &'t ProcessTable {
        self.owner
    }

    pub fn count(&self, level: Level) -> usize {
        self.guard.queues.count(level)
    }

    pub fn has_runnable(&self, level: Level) -> bool {
        self.guard.runnable_at(level)
    }

    pub fn info(&self, proc: ProcRef) -> Option<ProcInfo> {
        let index = self.guard.resolve(proc)?;
        Some(ProcInfo::of(&self.guard, index))
    }

    pub fn verify(&self) -> Result<(), Inconsistency> {
        self.guard.verify()
    }

    pub fn wakeup(&mut self, chan: Channel) -> usize {
        let woken = self.guard.wakeup(chan);
        if woken > 0 {
            debug!("wakeup {:?}: {} process(es)", chan, woken);
        }
        woken
    }

    /// Puts `me` to sleep on `chan` and hands the CPU back.
    ///
    /// Taking the lock before deciding to sleep is what keeps a wakeup from
    /// slipping in between the decision and the state change.
    pub fn sleep_on(mut self, me: ProcRef, chan: Channel) -> Held<'t> {
        let entry = self.current_mut(me);
        entry.chan = Some(chan);
        entry.state = State::Sleeping;
        self.sched(me)
    }

    /// Reaps one exited child of `me`, returning its pid.
    ///
    /// When children exist but none has exited, `me` goes to sleep on its own
    /// channel and the lock comes back as [`WaitStatus::Blocked`]. Fails with
    /// `NoChildren` when there is nothing to wait for and with `Killed` when
    /// `me` has been killed in the meantime.
    pub fn wait_for_child(mut self, me: ProcRef) -> Result<WaitStatus<'t>, ProcError> {
        match self.guard.reap(me) {
            Reap::Reaped { pid, kstack, vm } => {
                if let Some(stack) = kstack {
                    self.owner.resources.free_kernel_stack(stack);
                }
                if let Some(vm) = vm {
                    self.owner.resources.free_address_space(vm);
                }
                self.check();
                info!("wait: reaped pid {}", pid);
                Ok(WaitStatus::Reaped(pid))
            }
            Reap::NoChildren => Err(ProcError::NoChildren),
            Reap::Pending => {
                if self.current_mut(me).killed {
                    return Err(ProcError::Killed);
                }
                Ok(WaitStatus::Blocked(self.sleep_on(me, Channel::Proc(me))))
            }
        }
    }

    // PCB of the process calling in; a stale handle here means the caller
    // is not who it claims to be
    fn current_mut(&mut self, me: ProcRef) -> &mut proc::Proc {
        match self.guard.resolve(me) {
            Some(index) => &mut self.guard.procs[index],
            None => {
                error!("stale handle {:?} used by a running process", me);
                panic!("stale process handle {:?}", me);
            }
        }
    }

    // back to the scheduler: `me` must already have left Running
    fn sched(mut self, me: ProcRef) -> Held<'t> {
        let entry = self.current_mut(me);
        if entry.state == State::Running {
            error!("sched: pid {} is still running", entry.pid);
            panic!("sched running");
        }
        self
    }

    // undo a half-built process: slot, queue entry and kernel stack
    fn abandon(&mut self, proc: ProcRef) {
        let Some(index) = self.guard.resolve(proc) else { return };
        if let Some(stack) = self.guard.procs[index].kstack.take() {
            self.owner.resources.free_kernel_stack(stack);
        }
        self.guard.discard_embryo(index);
        self.check();
    }

    fn check(&self) {
        if cfg!(debug_assertions) {
            self.guard.assert_consistent();
        }
    }
}
