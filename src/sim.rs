use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use hashbrown::{HashMap, HashSet};
use log::{debug, trace};

use crate::config::SchedConfig;
use crate::error::ProcError;
use crate::locks::SpinLock;
use crate::process::{
    AddressSpace, Channel, ContextSwitch, Cpu, FileHandle, Held, Inode, KernelStack, Level, Pid,
    ProcRef, ProcessTable, Resources, Scheduler, State, WaitStatus,
};

/// Key init sleeps on once it has nothing left to do.
pub const INIT_IDLE: u64 = u64::MAX;

const ROOT_DIR: Inode = Inode(1);

/// One thing a scripted process does.
#[derive(Debug)]
pub enum Step {
    Yield,
    /// Runs for this many timer ticks, giving the CPU up whenever the
    /// quantum runs out.
    Compute(u32),
    Sleep(u64),
    SleepTicks(u64),
    Wakeup(u64),
    /// Forks a child that runs the given script.
    Fork(Vec<Step>),
    Wait,
    Kill(Pid),
    Renice(Pid, Level),
    Boost,
    Open,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Dispatch { cpu: usize, pid: Pid, level: Level },
    Forked { parent: Pid, child: Pid },
    Reaped { parent: Pid, child: Pid },
    Failed { pid: Pid, error: ProcError },
    /// The process noticed it was killed and is exiting.
    Killed { pid: Pid },
    Exited { pid: Pid },
}

pub struct Machine {
    scripts: HashMap<Pid, VecDeque<Step>>,
    // blocked in wait, to retry when next dispatched
    waiting: HashSet<Pid>,
    events: Vec<Event>,
    resources: Arc<SimResources>,
}

impl Machine {
    pub fn new(resources: Arc<SimResources>) -> Self {
        Self {
            scripts: HashMap::new(),
            waiting: HashSet::new(),
            events: Vec::new(),
            resources,
        }
    }

    pub fn with_table(config: SchedConfig) -> (ProcessTable, Machine) {
        let resources = Arc::new(SimResources::new());
        let table = ProcessTable::new(resources.clone(), config);
        (table, Machine::new(resources))
    }

    pub fn resources(&self) -> &SimResources {
        &self.resources
    }

    /// Creates init. Once its script is done it reaps children forever.
    pub fn boot(&mut self, table: &ProcessTable, script: Vec<Step>) -> Result<Pid, ProcError> {
        let proc = table.spawn_init("init")?;
        self.load(table, proc, script)
    }

    /// Creates a parentless process running `script`.
    pub fn spawn(
        &mut self,
        table: &ProcessTable,
        name: &str,
        script: Vec<Step>,
    ) -> Result<Pid, ProcError> {
        let proc = table.allocate_process()?;
        table.activate(proc, name)?;
        self.load(table, proc, script)
    }

    fn load(&mut self, table: &ProcessTable, proc: ProcRef, script: Vec<Step>) -> Result<Pid, ProcError> {
        let pid = table.info(proc).ok_or(ProcError::NoSuchProcess)?.pid;
        self.scripts.insert(pid, script.into());
        Ok(pid)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn dispatch_order(&self) -> Vec<Pid> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Dispatch { pid, .. } => Some(*pid),
                _ => None,
            })
            .collect()
    }

    /// Runs scheduler rounds on one CPU until a round finds nothing to do,
    /// at most `max_rounds` of them. Returns the number of dispatches.
    pub fn run(&mut self, table: &ProcessTable, max_rounds: usize) -> usize {
        let mut sched = Scheduler::new(table, Cpu::new(0));
        let mut total = 0;
        for _ in 0..max_rounds {
            match sched.round(self) {
                0 => break,
                dispatched => total += dispatched,
            }
        }
        total
    }

    pub fn idle_ticks(&mut self, table: &ProcessTable, ticks: u64) {
        for _ in 0..ticks {
            table.timer_tick(None);
        }
    }

    // executes steps until one gives the CPU back
    fn execute<'t>(
        &mut self,
        table: &'t ProcessTable,
        proc: ProcRef,
        pid: Pid,
        script: &mut VecDeque<Step>,
    ) -> Held<'t> {
        let is_init = table.init_proc() == Some(proc);
        loop {
            // a wait that blocked is retried before anything else
            let step = if self.waiting.remove(&pid) {
                Step::Wait
            } else {
                if table.is_killed(proc) {
                    self.events.push(Event::Killed { pid });
                    return self.exit(table, proc, pid);
                }
                match script.pop_front() {
                    Some(step) => step,
                    None if is_init => Step::Wait,
                    None => Step::Exit,
                }
            };
            trace!("[sim] pid {}: {:?}", pid, step);

            match step {
                Step::Yield => return table.yield_current(proc),
                Step::Compute(0) => {}
                Step::Compute(ticks) => {
                    if ticks > 1 {
                        script.push_front(Step::Compute(ticks - 1));
                    }
                    if table.timer_tick(Some(proc)).quantum_expired {
                        return table.expire_quantum(proc);
                    }
                }
                Step::Sleep(key) => return table.sleep_on(proc, Channel::Key(key)),
                Step::SleepTicks(ticks) => return table.sleep_ticks(proc, ticks),
                Step::Wakeup(key) => {
                    table.wakeup(Channel::Key(key));
                }
                Step::Fork(child_script) => match table.fork(proc) {
                    Ok(child) => {
                        self.scripts.insert(child, child_script.into());
                        self.events.push(Event::Forked { parent: pid, child });
                    }
                    Err(error) => self.events.push(Event::Failed { pid, error }),
                },
                Step::Wait => match self.wait(table, proc, pid) {
                    Ok(None) => {}
                    Ok(Some(held)) => {
                        self.waiting.insert(pid);
                        return held;
                    }
                    // init has nothing left to reap
                    Err(ProcError::NoChildren) if is_init => {
                        return table.sleep_on(proc, Channel::Key(INIT_IDLE))
                    }
                    Err(error) => self.events.push(Event::Failed { pid, error }),
                },
                Step::Kill(target) => {
                    if let Err(error) = table.kill(target) {
                        self.events.push(Event::Failed { pid, error });
                    }
                }
                Step::Renice(target, level) => {
                    if let Err(error) = table.renice(level, target) {
                        self.events.push(Event::Failed { pid, error });
                    }
                }
                Step::Boost => {
                    if let Err(error) = table.boost_all() {
                        self.events.push(Event::Failed { pid, error });
                    }
                }
                Step::Open => {
                    let file = self.resources.open_file();
                    if table.install_file(proc, file).is_none() {
                        debug!("[sim] pid {}: no free descriptor", pid);
                        self.resources.close_file(file);
                    }
                }
                Step::Exit => return self.exit(table, proc, pid),
            }
        }
    }

    // Ok(None) after a reap, Ok(Some) when the caller has gone to sleep
    fn wait<'t>(
        &mut self,
        table: &'t ProcessTable,
        proc: ProcRef,
        pid: Pid,
    ) -> Result<Option<Held<'t>>, ProcError> {
        match table.wait_for_child(proc)? {
            WaitStatus::Reaped(child) => {
                self.events.push(Event::Reaped { parent: pid, child });
                Ok(None)
            }
            WaitStatus::Blocked(held) => Ok(Some(held)),
        }
    }

    fn exit<'t>(&mut self, table: &'t ProcessTable, proc: ProcRef, pid: Pid) -> Held<'t> {
        self.events.push(Event::Exited { pid });
        table.exit_current(proc)
    }
}

impl ContextSwitch for Machine {
    fn switch_to<'t>(&mut self, cpu: &Cpu, held: Held<'t>, proc: ProcRef) -> Held<'t> {
        let Some(info) = held.info(proc) else {
            panic!("dispatched a process that does not exist: {:?}", proc);
        };
        self.events.push(Event::Dispatch {
            cpu: cpu.id(),
            pid: info.pid,
            level: info.priority,
        });

        let table = held.release();
        let mut script = self.scripts.remove(&info.pid).unwrap_or_default();
        let held = self.execute(table, proc, info.pid, &mut script);
        if held.info(proc).map_or(false, |now| now.state != State::Zombie) {
            self.scripts.insert(info.pid, script);
        }
        held
    }
}

#[derive(Debug, Default)]
struct Ledger {
    next: u64,
    stacks: HashSet<KernelStack>,
    spaces: HashSet<AddressSpace>,
    // open references per handle
    files: HashMap<FileHandle, u32>,
    dirs: HashMap<Inode, u32>,
    fail_stacks: bool,
    fail_spaces: bool,
    stacks_allocated: usize,
}

impl Ledger {
    fn mint(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}

fn release<K: core::hash::Hash + Eq + core::fmt::Debug>(refs: &mut HashMap<K, u32>, key: K) {
    let Some(count) = refs.get_mut(&key) else {
        panic!("released {:?} which is not open", key);
    };
    *count -= 1;
    if *count == 0 {
        refs.remove(&key);
    }
}

/// Memory and file services with a ledger of everything handed out.
#[derive(Debug, Default)]
pub struct SimResources {
    ledger: SpinLock<Ledger>,
}

impl SimResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_kernel_stacks(&self, fail: bool) {
        self.ledger.lock().fail_stacks = fail;
    }

    pub fn fail_address_spaces(&self, fail: bool) {
        self.ledger.lock().fail_spaces = fail;
    }

    pub fn open_file(&self) -> FileHandle {
        let mut ledger = self.ledger.lock();
        let file = FileHandle(ledger.mint());
        ledger.files.insert(file, 1);
        file
    }

    pub fn live_kernel_stacks(&self) -> usize {
        self.ledger.lock().stacks.len()
    }

    pub fn kernel_stacks_allocated(&self) -> usize {
        self.ledger.lock().stacks_allocated
    }

    pub fn live_address_spaces(&self) -> usize {
        self.ledger.lock().spaces.len()
    }

    pub fn file_refs(&self, file: FileHandle) -> u32 {
        self.ledger.lock().files.get(&file).copied().unwrap_or(0)
    }

    pub fn open_files(&self) -> usize {
        self.ledger.lock().files.len()
    }

    pub fn root_dir_refs(&self) -> u32 {
        self.ledger.lock().dirs.get(&ROOT_DIR).copied().unwrap_or(0)
    }
}

impl Resources for SimResources {
    fn alloc_kernel_stack(&self) -> Option<KernelStack> {
        let mut ledger = self.ledger.lock();
        if ledger.fail_stacks {
            return None;
        }
        let stack = KernelStack(ledger.mint());
        ledger.stacks.insert(stack);
        ledger.stacks_allocated += 1;
        Some(stack)
    }

    fn free_kernel_stack(&self, stack: KernelStack) {
        assert!(self.ledger.lock().stacks.remove(&stack), "double free of {:?}", stack);
    }

    fn create_address_space(&self) -> Option<AddressSpace> {
        let mut ledger = self.ledger.lock();
        if ledger.fail_spaces {
            return None;
        }
        let space = AddressSpace(ledger.mint());
        ledger.spaces.insert(space);
        Some(space)
    }

    fn copy_address_space(&self, from: AddressSpace) -> Option<AddressSpace> {
        assert!(self.ledger.lock().spaces.contains(&from), "copy of dead {:?}", from);
        self.create_address_space()
    }

    fn free_address_space(&self, space: AddressSpace) {
        assert!(self.ledger.lock().spaces.remove(&space), "double free of {:?}", space);
    }

    fn dup_file(&self, file: FileHandle) -> FileHandle {
        match self.ledger.lock().files.get_mut(&file) {
            Some(count) => *count += 1,
            None => panic!("dup of closed {:?}", file),
        }
        file
    }

    fn close_file(&self, file: FileHandle) {
        release(&mut self.ledger.lock().files, file);
    }

    fn root_dir(&self) -> Inode {
        *self.ledger.lock().dirs.entry(ROOT_DIR).or_insert(0) += 1;
        ROOT_DIR
    }

    fn dup_dir(&self, dir: Inode) -> Inode {
        match self.ledger.lock().dirs.get_mut(&dir) {
            Some(count) => *count += 1,
            None => panic!("dup of released {:?}", dir),
        }
        dir
    }

    fn put_dir(&self, dir: Inode) {
        release(&mut self.ledger.lock().dirs, dir);
    }
}

#[cfg(test)]
mod test {
    use alloc::vec;

    use super::*;
    use crate::config::DemoteOn;

    fn config() -> SchedConfig {
        SchedConfig::default()
    }

    fn levels_of(machine: &Machine, who: Pid) -> Vec<Level> {
        machine
            .events()
            .iter()
            .filter_map(|event| match event {
                Event::Dispatch { pid, level, .. } if *pid == who => Some(*level),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn init_reaps_forked_children() {
        let (table, mut machine) = Machine::with_table(config());
        let init = machine
            .boot(&table, vec![Step::Fork(vec![]), Step::Fork(vec![Step::Yield]), Step::Fork(vec![])])
            .unwrap();
        machine.run(&table, 10);

        let reaped = machine
            .events()
            .iter()
            .filter(|event| matches!(event, Event::Reaped { parent, .. } if *parent == init))
            .count();
        assert_eq!(reaped, 3);

        let ps = table.ps();
        assert_eq!(ps.len(), 1);
        assert_eq!(ps[0].state, State::Sleeping);
        let res = machine.resources();
        assert_eq!(res.live_kernel_stacks(), 1);
        assert_eq!(res.live_address_spaces(), 1);
        assert_eq!(res.root_dir_refs(), 1);
        table.verify().unwrap();
    }

    #[test]
    fn quantum_expiry_walks_down_the_levels() {
        let (table, mut machine) = Machine::with_table(config().with_quantum_ticks(2));
        let pid = machine.spawn(&table, "cpu", vec![Step::Compute(5)]).unwrap();
        machine.run(&table, 10);

        assert_eq!(levels_of(&machine, pid), [Level::MID, Level::LOW, Level::LOW]);
        assert_eq!(table.ticks(), 5);
    }

    #[test]
    fn renice_from_another_process_preempts_it() {
        let (table, mut machine) = Machine::with_table(config());
        let target = Pid::from_raw(2).unwrap();
        let ctl = machine
            .spawn(&table, "ctl", vec![Step::Renice(target, Level::HIGH), Step::Yield])
            .unwrap();
        let worker = machine.spawn(&table, "worker", vec![]).unwrap();
        assert_eq!(worker, target);

        machine.run(&table, 10);
        assert_eq!(machine.dispatch_order(), [ctl, worker, ctl]);
        assert_eq!(levels_of(&machine, ctl), [Level::MID, Level::LOW]);
    }

    #[test]
    fn voluntary_yield_keeps_level_when_not_penalized() {
        let config = config().with_demote_on(DemoteOn::QUANTUM_EXPIRED);
        let (table, mut machine) = Machine::with_table(config);
        let pid = machine
            .spawn(&table, "io", vec![Step::Yield, Step::Yield])
            .unwrap();
        machine.run(&table, 10);

        assert_eq!(levels_of(&machine, pid), [Level::MID; 3]);
    }

    #[test]
    fn kill_wakes_and_ends_a_sleeper() {
        let (table, mut machine) = Machine::with_table(config());
        let victim = machine.spawn(&table, "victim", vec![Step::Sleep(7)]).unwrap();
        machine.run(&table, 10);
        assert_eq!(table.info_by_pid(victim).unwrap().state, State::Sleeping);

        machine
            .spawn(&table, "killer", vec![Step::Kill(victim)])
            .unwrap();
        machine.run(&table, 10);

        assert!(machine.events().contains(&Event::Killed { pid: victim }));
        assert_eq!(table.info_by_pid(victim).unwrap().state, State::Zombie);
    }

    #[test]
    fn killed_parent_stops_waiting() {
        let (table, mut machine) = Machine::with_table(config());
        machine.boot(&table, vec![]).unwrap();
        let parent = machine
            .spawn(&table, "parent", vec![Step::Fork(vec![Step::Sleep(1)]), Step::Wait])
            .unwrap();
        machine.run(&table, 10);
        assert_eq!(table.info_by_pid(parent).unwrap().state, State::Sleeping);

        machine.spawn(&table, "killer", vec![Step::Kill(parent)]).unwrap();
        machine.run(&table, 10);

        assert!(machine.events().contains(&Event::Failed {
            pid: parent,
            error: ProcError::Killed
        }));
        assert!(machine.events().contains(&Event::Killed { pid: parent }));

        // the sleeping child now belongs to init
        let child = table
            .ps()
            .into_iter()
            .find(|info| info.name == "parent" && info.pid != parent)
            .unwrap();
        assert_eq!(child.state, State::Sleeping);
        assert_eq!(child.parent, table.info(table.init_proc().unwrap()).map(|i| i.pid));
        table.verify().unwrap();
    }

    #[test]
    fn tick_sleep_wakes_at_deadline() {
        let config = config().with_boost_interval(0);
        let (table, mut machine) = Machine::with_table(config);
        let pid = machine.spawn(&table, "nap", vec![Step::SleepTicks(3)]).unwrap();
        machine.run(&table, 10);
        assert_eq!(table.info_by_pid(pid).unwrap().state, State::Sleeping);

        machine.idle_ticks(&table, 2);
        assert_eq!(machine.run(&table, 10), 0);
        machine.idle_ticks(&table, 1);
        assert_eq!(machine.run(&table, 10), 1);
        assert_eq!(table.info_by_pid(pid).unwrap().state, State::Zombie);
    }

    #[test]
    fn files_follow_fork_and_exit() {
        let (table, mut machine) = Machine::with_table(config());
        machine
            .boot(&table, vec![Step::Open, Step::Open, Step::Fork(vec![Step::Open])])
            .unwrap();
        machine.run(&table, 10);

        // init still holds its two files; everything the child held is closed
        let res = machine.resources();
        assert_eq!(res.open_files(), 2);
        assert_eq!(res.file_refs(FileHandle(3)), 1);
        assert_eq!(res.root_dir_refs(), 1);
        assert_eq!(res.live_kernel_stacks(), 1);
    }

    #[test]
    fn failed_fork_leaves_no_trace() {
        let (table, mut machine) = Machine::with_table(config());
        let init = machine.boot(&table, vec![Step::Fork(vec![])]).unwrap();
        machine.resources().fail_address_spaces(true);
        machine.run(&table, 10);

        assert!(machine.events().contains(&Event::Failed {
            pid: init,
            error: ProcError::OutOfMemory
        }));
        assert_eq!(table.ps().len(), 1);
        assert_eq!(machine.resources().live_kernel_stacks(), 1);
        assert_eq!(machine.resources().kernel_stacks_allocated(), 2);
        for level in Level::ALL {
            assert_eq!(table.count(level), usize::from(level == Level::MID));
        }
        table.verify().unwrap();
    }

    #[test]
    fn boost_restores_demoted_processes() {
        let (table, mut machine) = Machine::with_table(config());
        let worker = machine
            .spawn(&table, "worker", vec![Step::Yield, Step::Yield, Step::Sleep(2), Step::Yield])
            .unwrap();
        machine.run(&table, 10);
        assert_eq!(table.info_by_pid(worker).unwrap().priority, Level::LOW);

        machine
            .spawn(&table, "booster", vec![Step::Boost, Step::Wakeup(2)])
            .unwrap();
        machine.run(&table, 10);
        // woken at the top after the boost, then demoted by its own yield
        assert_eq!(
            levels_of(&machine, worker),
            [Level::MID, Level::LOW, Level::LOW, Level::HIGH, Level::MID]
        );
    }
}
