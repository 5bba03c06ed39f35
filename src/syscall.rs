use log::debug;

use crate::error::ProcError;
use crate::process::{Level, Pid, ProcRef, ProcessTable};

fn status(name: &str, result: Result<i64, ProcError>) -> i64 {
    result.unwrap_or_else(|err| {
        debug!("{}: {}", name, err);
        -1
    })
}

fn pid_arg(raw: i64) -> Result<Pid, ProcError> {
    Pid::from_raw(raw).ok_or(ProcError::NoSuchProcess)
}

fn level_arg(raw: i64) -> Result<Level, ProcError> {
    u8::try_from(raw)
        .map_err(|_| ProcError::InvalidPriority)
        .and_then(Level::new)
}

/// Returns the child's pid to the parent.
pub fn sys_fork(table: &ProcessTable, me: ProcRef) -> i64 {
    status("fork", table.fork(me).map(|pid| i64::from(pid.as_u32())))
}

pub fn sys_kill(table: &ProcessTable, pid: i64) -> i64 {
    status("kill", pid_arg(pid).and_then(|pid| table.kill(pid)).map(|()| 0))
}

/// Moves `pid` to queue `level`.
pub fn sys_renice(table: &ProcessTable, level: i64, pid: i64) -> i64 {
    let result = level_arg(level)
        .and_then(|level| Ok((level, pid_arg(pid)?)))
        .and_then(|(level, pid)| table.renice(level, pid))
        .map(|()| 0);
    status("renice", result)
}

pub fn sys_getpid(table: &ProcessTable, me: ProcRef) -> i64 {
    status(
        "getpid",
        table
            .info(me)
            .map(|info| i64::from(info.pid.as_u32()))
            .ok_or(ProcError::NoSuchProcess),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::SchedConfig;
    use crate::sim::Machine;

    fn setup() -> (ProcessTable, ProcRef) {
        let (table, _) = Machine::with_table(SchedConfig::default());
        let proc = table.allocate_process().unwrap();
        table.activate(proc, "sh").unwrap();
        (table, proc)
    }

    #[test]
    fn getpid_and_fork() {
        let (table, me) = setup();
        assert_eq!(sys_getpid(&table, me), 1);
        assert_eq!(sys_fork(&table, me), 2);
        assert_eq!(table.ps().len(), 2);
    }

    #[test]
    fn renice_checks_its_arguments() {
        let (table, me) = setup();
        assert_eq!(sys_renice(&table, 0, 1), 0);
        assert_eq!(table.info(me).unwrap().priority, Level::HIGH);
        // same level again is fine
        assert_eq!(sys_renice(&table, 0, 1), 0);

        assert_eq!(sys_renice(&table, 3, 1), -1);
        assert_eq!(sys_renice(&table, -1, 1), -1);
        assert_eq!(sys_renice(&table, 2, 0), -1);
        assert_eq!(sys_renice(&table, 2, 42), -1);
        assert_eq!(table.info(me).unwrap().priority, Level::HIGH);
    }

    #[test]
    fn kill_rejects_bad_pids() {
        let (table, me) = setup();
        assert_eq!(sys_kill(&table, -5), -1);
        assert_eq!(sys_kill(&table, 9), -1);
        assert_eq!(sys_kill(&table, 1), 0);
        assert!(table.is_killed(me));
    }
}
