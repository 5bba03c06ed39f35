#![cfg_attr(not(test), no_std)]

//! Process manager core with a three level feedback-queue scheduler.

extern crate alloc;

mod arch;
pub mod config;
pub mod error;
mod locks;
pub mod logging;
pub mod process;
pub mod sim;
pub mod syscall;

pub use config::{DemoteOn, SchedConfig, NLEVELS, NOFILE, NPROC};
pub use error::{Inconsistency, ProcError};
pub use process::{
    Channel, ContextSwitch, Cpu, Held, Level, Pid, ProcInfo, ProcRef, ProcessTable, Resources,
    Scheduler, State, TickOutcome, WaitStatus,
};
