//! Table sizes and scheduling policy knobs.

use bitflags::bitflags;

/// Capacity of the process table. Every priority level has as many slots.
pub const NPROC: usize = 64;
/// Number of priority levels; 0 is the most favored.
pub const NLEVELS: usize = 3;
/// Open file descriptors per process.
pub const NOFILE: usize = 16;
/// Bytes kept of a process name.
pub const NAME_LEN: usize = 16;

bitflags! {
    /// Which ways of giving up the CPU cost a process one priority level.
    pub struct DemoteOn: u8 {
        /// The timer reported the process used up its quantum.
        const QUANTUM_EXPIRED = 1 << 0;
        /// The process called yield on its own.
        const VOLUNTARY       = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// Timer ticks a process may run before it is asked to yield.
    pub quantum_ticks: u32,
    /// Ticks between automatic boosts; 0 leaves boosting to the caller.
    pub boost_interval: u64,
    pub demote_on: DemoteOn,
}

impl SchedConfig {
    pub const fn new() -> Self {
        Self {
            quantum_ticks: 1,
            boost_interval: 100,
            demote_on: DemoteOn::all(),
        }
    }

    pub const fn with_quantum_ticks(mut self, ticks: u32) -> Self {
        self.quantum_ticks = if ticks == 0 { 1 } else { ticks };
        self
    }

    pub const fn with_boost_interval(mut self, ticks: u64) -> Self {
        self.boost_interval = ticks;
        self
    }

    pub const fn with_demote_on(mut self, demote_on: DemoteOn) -> Self {
        self.demote_on = demote_on;
        self
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_demote_on_every_yield() {
        let config = SchedConfig::default();
        assert_eq!(config.quantum_ticks, 1);
        assert!(config.demote_on.contains(DemoteOn::QUANTUM_EXPIRED | DemoteOn::VOLUNTARY));
    }

    #[test]
    fn zero_quantum_is_clamped() {
        assert_eq!(SchedConfig::new().with_quantum_ticks(0).quantum_ticks, 1);
    }
}
