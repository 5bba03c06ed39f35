mod spinlock_irq;

pub(crate) use spin::Mutex as SpinLock;
pub(crate) use spinlock_irq::{GuardIrq, SpinLockIrq};
