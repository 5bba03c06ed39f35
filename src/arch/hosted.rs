use core::sync::atomic::{AtomicBool, Ordering};

// Stand-in for the IF bit when running on top of another operating system.
// There is one flag for the whole program; it only mirrors what the lock code asked for.
static INTERRUPTS: AtomicBool = AtomicBool::new(true);

#[inline]
pub(crate) fn is_int_enabled() -> bool {
    INTERRUPTS.load(Ordering::Relaxed)
}

#[inline]
pub(crate) fn enable_interrupts() {
    INTERRUPTS.store(true, Ordering::Relaxed);
}

#[inline]
pub(crate) fn disable_interrupts() {
    INTERRUPTS.store(false, Ordering::Relaxed);
}
