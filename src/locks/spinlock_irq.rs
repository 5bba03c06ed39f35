use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::{disable_interrupts, enable_interrupts, is_int_enabled};

// Interrupts safe version of SpinLock<T>
// To be used to lock the resources that are modifed/read from within an interrupt handler
// Locking disables interrupts, which are then restored once the Guard goes out of scope
#[derive(Debug)]
pub(crate) struct SpinLockIrq<T> {
    locked: AtomicBool,
    // shows if the interrupts were enabled at the moment when the lock is taken
    interrupts: AtomicBool,
    value: UnsafeCell<T>,
}

impl<T> SpinLockIrq<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            interrupts: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub(crate) fn lock(&self) -> GuardIrq<'_, T> {
        let interrupts_enabled = is_int_enabled();
        if interrupts_enabled {
            disable_interrupts();
        }

        while self.locked.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }
        // only the holder writes this, so a waiter can't clobber the holder's saved state
        self.interrupts.store(interrupts_enabled, Ordering::Relaxed);
        GuardIrq { lock: self }
    }

    pub(crate) fn try_lock(&self) -> Option<GuardIrq<'_, T>> {
        let interrupts_enabled = is_int_enabled();
        if interrupts_enabled {
            disable_interrupts();
        }

        if self.locked.swap(true, Ordering::Acquire) {
            if interrupts_enabled {
                enable_interrupts();
            }
            return None;
        }
        self.interrupts.store(interrupts_enabled, Ordering::Relaxed);
        Some(GuardIrq { lock: self })
    }

    // SAFETY:
    // the caller accepts that the value may be mid-update by the lock holder.
    // Only plain-old-data may be read through this reference.
    pub(crate) unsafe fn peek_unsynchronized(&self) -> &T {
        &*self.value.get()
    }
}

unsafe impl<T> Sync for SpinLockIrq<T> where T: Send {}

pub(crate) struct GuardIrq<'a, T> {
    lock: &'a SpinLockIrq<T>,
}

impl<T> Deref for GuardIrq<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for GuardIrq<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for GuardIrq<'_, T> {
    fn drop(&mut self) {
        let restore = self.lock.interrupts.load(Ordering::Relaxed);
        self.lock.locked.store(false, Ordering::Release);
        if restore {
            enable_interrupts();
        }
    }
}
