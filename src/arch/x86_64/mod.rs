#[inline]
pub(crate) fn is_int_enabled() -> bool {
    let flags: u64;
    unsafe {
        core::arch::asm!(
            "pushfq",
            "pop {}",
            out(reg) flags
        )
    };
    flags & (1 << 9) != 0
}

#[inline]
pub(crate) fn enable_interrupts() {
    unsafe {
        core::arch::asm!("sti");
    }
}

#[inline]
pub(crate) fn disable_interrupts() {
    unsafe {
        core::arch::asm!("cli");
    }
}
