// Interrupt-enable control for the execution unit the caller runs on.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod x86_64;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub(crate) use x86_64::{disable_interrupts, enable_interrupts, is_int_enabled};

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod hosted;
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub(crate) use hosted::{disable_interrupts, enable_interrupts, is_int_enabled};
