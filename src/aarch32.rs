// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Wrappers around AArch32 instructions which have no system register of their own.

#[cfg(all(target_arch = "arm", not(test)))]
use core::arch::asm;
#[cfg(not(test))]
use percore::ExceptionFree;

/// Issues a data synchronization barrier (`dsb`) instruction for the full system.
pub fn dsb() {
    // SAFETY: `dsb` does not violate safe Rust guarantees.
    #[cfg(all(target_arch = "arm", not(test)))]
    unsafe {
        asm!("dsb sy", options(nostack));
    }
}

/// Issues an instruction synchronization barrier (`isb`) instruction.
pub fn isb() {
    // SAFETY: `isb` does not violate safe Rust guarantees.
    #[cfg(all(target_arch = "arm", not(test)))]
    unsafe {
        asm!("isb", options(nostack));
    }
}

/// Invalidates the entire unified TLB (`TLBIALL`), then waits for the invalidation to complete.
pub fn tlb_invalidate_all() {
    // SAFETY: Invalidating TLB entries only forces translations to be reloaded from the tables,
    // which does not violate safe Rust guarantees.
    #[cfg(all(target_arch = "arm", not(test)))]
    unsafe {
        asm!(
            "mcr p15, 0, {zero}, c8, c7, 0",
            zero = in(reg) 0u32,
            options(nostack),
        );
    }
    dsb();
    isb();
}

/// Masks IRQ and FIQ on the current CPU.
pub fn mask_interrupts() {
    // SAFETY: Masking interrupts does not violate safe Rust guarantees.
    #[cfg(all(target_arch = "arm", not(test)))]
    unsafe {
        asm!("cpsid if", options(nostack));
    }
}

/// Waits for an interrupt.
pub fn wfi() {
    // SAFETY: `wfi` does not violate safe Rust guarantees.
    #[cfg(all(target_arch = "arm", not(test)))]
    unsafe {
        asm!("wfi", options(nomem, nostack, preserves_flags));
    }
}

/// Runs `f` with IRQ and FIQ masked, then restores the previous mask state.
#[cfg(not(test))]
pub fn exception_free<T>(f: impl FnOnce(ExceptionFree) -> T) -> T {
    #[cfg(target_arch = "arm")]
    let cpsr: u32;
    // SAFETY: Reading the CPSR and masking interrupts does not violate safe Rust guarantees.
    #[cfg(target_arch = "arm")]
    unsafe {
        asm!("mrs {cpsr}, cpsr", "cpsid if", cpsr = out(reg) cpsr, options(nostack));
    }

    // SAFETY: Interrupts are masked until the token is dropped at the end of this function, and
    // the token doesn't escape `f`.
    let token = unsafe { ExceptionFree::new() };
    let result = f(token);

    // SAFETY: Restoring the saved mask bits does not violate safe Rust guarantees.
    #[cfg(target_arch = "arm")]
    unsafe {
        asm!("msr cpsr_c, {cpsr}", cpsr = in(reg) cpsr, options(nostack));
    }
    result
}
