// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Per-CPU register contexts which the monitor saves and restores on every world switch.

use crate::{
    platform::{Platform, PlatformImpl, exception_free},
    stacks,
};
use arm32_sysregs::{Cpsr, Mode, Mpidr, read_mpidr};
use core::cell::{RefCell, RefMut};
use log::{debug, info};
use percore::{Cores, ExceptionFree, ExceptionLock, PerCore};

/// Per-core mutable state.
pub type PerCoreState<T> =
    PerCore<[ExceptionLock<RefCell<T>>; PlatformImpl::CORE_COUNT], CoresImpl>;

/// Implementation of the `Cores` trait to get the index of the current CPU core.
pub struct CoresImpl;

// SAFETY: This implementation never returns the same index for different cores because
// `core_position` is guaranteed not to for valid MPIDR values, and `core_index_of` rejects
// everything else.
unsafe impl Cores for CoresImpl {
    fn core_index() -> usize {
        core_index_of(read_mpidr())
    }
}

/// Returns the linear index of the core with the given MPIDR, panicking if it doesn't belong to
/// this platform.
fn core_index_of(mpidr: Mpidr) -> usize {
    assert!(
        PlatformImpl::mpidr_is_valid(mpidr),
        "Invalid MPIDR {:#010x}",
        mpidr.bits()
    );
    let index = PlatformImpl::core_position(mpidr);
    assert!(index < PlatformImpl::CORE_COUNT);
    index
}

/// The banked registers of the modes other than monitor mode.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct SmModeRegs {
    pub usr_sp: u32,
    pub usr_lr: u32,
    pub irq_spsr: u32,
    pub irq_sp: u32,
    pub irq_lr: u32,
    pub fiq_spsr: u32,
    pub fiq_sp: u32,
    pub fiq_lr: u32,
    pub svc_spsr: u32,
    pub svc_sp: u32,
    pub svc_lr: u32,
    pub abt_spsr: u32,
    pub abt_sp: u32,
    pub abt_lr: u32,
    pub und_spsr: u32,
    pub und_sp: u32,
    pub und_lr: u32,
}

impl SmModeRegs {
    const EMPTY: Self = Self {
        usr_sp: 0,
        usr_lr: 0,
        irq_spsr: 0,
        irq_sp: 0,
        irq_lr: 0,
        fiq_spsr: 0,
        fiq_sp: 0,
        fiq_lr: 0,
        svc_spsr: 0,
        svc_sp: 0,
        svc_lr: 0,
        abt_spsr: 0,
        abt_sp: 0,
        abt_lr: 0,
        und_spsr: 0,
        und_sp: 0,
        und_lr: 0,
    };
}

/// The state of the normal world while the secure world runs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct NsecCtx {
    pub mode_regs: SmModeRegs,
    /// Where the normal world continues.
    pub mon_lr: u32,
    /// The CPSR the normal world continues with.
    pub mon_spsr: u32,
    /// r4 to r12. r0 to r3 carry the call arguments and results.
    pub r: [u32; 9],
}

/// The state of the secure world while the normal world runs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct SecCtx {
    pub mode_regs: SmModeRegs,
    pub mon_lr: u32,
    pub mon_spsr: u32,
}

/// The normal world state at the moment a FIQ was taken to the monitor, restored in full once
/// the secure world has handled it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct PreFiqCtx {
    pub cpsr: u32,
    pub r: [u32; 8],
    pub mon_lr: u32,
    pub mon_spsr: u32,
}

/// The monitor's view of one CPU.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SmContext {
    pub nsec: NsecCtx,
    pub sec: SecCtx,
    pub pre_fiq: PreFiqCtx,
}

impl SmContext {
    const EMPTY: Self = Self {
        nsec: NsecCtx {
            mode_regs: SmModeRegs::EMPTY,
            mon_lr: 0,
            mon_spsr: 0,
            r: [0; 9],
        },
        sec: SecCtx {
            mode_regs: SmModeRegs::EMPTY,
            mon_lr: 0,
            mon_spsr: 0,
        },
        pre_fiq: PreFiqCtx {
            cpsr: 0,
            r: [0; 8],
            mon_lr: 0,
            mon_spsr: 0,
        },
    };

    /// Sets where the normal world starts running on its first entry.
    ///
    /// It starts in SVC mode with IRQ and FIQ masked.
    pub fn set_nsec_entry(&mut self, entry: u32) {
        self.nsec.mon_lr = entry;
        self.nsec.mon_spsr = (Cpsr::F | Cpsr::I).with_mode(Mode::Svc).bits();
    }
}

static SM: PerCoreState<SmContext> = PerCore::new(
    [const { ExceptionLock::new(RefCell::new(SmContext::EMPTY)) }; PlatformImpl::CORE_COUNT],
);

/// Returns a reference to the `SmContext` for the current CPU.
///
/// Panics if the `SmContext` is already borrowed.
pub fn sm_context(token: ExceptionFree) -> RefMut<SmContext> {
    SM.get().borrow_mut(token)
}

/// Returns a raw pointer to the normal world context of the current CPU, for the monitor vector.
#[unsafe(no_mangle)]
pub extern "C" fn sm_get_nsec_ctx() -> *mut NsecCtx {
    // SAFETY: The pointer from `SM.get().as_ptr()` is always valid. We avoid creating any
    // intermediate references by taking the address of the field directly.
    unsafe { &raw mut (*SM.get().as_ptr()).nsec }
}

/// Returns a raw pointer to the secure world context of the current CPU, for the monitor vector.
#[unsafe(no_mangle)]
pub extern "C" fn sm_get_sec_ctx() -> *mut SecCtx {
    // SAFETY: As for `sm_get_nsec_ctx`.
    unsafe { &raw mut (*SM.get().as_ptr()).sec }
}

/// Returns a raw pointer to the pre-FIQ context of the current CPU, for the monitor vector.
#[unsafe(no_mangle)]
pub extern "C" fn sm_get_pre_fiq_ctx() -> *mut PreFiqCtx {
    // SAFETY: As for `sm_get_nsec_ctx`.
    unsafe { &raw mut (*SM.get().as_ptr()).pre_fiq }
}

/// Installs the monitor vector table and the monitor stack of the current CPU.
pub fn init(mon_sp: usize) {
    debug!("Monitor stack {mon_sp:#x} on core {}", CoresImpl::core_index());
    #[cfg(all(target_arch = "arm", not(test)))]
    // SAFETY: The vector table is valid for the life of the program, and the stack is reserved
    // for this CPU's monitor mode.
    unsafe {
        asm::install(mon_sp);
    }
    info!("Secure monitor initialised");
}

/// Sets the normal world entry point of the current CPU.
pub fn set_nsec_entry(entry: u32) {
    exception_free(|token| sm_context(token).set_nsec_entry(entry));
}

/// Returns the top of the monitor stack of the current CPU.
pub fn mon_stack_top() -> usize {
    stacks::mon_stack_top(CoresImpl::core_index())
}

#[cfg(all(target_arch = "arm", not(test)))]
mod asm {
    use super::*;
    use crate::smccc::{
        SMC_CALL_HANDLE_FIQ, SMC_CALL_REQUEST_RPC, SMC_CALL_RETURN, SMC_CALL_RETURN_FROM_FIQ,
        SMC_CALL_UNKNOWN,
    };
    use arm32_sysregs::write_mvbar;
    use core::{arch::{asm, global_asm}, mem::offset_of};

    const SCR_NS: u32 = 1 << 0;
    const SCR_FIQ: u32 = 1 << 2;

    unsafe extern "C" {
        static sm_vect_table: u32;
    }

    global_asm!(
        ".section .text.sm_vect, \"ax\"",
        ".arm",
        ".balign 32",
        ".global sm_vect_table",
        "sm_vect_table:",
        "b .", // Reset
        "b .", // Undefined instruction
        "b sm_smc_entry",
        "b .", // Prefetch abort
        "b .", // Data abort
        "b .", // Reserved
        "b .", // IRQ
        "b sm_fiq_entry",
        "",
        // Saves the banked registers of every mode to the `SmModeRegs` at r0.
        // Clobbers r0 to r3.
        "sm_save_modes:",
        "mov r2, lr",
        "cps #{MODE_SYS}",
        "mov r3, sp",
        "stm r0!, {{r3, lr}}",
        "cps #{MODE_IRQ}",
        "mrs r1, spsr",
        "mov r3, sp",
        "stm r0!, {{r1, r3, lr}}",
        "cps #{MODE_FIQ}",
        "mrs r1, spsr",
        "mov r3, sp",
        "stm r0!, {{r1, r3, lr}}",
        "cps #{MODE_SVC}",
        "mrs r1, spsr",
        "mov r3, sp",
        "stm r0!, {{r1, r3, lr}}",
        "cps #{MODE_ABT}",
        "mrs r1, spsr",
        "mov r3, sp",
        "stm r0!, {{r1, r3, lr}}",
        "cps #{MODE_UND}",
        "mrs r1, spsr",
        "mov r3, sp",
        "stm r0!, {{r1, r3, lr}}",
        "cps #{MODE_MON}",
        "bx r2",
        "",
        // Restores the banked registers of every mode from the `SmModeRegs` at r0.
        // Clobbers r0 to r3.
        "sm_restore_modes:",
        "mov r2, lr",
        "cps #{MODE_SYS}",
        "ldm r0!, {{r3, lr}}",
        "mov sp, r3",
        "cps #{MODE_IRQ}",
        "ldm r0!, {{r1, r3, lr}}",
        "msr spsr_fsxc, r1",
        "mov sp, r3",
        "cps #{MODE_FIQ}",
        "ldm r0!, {{r1, r3, lr}}",
        "msr spsr_fsxc, r1",
        "mov sp, r3",
        "cps #{MODE_SVC}",
        "ldm r0!, {{r1, r3, lr}}",
        "msr spsr_fsxc, r1",
        "mov sp, r3",
        "cps #{MODE_ABT}",
        "ldm r0!, {{r1, r3, lr}}",
        "msr spsr_fsxc, r1",
        "mov sp, r3",
        "cps #{MODE_UND}",
        "ldm r0!, {{r1, r3, lr}}",
        "msr spsr_fsxc, r1",
        "mov sp, r3",
        "cps #{MODE_MON}",
        "bx r2",
        "",
        // Monitor stack while handling a call:
        // [sp] r0, r1, r2, r3, r12, lr_mon, spsr_mon
        "sm_smc_entry:",
        "srsdb sp!, #{MODE_MON}",
        "push {{r0-r3, r12}}",
        "mrc p15, 0, r0, c1, c1, 0",
        "tst r0, #1",
        "bne .Lsmc_from_nsec",
        "",
        // From the secure world: save its state, then decide where to go.
        "bl {sm_get_sec_ctx}",
        "ldr r2, [sp, #20]",
        "ldr r3, [sp, #24]",
        "add r1, r0, #{SEC_MON_LR}",
        "stm r1, {{r2, r3}}",
        "bl sm_save_modes",
        "ldr r0, [sp]",
        "ldr r1, ={SMC_CALL_RETURN}",
        "cmp r0, r1",
        "ldrne r1, ={SMC_CALL_REQUEST_RPC}",
        "cmpne r0, r1",
        "beq .Lsec_return",
        "ldr r1, ={SMC_CALL_RETURN_FROM_FIQ}",
        "cmp r0, r1",
        "beq .Lsec_return_from_fiq",
        // Anything else goes straight back to the secure world.
        "ldr r0, ={SMC_CALL_UNKNOWN}",
        "str r0, [sp]",
        "pop {{r0-r3, r12}}",
        "rfeia sp!",
        "",
        // Results in a1 to a7 reach the normal world in r0 to r6.
        ".Lsec_return:",
        "mov r0, #{SCR_NSEC}",
        "mcr p15, 0, r0, c1, c1, 0",
        "isb",
        "bl {sm_get_nsec_ctx}",
        "mov r8, r0",
        "bl sm_restore_modes",
        "add lr, r8, #{NSEC_MON_LR}",
        "ldm lr, {{r2, r3}}",
        "str r2, [sp, #20]",
        "str r3, [sp, #24]",
        "mov r3, r4",
        "mov r4, r5",
        "mov r5, r6",
        "mov r6, r7",
        "add lr, r8, #{NSEC_R7}",
        "ldm lr, {{r7-r12}}",
        "ldr r0, [sp, #4]",
        "ldr r1, [sp, #8]",
        "ldr r2, [sp, #12]",
        "add sp, sp, #20",
        "rfeia sp!",
        "",
        // The normal world continues exactly where the FIQ interrupted it.
        ".Lsec_return_from_fiq:",
        "mov r0, #{SCR_NSEC}",
        "mcr p15, 0, r0, c1, c1, 0",
        "isb",
        "bl {sm_get_nsec_ctx}",
        "mov r8, r0",
        "bl sm_restore_modes",
        "bl {sm_get_pre_fiq_ctx}",
        "add lr, r0, #{PRE_FIQ_MON_LR}",
        "ldm lr, {{r2, r3}}",
        "str r2, [sp, #20]",
        "str r3, [sp, #24]",
        "add lr, r0, #{PRE_FIQ_R0}",
        "ldm lr, {{r0-r7}}",
        "add lr, r8, #{NSEC_R8}",
        "ldm lr, {{r8-r12}}",
        "add sp, sp, #20",
        "rfeia sp!",
        "",
        // From the normal world: save its state and pass the call to the secure world.
        ".Lsmc_from_nsec:",
        "bl {sm_get_nsec_ctx}",
        "add r1, r0, #{NSEC_R4}",
        "stm r1, {{r4-r11}}",
        "ldr r2, [sp, #16]",
        "str r2, [r1, #32]",
        "ldr r2, [sp, #20]",
        "ldr r3, [sp, #24]",
        "add r1, r0, #{NSEC_MON_LR}",
        "stm r1, {{r2, r3}}",
        "bl sm_save_modes",
        ".Lenter_sec:",
        "mov r0, #0",
        "mcr p15, 0, r0, c1, c1, 0",
        "isb",
        "bl {sm_get_sec_ctx}",
        "mov r8, r0",
        "bl sm_restore_modes",
        "add lr, r8, #{SEC_MON_LR}",
        "ldm lr, {{r2, r3}}",
        "str r2, [sp, #20]",
        "str r3, [sp, #24]",
        "pop {{r0-r3, r12}}",
        "rfeia sp!",
        "",
        // FIQs are only routed to the monitor while the normal world runs.
        "sm_fiq_entry:",
        "sub lr, lr, #4",
        "srsdb sp!, #{MODE_MON}",
        "push {{r0-r3, r12}}",
        "bl {sm_get_pre_fiq_ctx}",
        "mrs r1, cpsr",
        "str r1, [r0]",
        "add r0, r0, #{PRE_FIQ_R0}",
        "ldm sp, {{r1-r3}}",
        "stm r0!, {{r1-r3}}",
        "ldr r1, [sp, #12]",
        "stm r0!, {{r1, r4-r7}}",
        "ldr r1, [sp, #20]",
        "ldr r2, [sp, #24]",
        "stm r0, {{r1, r2}}",
        "bl {sm_get_nsec_ctx}",
        "add r1, r0, #{NSEC_R4}",
        "stm r1, {{r4-r11}}",
        "ldr r2, [sp, #16]",
        "str r2, [r1, #32]",
        "bl sm_save_modes",
        "ldr r0, ={SMC_CALL_HANDLE_FIQ}",
        "str r0, [sp]",
        "b .Lenter_sec",
        ".ltorg",
        MODE_SYS = const Mode::Sys as u32,
        MODE_IRQ = const Mode::Irq as u32,
        MODE_FIQ = const Mode::Fiq as u32,
        MODE_SVC = const Mode::Svc as u32,
        MODE_ABT = const Mode::Abt as u32,
        MODE_UND = const Mode::Und as u32,
        MODE_MON = const Mode::Mon as u32,
        SCR_NSEC = const SCR_NS | SCR_FIQ,
        NSEC_R4 = const offset_of!(NsecCtx, r),
        NSEC_R7 = const offset_of!(NsecCtx, r) + 3 * 4,
        NSEC_R8 = const offset_of!(NsecCtx, r) + 4 * 4,
        NSEC_MON_LR = const offset_of!(NsecCtx, mon_lr),
        SEC_MON_LR = const offset_of!(SecCtx, mon_lr),
        PRE_FIQ_R0 = const offset_of!(PreFiqCtx, r),
        PRE_FIQ_MON_LR = const offset_of!(PreFiqCtx, mon_lr),
        SMC_CALL_RETURN = const SMC_CALL_RETURN.0,
        SMC_CALL_REQUEST_RPC = const SMC_CALL_REQUEST_RPC.0,
        SMC_CALL_RETURN_FROM_FIQ = const SMC_CALL_RETURN_FROM_FIQ.0,
        SMC_CALL_HANDLE_FIQ = const SMC_CALL_HANDLE_FIQ.0,
        SMC_CALL_UNKNOWN = const SMC_CALL_UNKNOWN.0,
        sm_get_nsec_ctx = sym sm_get_nsec_ctx,
        sm_get_sec_ctx = sym sm_get_sec_ctx,
        sm_get_pre_fiq_ctx = sym sm_get_pre_fiq_ctx,
    );

    /// Points MVBAR at the monitor vector table and sets the monitor mode stack pointer.
    ///
    /// # Safety
    ///
    /// `mon_sp` must be the top of a stack reserved for this CPU's monitor mode.
    pub unsafe fn install(mon_sp: usize) {
        // SAFETY: `sm_vect_table` is a valid monitor vector table.
        unsafe {
            write_mvbar((&raw const sm_vect_table) as u32);
        }
        // SAFETY: Only the banked monitor stack pointer changes, and the caller promises it is
        // valid. Interrupts are masked while in monitor mode.
        unsafe {
            asm!(
                "mrs {tmp}, cpsr",
                "cps #{MODE_MON}",
                "mov sp, {sp}",
                "msr cpsr_c, {tmp}",
                tmp = out(reg) _,
                sp = in(reg) mon_sp,
                MODE_MON = const Mode::Mon as u32,
                options(nostack),
            );
        }
    }
}
