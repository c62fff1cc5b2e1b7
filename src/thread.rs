// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The pool of threads which run standard calls, and the dispatcher which hands SMCs to them.

mod handlers;

pub use handlers::{
    AbortType, ThreadAbortRegs, ThreadHandlers, ThreadSvcRegs, handlers, init_handlers,
};

use crate::{
    platform::{Platform, PlatformImpl, exception_free},
    sm::CoresImpl,
    smccc::{
        RpcReason, SMC_CALL_HANDLE_FIQ, SMC_CALL_RETURN, SMC_CALL_RETURN_FROM_FIQ,
        SMC_CALL_RETURN_FROM_RPC, SmcArgs, TrustedOsReturn,
    },
    stacks,
};
use arm32_sysregs::{Cpsr, Mode};
use bitflags::bitflags;
use core::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};
use log::{debug, trace, warn};
use percore::Cores;
use spin::{Lazy, mutex::SpinMutex};
use thiserror::Error;

/// Stack ID of the current CPU's temporary stack.
pub const THREAD_TMP_STACK: u32 = 0xffff_ffff;
/// Stack ID of the current CPU's abort stack.
pub const THREAD_ABT_STACK: u32 = 0xffff_fffe;

const NO_THREAD: usize = usize::MAX;

static THREADS: Lazy<Threads<{ PlatformImpl::THREAD_COUNT }, { PlatformImpl::CORE_COUNT }>> =
    Lazy::new(|| Threads::new(std_entry_address()));

/// The lifecycle state of a thread.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ThreadState {
    #[default]
    Free,
    Active,
    Suspended,
}

bitflags! {
    /// Flags recorded when a thread suspends.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ThreadFlags: u32 {
        /// Copy the arguments of the resuming call into the thread's registers.
        const COPY_ARGS_ON_RETURN = 1 << 0;
        const EXIT_ON_IRQ = 1 << 2;
    }
}

/// The saved execution state of a thread, in the layout `thread_resume` expects.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct ThreadCtxRegs {
    pub r: [u32; 13],
    pub usr_sp: u32,
    pub usr_lr: u32,
    pub svc_spsr: u32,
    pub svc_sp: u32,
    pub svc_lr: u32,
    pub pc: u32,
    pub cpsr: u32,
}

impl ThreadCtxRegs {
    /// Loads the SMC arguments into r0 to r7, where the thread will see them as its own arguments.
    fn copy_args(&mut self, args: &SmcArgs) {
        self.r[..8].copy_from_slice(&args.to_array());
    }
}

/// Thread specific data, with the function which releases it.
#[derive(Debug)]
pub struct Tsd {
    data: NonNull<()>,
    free: Option<fn(NonNull<()>)>,
}

// SAFETY: The data is only ever handed to the thread which set it, or to its destructor, and
// accesses are serialised by the thread lock.
unsafe impl Send for Tsd {}

impl Tsd {
    /// Wraps `data`, to be released by `free` if given.
    pub fn new(data: NonNull<()>, free: Option<fn(NonNull<()>)>) -> Self {
        Self { data, free }
    }

    /// Runs the destructor, if any.
    pub fn release(self) {
        if let Some(free) = self.free {
            free(self.data);
        }
    }
}

#[derive(Debug)]
struct Thread {
    state: ThreadState,
    regs: ThreadCtxRegs,
    stack_va_end: usize,
    flags: ThreadFlags,
    hyp_clnt_id: u32,
    tsd: Option<Tsd>,
}

impl Thread {
    const FREE: Self = Self {
        state: ThreadState::Free,
        regs: ThreadCtxRegs {
            r: [0; 13],
            usr_sp: 0,
            usr_lr: 0,
            svc_spsr: 0,
            svc_sp: 0,
            svc_lr: 0,
            pc: 0,
            cpsr: 0,
        },
        stack_va_end: 0,
        flags: ThreadFlags::empty(),
        hyp_clnt_id: 0,
        tsd: None,
    };
}

/// A linear CPU index, checked against the number of cores when it is created.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CoreId(usize);

impl CoreId {
    /// Returns the index of the CPU this is running on.
    pub fn current() -> Self {
        Self(CoresImpl::core_index())
    }

    #[cfg(test)]
    fn new(index: usize) -> Self {
        Self(index)
    }
}

#[derive(Debug)]
struct CoreLocal {
    curr_thread: AtomicUsize,
    tmp_stack_va_end: AtomicUsize,
}

impl CoreLocal {
    const fn new() -> Self {
        Self {
            curr_thread: AtomicUsize::new(NO_THREAD),
            tmp_stack_va_end: AtomicUsize::new(0),
        }
    }

    fn current(&self) -> Option<usize> {
        match self.curr_thread.load(Ordering::Relaxed) {
            NO_THREAD => None,
            index => Some(index),
        }
    }

    fn set_current(&self, thread: Option<usize>) {
        self.curr_thread
            .store(thread.unwrap_or(NO_THREAD), Ordering::Relaxed);
    }
}

/// Identifies one of the stacks which `init_stack` can assign.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StackId {
    /// The stack of the thread with the given index.
    Thread(usize),
    /// The current CPU's temporary stack, used by fast calls and the dispatcher.
    Temporary,
    /// The current CPU's abort stack.
    Abort,
}

impl From<u32> for StackId {
    fn from(value: u32) -> Self {
        match value {
            THREAD_TMP_STACK => Self::Temporary,
            THREAD_ABT_STACK => Self::Abort,
            index => Self::Thread(index as usize),
        }
    }
}

/// An error assigning a stack.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum ThreadError {
    #[error("No thread with index {0}")]
    InvalidStackId(usize),
    #[error("Thread is in use")]
    ThreadNotFree,
}

/// What the dispatcher does once it has handled an SMC.
#[derive(Debug, Eq, PartialEq)]
pub enum SmcOutcome {
    /// Return to the monitor with the updated arguments.
    Return,
    /// Switch to the given thread context, which is now active on this CPU.
    Resume(ThreadCtxRegs),
}

/// A fixed pool of `N` threads shared by `C` CPUs.
pub struct Threads<const N: usize, const C: usize> {
    threads: SpinMutex<[Thread; N]>,
    core_local: [CoreLocal; C],
    /// Where a newly allocated thread starts running.
    std_entry: u32,
}

impl<const N: usize, const C: usize> Threads<N, C> {
    /// Creates a pool of free threads which start standard calls at `std_entry`.
    pub const fn new(std_entry: u32) -> Self {
        Self {
            threads: SpinMutex::new([Thread::FREE; N]),
            core_local: [const { CoreLocal::new() }; C],
            std_entry,
        }
    }

    fn core_local(&self, core: CoreId) -> &CoreLocal {
        &self.core_local[core.0]
    }

    /// Dispatches an SMC trapped from the monitor.
    pub fn handle_smc_call(
        &self,
        core: CoreId,
        args: &mut SmcArgs,
        handlers: &dyn ThreadHandlers,
    ) -> SmcOutcome {
        let function = args.function();
        if function.is_fast() {
            if function == SMC_CALL_HANDLE_FIQ {
                handlers.fiq();
                args.a0 = SMC_CALL_RETURN_FROM_FIQ.0;
            } else {
                trace!("Fast call {function}");
                handlers.fastcall(args);
                args.a0 = SMC_CALL_RETURN.0;
            }
            SmcOutcome::Return
        } else if function == SMC_CALL_RETURN_FROM_RPC {
            self.resume_from_rpc(core, args)
        } else {
            self.alloc_and_run(core, args)
        }
    }

    /// Claims the first free thread for a standard call and prepares it to start at the standard
    /// call entry point.
    ///
    /// Panics if this CPU already has an active thread.
    fn alloc_and_run(&self, core: CoreId, args: &mut SmcArgs) -> SmcOutcome {
        let local = self.core_local(core);
        assert_eq!(local.current(), None, "Nested standard call on {core:?}");

        let claimed = {
            let mut threads = self.threads.lock();
            let index = threads
                .iter()
                .position(|thread| thread.state == ThreadState::Free);
            if let Some(index) = index {
                threads[index].state = ThreadState::Active;
            }
            index
        };
        let Some(index) = claimed else {
            debug!("No free thread for standard call {}", args.function());
            args.reject(TrustedOsReturn::NoThread);
            return SmcOutcome::Return;
        };
        local.set_current(Some(index));

        let mut threads = self.threads.lock();
        let thread = &mut threads[index];
        let mut cpsr = Cpsr::empty().with_mode(Mode::Svc);
        if self.std_entry & 1 != 0 {
            cpsr |= Cpsr::T;
        }
        thread.regs.pc = self.std_entry;
        thread.regs.cpsr = cpsr.bits();
        thread.regs.svc_sp = thread.stack_va_end as u32;
        thread.regs.copy_args(args);
        thread.hyp_clnt_id = args.a7;
        trace!("Thread {index} runs {} on {core:?}", args.function());
        SmcOutcome::Resume(thread.regs)
    }

    /// Reactivates the suspended thread named in `a4`, if it belongs to the client in `a7`.
    ///
    /// Panics if this CPU already has an active thread.
    fn resume_from_rpc(&self, core: CoreId, args: &mut SmcArgs) -> SmcOutcome {
        let local = self.core_local(core);
        assert_eq!(local.current(), None, "Nested resume on {core:?}");

        let index = args.a4 as usize;
        let mut threads = self.threads.lock();
        let resumable = threads.get(index).is_some_and(|thread| {
            thread.state == ThreadState::Suspended && thread.hyp_clnt_id == args.a7
        });
        if !resumable {
            drop(threads);
            warn!("Refusing to resume thread {index} for client {:#x}", args.a7);
            args.reject(TrustedOsReturn::BadThread);
            return SmcOutcome::Return;
        }

        let thread = &mut threads[index];
        thread.state = ThreadState::Active;
        if thread.flags.contains(ThreadFlags::COPY_ARGS_ON_RETURN) {
            thread.regs.copy_args(args);
            thread.flags.remove(ThreadFlags::COPY_ARGS_ON_RETURN);
        }
        local.set_current(Some(index));
        SmcOutcome::Resume(thread.regs)
    }

    /// Suspends the thread active on `core`, which will continue at `pc` with `cpsr` when it is
    /// resumed. Returns the thread's index.
    ///
    /// Only `COPY_ARGS_ON_RETURN` is taken from `flags`.
    pub fn suspend(&self, core: CoreId, flags: ThreadFlags, cpsr: u32, pc: u32) -> u32 {
        let local = self.core_local(core);
        let Some(index) = local.current() else {
            panic!("Suspend without an active thread on {core:?}");
        };

        let mut threads = self.threads.lock();
        let thread = &mut threads[index];
        assert_eq!(thread.state, ThreadState::Active);
        thread.flags.set(
            ThreadFlags::COPY_ARGS_ON_RETURN,
            flags.contains(ThreadFlags::COPY_ARGS_ON_RETURN),
        );
        thread.regs.cpsr = cpsr;
        thread.regs.pc = pc;
        thread.state = ThreadState::Suspended;
        local.set_current(None);
        index as u32
    }

    /// Returns the thread active on `core` to the pool, handing back any thread specific data it
    /// still holds so the caller can release it.
    pub fn free(&self, core: CoreId) -> Option<Tsd> {
        let local = self.core_local(core);
        let Some(index) = local.current() else {
            panic!("Free without an active thread on {core:?}");
        };

        let mut threads = self.threads.lock();
        let thread = &mut threads[index];
        assert_eq!(thread.state, ThreadState::Active);
        thread.state = ThreadState::Free;
        thread.flags = ThreadFlags::empty();
        local.set_current(None);
        thread.tsd.take()
    }

    /// Records the full register state of the thread active on `core`.
    pub fn save_ctx_regs(&self, core: CoreId, regs: &ThreadCtxRegs) {
        let Some(index) = self.core_local(core).current() else {
            panic!("Saving registers without an active thread on {core:?}");
        };
        self.threads.lock()[index].regs = *regs;
    }

    /// Returns the top of `core`'s temporary stack.
    pub fn tmp_sp(&self, core: CoreId) -> usize {
        self.core_local(core)
            .tmp_stack_va_end
            .load(Ordering::Relaxed)
    }

    /// Assigns the stack with top `sp`.
    ///
    /// A thread's stack can only be changed while the thread is free. Assigning the temporary stack
    /// also marks `core` as having no active thread.
    pub fn init_stack(&self, core: CoreId, id: StackId, sp: usize) -> Result<(), ThreadError> {
        let local = self.core_local(core);
        match id {
            StackId::Temporary => {
                local.tmp_stack_va_end.store(sp, Ordering::Relaxed);
                local.set_current(None);
            }
            // Only banked into the abort and undefined modes, by the `init_stack` wrapper.
            StackId::Abort => {}
            StackId::Thread(index) => {
                let mut threads = self.threads.lock();
                let thread = threads
                    .get_mut(index)
                    .ok_or(ThreadError::InvalidStackId(index))?;
                if thread.state != ThreadState::Free {
                    return Err(ThreadError::ThreadNotFree);
                }
                thread.stack_va_end = sp;
            }
        }
        Ok(())
    }

    /// Attaches thread specific data to the thread active on `core`, returning what was there
    /// before.
    ///
    /// Panics if no thread is active on `core`.
    pub fn set_tsd(&self, core: CoreId, tsd: Tsd) -> Option<Tsd> {
        let Some(index) = self.core_local(core).current() else {
            panic!("Setting thread data without an active thread on {core:?}");
        };
        let mut threads = self.threads.lock();
        assert_eq!(threads[index].state, ThreadState::Active);
        threads[index].tsd.replace(tsd)
    }

    /// Returns the thread specific data of the thread active on `core`, if any.
    pub fn get_tsd(&self, core: CoreId) -> Option<NonNull<()>> {
        let index = self.core_local(core).current()?;
        let threads = self.threads.lock();
        let thread = &threads[index];
        if thread.state != ThreadState::Active {
            return None;
        }
        thread.tsd.as_ref().map(|tsd| tsd.data)
    }

    /// Detaches the thread specific data of the thread active on `core`.
    pub fn take_tsd(&self, core: CoreId) -> Option<Tsd> {
        let index = self.core_local(core).current()?;
        self.threads.lock()[index].tsd.take()
    }

    #[cfg(test)]
    fn thread_state(&self, index: usize) -> ThreadState {
        self.threads.lock()[index].state
    }

    #[cfg(test)]
    fn current_thread(&self, core: CoreId) -> Option<usize> {
        self.core_local(core).current()
    }

    #[cfg(test)]
    fn regs(&self, index: usize) -> ThreadCtxRegs {
        self.threads.lock()[index].regs
    }
}

#[cfg(all(target_arch = "arm", not(test)))]
use asm::std_entry_address;

#[cfg(not(all(target_arch = "arm", not(test))))]
fn std_entry_address() -> u32 {
    0x1000
}

/// Assigns the stack with the given ID and top `sp`, for the current CPU where it is per-CPU.
pub fn init_stack(id: StackId, sp: usize) -> Result<(), ThreadError> {
    THREADS.init_stack(CoreId::current(), id, sp)?;
    #[cfg(all(target_arch = "arm", not(test)))]
    match id {
        // SAFETY: The temporary and abort stacks are reserved for this CPU, and FIQ, abort and
        // undefined mode only run with their own stack.
        StackId::Temporary => unsafe { asm::set_mode_sp(Mode::Fiq, sp) },
        // SAFETY: As above.
        StackId::Abort => unsafe {
            asm::set_mode_sp(Mode::Abt, sp);
            asm::set_mode_sp(Mode::Und, sp);
        },
        StackId::Thread(_) => {}
    }
    debug!("Stack {id:?} top {sp:#x}");
    Ok(())
}

/// Attaches thread specific data to the calling thread, releasing any it replaces.
///
/// Panics if there is no active thread.
#[allow(unused)]
pub fn set_tsd(data: NonNull<()>, free: Option<fn(NonNull<()>)>) {
    let previous = exception_free(|_| THREADS.set_tsd(CoreId::current(), Tsd::new(data, free)));
    if let Some(previous) = previous {
        previous.release();
    }
}

/// Returns the calling thread's thread specific data, or `None` if there is no active thread.
#[allow(unused)]
pub fn get_tsd() -> Option<NonNull<()>> {
    exception_free(|_| THREADS.get_tsd(CoreId::current()))
}

/// Entry from `thread_return_to_monitor`, on the temporary stack with interrupts masked.
#[unsafe(no_mangle)]
extern "C" fn thread_handle_smc_call(args: *mut SmcArgs) {
    stacks::assert_canaries();
    // SAFETY: The assembly passes the arguments it pushed on this CPU's temporary stack, which
    // nothing else accesses until we return.
    let args = unsafe { &mut *args };
    match THREADS.handle_smc_call(CoreId::current(), args, handlers()) {
        SmcOutcome::Return => {}
        SmcOutcome::Resume(regs) => resume(&regs),
    }
}

#[cfg(all(target_arch = "arm", not(test)))]
fn resume(regs: &ThreadCtxRegs) -> ! {
    // SAFETY: The registers describe a thread which the pool has just made active on this CPU.
    unsafe { asm::thread_resume(regs) }
}

#[cfg(not(all(target_arch = "arm", not(test))))]
fn resume(regs: &ThreadCtxRegs) -> ! {
    panic!("Can't switch to thread at {:#x} on this architecture", regs.pc);
}

/// Runs a standard call on a thread stack, with interrupts unmasked.
#[unsafe(no_mangle)]
extern "C" fn thread_std_smc_handler(args: *mut SmcArgs) {
    // SAFETY: The assembly passes the arguments it pushed on the thread's own stack.
    let args = unsafe { &mut *args };
    handlers().stdcall(args);
    args.a0 = SMC_CALL_RETURN.0;
    if let Some(tsd) = exception_free(|_| THREADS.take_tsd(CoreId::current())) {
        tsd.release();
    }
}

/// Frees the thread which just finished a standard call, once it is off the thread's stack.
#[unsafe(no_mangle)]
extern "C" fn thread_state_free() {
    if let Some(tsd) = THREADS.free(CoreId::current()) {
        tsd.release();
    }
}

/// Suspends the current thread because of an IRQ, and fills in `args` to ask the normal world to
/// handle it and resume the thread.
#[unsafe(no_mangle)]
extern "C" fn thread_suspend_irq(args: *mut SmcArgs, cpsr: u32, pc: u32) {
    stacks::assert_canaries();
    let thread_id = THREADS.suspend(CoreId::current(), ThreadFlags::EXIT_ON_IRQ, cpsr, pc);
    trace!("Thread {thread_id} suspended for IRQ at {pc:#x}");
    // SAFETY: The assembly passes space for the arguments on the temporary stack.
    unsafe {
        args.write(SmcArgs::rpc_request(thread_id, RpcReason::Irq));
    }
}

#[unsafe(no_mangle)]
extern "C" fn thread_get_tmp_sp() -> usize {
    THREADS.tmp_sp(CoreId::current())
}

#[unsafe(no_mangle)]
extern "C" fn thread_save_ctx_regs(regs: *const ThreadCtxRegs) {
    // SAFETY: The assembly passes the frame it has just built on the thread's stack.
    let regs = unsafe { &*regs };
    THREADS.save_ctx_regs(CoreId::current(), regs);
}

#[unsafe(no_mangle)]
extern "C" fn thread_handle_fiq() {
    handlers().fiq();
}

#[unsafe(no_mangle)]
extern "C" fn thread_handle_svc(regs: *mut ThreadSvcRegs) {
    // SAFETY: The assembly passes the frame it has just built on the SVC stack.
    handlers().svc(unsafe { &mut *regs });
}

#[unsafe(no_mangle)]
extern "C" fn thread_handle_abort(abort_type: u32, regs: *mut ThreadAbortRegs) {
    let Ok(abort_type) = AbortType::try_from(abort_type) else {
        panic!("Unknown abort type {abort_type}");
    };
    // SAFETY: The assembly passes the frame it has just built on the abort stack.
    handlers().abort(abort_type, unsafe { &mut *regs });
}

#[cfg(all(target_arch = "arm", not(test)))]
mod asm {
    use super::ThreadCtxRegs;
    use crate::smccc::SmcArgs;
    use arm32_sysregs::{Mode, write_vbar};
    use core::{
        arch::{asm, global_asm},
        mem::{offset_of, size_of},
    };

    unsafe extern "C" {
        static thread_vect_table: u32;
        fn thread_std_smc_entry();
        #[link_name = "thread_resume"]
        fn thread_resume_asm(regs: *const ThreadCtxRegs) -> !;
    }

    global_asm!(
        ".section .text.thread_vect, \"ax\"",
        ".arm",
        ".balign 32",
        ".global thread_vect_table",
        "thread_vect_table:",
        "b .", // Reset
        "b thread_und_handler",
        "b thread_svc_handler",
        "b thread_pabort_handler",
        "b thread_dabort_handler",
        "b .", // Reserved
        "b thread_irq_handler",
        "b thread_fiq_handler",
        "",
        // Hands the results in r0-r7 to the monitor, then dispatches the next call on the way
        // back in. Runs on the temporary stack.
        ".global thread_return_to_monitor",
        "thread_return_to_monitor:",
        ".arch_extension sec",
        "smc #0",
        "push {{r0-r7}}",
        "mov r0, sp",
        "bl {thread_handle_smc_call}",
        "pop {{r0-r7}}",
        "b thread_return_to_monitor",
        "",
        // A new thread starts here with the call arguments in r0-r7.
        ".global thread_std_smc_entry",
        "thread_std_smc_entry:",
        "push {{r0-r7}}",
        "mov r0, sp",
        "bl {thread_std_smc_handler}",
        "cpsid if",
        "bl {thread_get_tmp_sp}",
        "mov r8, r0",
        "pop {{r0-r7}}",
        "mov sp, r8",
        "push {{r0-r7}}",
        "bl {thread_state_free}",
        "pop {{r0-r7}}",
        "b thread_return_to_monitor",
        "",
        // Switches to the `ThreadCtxRegs` at r0. Called in SVC mode.
        ".global thread_resume",
        "thread_resume:",
        "add r12, r0, #{USR_SP}",
        "cps #{MODE_SYS}",
        "ldm r12!, {{r1, r2}}",
        "mov sp, r1",
        "mov lr, r2",
        "cps #{MODE_SVC}",
        "ldm r12!, {{r1, r2, r3}}",
        "msr spsr_fsxc, r1",
        "mov sp, r2",
        "mov lr, r3",
        "ldm r12, {{r1, r2}}",
        "push {{r1, r2}}",
        "ldm r0, {{r0-r12}}",
        "rfefd sp!",
        "",
        // An IRQ interrupts a thread: save its state on its own stack, suspend it and ask the
        // normal world to handle the IRQ.
        "thread_irq_handler:",
        "sub lr, lr, #4",
        "srsdb sp!, #{MODE_SVC}",
        "cps #{MODE_SVC}",
        "cpsid f",
        "sub sp, sp, #{CTX_PC}",
        "stm sp, {{r0-r12}}",
        "mov r6, sp",
        "cps #{MODE_SYS}",
        "str sp, [r6, #{USR_SP}]",
        "str lr, [r6, #{USR_SP} + 4]",
        "cps #{MODE_SVC}",
        "mrs r1, spsr",
        "str r1, [r6, #{SVC_SPSR}]",
        "add r1, r6, #{CTX_SIZE}",
        "str r1, [r6, #{SVC_SPSR} + 4]",
        "str lr, [r6, #{SVC_SPSR} + 8]",
        "bic sp, sp, #7",
        "mov r0, r6",
        "bl {thread_save_ctx_regs}",
        "ldr r4, [r6, #{CTX_PC}]",
        "ldr r5, [r6, #{CTX_PC} + 4]",
        "bl {thread_get_tmp_sp}",
        "mov sp, r0",
        "sub sp, sp, #{ARGS_SIZE}",
        "mov r0, sp",
        "mov r1, r5",
        "mov r2, r4",
        "bl {thread_suspend_irq}",
        "pop {{r0-r7}}",
        "b thread_return_to_monitor",
        "",
        // FIQs run on the temporary stack.
        "thread_fiq_handler:",
        "sub lr, lr, #4",
        "push {{r0-r3, r12, lr}}",
        "bl {thread_handle_fiq}",
        "ldm sp!, {{r0-r3, r12, pc}}^",
        "",
        // Builds a `ThreadSvcRegs` on the SVC stack.
        "thread_svc_handler:",
        "sub sp, sp, #40",
        "stm sp, {{r0-r5}}",
        "str lr, [sp, #24]",
        "mrs r0, spsr",
        "str r0, [sp, #28]",
        "str r12, [sp, #32]",
        "mov r0, sp",
        "bl {thread_handle_svc}",
        "ldr r0, [sp, #28]",
        "msr spsr_fsxc, r0",
        "ldr lr, [sp, #24]",
        "ldr r12, [sp, #32]",
        "ldm sp, {{r0-r5}}",
        "add sp, sp, #40",
        "movs pc, lr",
        "",
        // Builds a `ThreadAbortRegs` on the abort stack, with lr adjusted to the address of the
        // faulting instruction.
        ".macro thread_abort_handler name, type, adjust",
        "\\name:",
        "sub lr, lr, #\\adjust",
        "sub sp, sp, #32",
        "stm sp, {{r0-r3, r12, lr}}",
        "mrs r0, spsr",
        "str r0, [sp, #24]",
        "mov r0, #\\type",
        "mov r1, sp",
        "bl {thread_handle_abort}",
        "ldr r0, [sp, #24]",
        "msr spsr_fsxc, r0",
        "ldm sp, {{r0-r3, r12, lr}}",
        "add sp, sp, #32",
        "movs pc, lr",
        ".endm",
        "thread_abort_handler thread_und_handler, 0, 4",
        "thread_abort_handler thread_pabort_handler, 1, 4",
        "thread_abort_handler thread_dabort_handler, 2, 8",
        MODE_SYS = const Mode::Sys as u32,
        MODE_SVC = const Mode::Svc as u32,
        USR_SP = const offset_of!(ThreadCtxRegs, usr_sp),
        SVC_SPSR = const offset_of!(ThreadCtxRegs, svc_spsr),
        CTX_PC = const offset_of!(ThreadCtxRegs, pc),
        CTX_SIZE = const size_of::<ThreadCtxRegs>(),
        ARGS_SIZE = const size_of::<SmcArgs>(),
        thread_handle_smc_call = sym super::thread_handle_smc_call,
        thread_std_smc_handler = sym super::thread_std_smc_handler,
        thread_get_tmp_sp = sym super::thread_get_tmp_sp,
        thread_state_free = sym super::thread_state_free,
        thread_save_ctx_regs = sym super::thread_save_ctx_regs,
        thread_suspend_irq = sym super::thread_suspend_irq,
        thread_handle_fiq = sym super::thread_handle_fiq,
        thread_handle_svc = sym super::thread_handle_svc,
        thread_handle_abort = sym super::thread_handle_abort,
    );

    /// Returns the address at which new threads start.
    pub fn std_entry_address() -> u32 {
        thread_std_smc_entry as usize as u32
    }

    /// Points VBAR at the thread layer's exception vectors.
    pub fn install_vectors() {
        // SAFETY: `thread_vect_table` is a valid vector table, and every handler it refers to is
        // ready once the handlers are registered.
        unsafe {
            write_vbar((&raw const thread_vect_table) as u32);
        }
    }

    /// Switches to the given thread context.
    ///
    /// # Safety
    ///
    /// The context must belong to a thread which is active on this CPU, and must be valid to
    /// resume.
    pub unsafe fn thread_resume(regs: &ThreadCtxRegs) -> ! {
        // SAFETY: The caller promises the context is valid.
        unsafe { thread_resume_asm(regs) }
    }

    /// Sets the banked stack pointer of `mode`.
    ///
    /// # Safety
    ///
    /// `sp` must be the top of a stack reserved for `mode` on this CPU.
    pub unsafe fn set_mode_sp(mode: Mode, sp: usize) {
        // SAFETY: Only the banked stack pointer of `mode` changes, and interrupts are masked while
        // in the other mode.
        unsafe {
            asm!(
                "mrs r3, cpsr",
                "cpsid if",
                "bic r2, r3, #{MODE_MASK}",
                "orr r2, r2, r1",
                "msr cpsr_c, r2",
                "mov sp, r0",
                "msr cpsr_c, r3",
                in("r0") sp,
                in("r1") mode as u32,
                out("r2") _,
                out("r3") _,
                MODE_MASK = const arm32_sysregs::Cpsr::MODE_MASK,
                options(nostack),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::{
        mem::offset_of,
        sync::atomic::{AtomicU32, AtomicUsize},
    };
    use std::sync::Mutex;

    const STD_ENTRY: u32 = 0x8000_0100;
    const CLIENT: u32 = 0x42;

    type TwoThreads = Threads<2, 2>;

    /// Handlers which record what they were called with.
    #[derive(Default)]
    struct RecordingHandlers {
        fastcalls: Mutex<Vec<SmcArgs>>,
        fiqs: AtomicU32,
    }

    impl ThreadHandlers for RecordingHandlers {
        fn stdcall(&self, _args: &mut SmcArgs) {}

        fn fastcall(&self, args: &mut SmcArgs) {
            self.fastcalls.lock().unwrap().push(*args);
            args.a1 = 7;
        }

        fn fiq(&self) {
            self.fiqs.fetch_add(1, Ordering::SeqCst);
        }

        fn svc(&self, _regs: &mut ThreadSvcRegs) {}

        fn abort(&self, abort_type: AbortType, _regs: &mut ThreadAbortRegs) {
            panic!("Unexpected {abort_type:?}");
        }
    }

    fn std_call(a1: u32) -> SmcArgs {
        SmcArgs {
            a0: 0x3200_0001,
            a1,
            a7: CLIENT,
            ..Default::default()
        }
    }

    fn resume_call(thread: u32, client: u32) -> SmcArgs {
        SmcArgs {
            a0: SMC_CALL_RETURN_FROM_RPC.0,
            a1: 0x11,
            a2: 0x22,
            a3: 0x33,
            a4: thread,
            a7: client,
            ..Default::default()
        }
    }

    fn pool() -> TwoThreads {
        let threads = TwoThreads::new(STD_ENTRY);
        for core in 0..2 {
            threads
                .init_stack(CoreId::new(core), StackId::Temporary, 0x1000 * (core + 1))
                .unwrap();
        }
        threads
            .init_stack(CoreId::new(0), StackId::Thread(0), 0x10_0000)
            .unwrap();
        threads
            .init_stack(CoreId::new(0), StackId::Thread(1), 0x20_0000)
            .unwrap();
        threads
    }

    fn expect_resume(outcome: SmcOutcome) -> ThreadCtxRegs {
        match outcome {
            SmcOutcome::Resume(regs) => regs,
            SmcOutcome::Return => panic!("Expected a thread to be resumed"),
        }
    }

    #[test]
    fn context_layout() {
        assert_eq!(offset_of!(ThreadCtxRegs, usr_sp), 52);
        assert_eq!(offset_of!(ThreadCtxRegs, svc_spsr), 60);
        assert_eq!(offset_of!(ThreadCtxRegs, pc), 72);
        assert_eq!(size_of::<ThreadCtxRegs>(), 80);
    }

    #[test]
    fn stack_ids() {
        assert_eq!(StackId::from(THREAD_TMP_STACK), StackId::Temporary);
        assert_eq!(StackId::from(THREAD_ABT_STACK), StackId::Abort);
        assert_eq!(StackId::from(3), StackId::Thread(3));
    }

    #[test]
    fn fast_calls_return_to_monitor() {
        let threads = pool();
        let handlers = RecordingHandlers::default();
        let mut args = SmcArgs {
            a0: 0x8000_0005,
            a1: 1,
            ..Default::default()
        };
        assert_eq!(
            threads.handle_smc_call(CoreId::new(0), &mut args, &handlers),
            SmcOutcome::Return
        );
        assert_eq!(args.a0, SMC_CALL_RETURN.0);
        assert_eq!(args.a1, 7);
        assert_eq!(handlers.fastcalls.lock().unwrap()[0].a0, 0x8000_0005);
        assert_eq!(threads.thread_state(0), ThreadState::Free);

        let mut args = SmcArgs {
            a0: SMC_CALL_HANDLE_FIQ.0,
            ..Default::default()
        };
        assert_eq!(
            threads.handle_smc_call(CoreId::new(0), &mut args, &handlers),
            SmcOutcome::Return
        );
        assert_eq!(args.a0, SMC_CALL_RETURN_FROM_FIQ.0);
        assert_eq!(handlers.fiqs.load(Ordering::SeqCst), 1);
        assert_eq!(handlers.fastcalls.lock().unwrap().len(), 1);
    }

    #[test]
    fn standard_call_starts_thread() {
        let threads = pool();
        let mut args = std_call(5);
        let regs = expect_resume(threads.handle_smc_call(
            CoreId::new(1),
            &mut args,
            &RecordingHandlers::default(),
        ));
        assert_eq!(regs.pc, STD_ENTRY);
        assert_eq!(regs.cpsr, Mode::Svc as u32);
        assert_eq!(regs.svc_sp, 0x10_0000);
        assert_eq!(regs.r[..8], args.to_array());
        assert_eq!(threads.thread_state(0), ThreadState::Active);
        assert_eq!(threads.current_thread(CoreId::new(1)), Some(0));
        assert_eq!(threads.current_thread(CoreId::new(0)), None);
    }

    #[test]
    fn thumb_entry() {
        let threads = Threads::<1, 1>::new(STD_ENTRY | 1);
        let regs = expect_resume(threads.handle_smc_call(
            CoreId::new(0),
            &mut std_call(0),
            &RecordingHandlers::default(),
        ));
        assert_eq!(regs.cpsr, Cpsr::T.bits() | Mode::Svc as u32);
    }

    #[test]
    fn two_cpus_two_threads() {
        let threads = pool();
        let handlers = RecordingHandlers::default();
        expect_resume(threads.handle_smc_call(CoreId::new(0), &mut std_call(1), &handlers));
        expect_resume(threads.handle_smc_call(CoreId::new(1), &mut std_call(2), &handlers));
        assert_eq!(threads.current_thread(CoreId::new(0)), Some(0));
        assert_eq!(threads.current_thread(CoreId::new(1)), Some(1));
        assert_eq!(threads.thread_state(1), ThreadState::Active);
    }

    #[test]
    #[should_panic]
    fn nested_standard_call_panics() {
        let threads = pool();
        let handlers = RecordingHandlers::default();
        expect_resume(threads.handle_smc_call(CoreId::new(0), &mut std_call(1), &handlers));
        expect_resume(threads.handle_smc_call(CoreId::new(1), &mut std_call(2), &handlers));
        threads.handle_smc_call(CoreId::new(0), &mut std_call(3), &handlers);
    }

    #[test]
    #[should_panic]
    fn nested_resume_panics() {
        let threads = pool();
        let core = CoreId::new(0);
        threads.alloc_and_run(core, &mut std_call(1));
        threads.resume_from_rpc(core, &mut resume_call(0, CLIENT));
    }

    #[test]
    fn no_free_thread() {
        let threads = pool();
        let (core0, core1) = (CoreId::new(0), CoreId::new(1));
        expect_resume(threads.alloc_and_run(core0, &mut std_call(1)));
        threads.suspend(core0, ThreadFlags::empty(), 0x1d3, 0x2000);
        expect_resume(threads.alloc_and_run(core1, &mut std_call(2)));
        let before = threads.regs(0);

        let mut args = std_call(3);
        assert_eq!(threads.alloc_and_run(core0, &mut args), SmcOutcome::Return);
        assert_eq!(args.a0, SMC_CALL_RETURN.0);
        assert_eq!(args.a1, u32::from(TrustedOsReturn::NoThread));
        assert_eq!((args.a2, args.a3, args.a4), (0, 0, 0));
        assert_eq!(threads.thread_state(0), ThreadState::Suspended);
        assert_eq!(threads.thread_state(1), ThreadState::Active);
        assert_eq!(threads.regs(0), before);
        assert_eq!(threads.current_thread(core0), None);
    }

    #[test]
    fn suspend_resume_free() {
        let threads = pool();
        let core = CoreId::new(0);
        expect_resume(threads.alloc_and_run(core, &mut std_call(1)));
        assert_eq!(threads.suspend(core, ThreadFlags::empty(), 0x13, 0x3000), 0);
        assert_eq!(threads.thread_state(0), ThreadState::Suspended);
        assert_eq!(threads.current_thread(core), None);

        // Resumed on the other CPU.
        let regs =
            expect_resume(threads.resume_from_rpc(CoreId::new(1), &mut resume_call(0, CLIENT)));
        assert_eq!((regs.pc, regs.cpsr), (0x3000, 0x13));
        assert_eq!(threads.thread_state(0), ThreadState::Active);
        assert_eq!(threads.current_thread(CoreId::new(1)), Some(0));

        assert!(threads.free(CoreId::new(1)).is_none());
        assert_eq!(threads.thread_state(0), ThreadState::Free);
        assert_eq!(threads.current_thread(CoreId::new(1)), None);
    }

    #[test]
    fn resume_copies_args_only_when_asked() {
        let threads = pool();
        let core = CoreId::new(0);
        expect_resume(threads.alloc_and_run(core, &mut std_call(9)));

        threads.suspend(core, ThreadFlags::COPY_ARGS_ON_RETURN, 0x13, 0x3000);
        let mut args = resume_call(0, CLIENT);
        let regs = expect_resume(threads.resume_from_rpc(core, &mut args));
        assert_eq!(regs.r[..8], args.to_array());

        threads.suspend(core, ThreadFlags::EXIT_ON_IRQ, 0x13, 0x3004);
        let mut irq_return = resume_call(0, CLIENT);
        irq_return.a1 = 0xdead;
        let regs = expect_resume(threads.resume_from_rpc(core, &mut irq_return));
        assert_eq!(regs.r[..8], args.to_array());
        assert_eq!(regs.pc, 0x3004);
    }

    #[test]
    fn copy_flag_cleared_after_use() {
        let threads = pool();
        let core = CoreId::new(0);
        expect_resume(threads.alloc_and_run(core, &mut std_call(1)));
        threads.suspend(core, ThreadFlags::COPY_ARGS_ON_RETURN, 0x13, 0x3000);
        expect_resume(threads.resume_from_rpc(core, &mut resume_call(0, CLIENT)));

        // Saving a snapshot doesn't touch the flags, so the next resume mustn't copy.
        let mut snapshot = threads.regs(0);
        snapshot.r[1] = 0x5555;
        threads.save_ctx_regs(core, &snapshot);
        let index = threads.suspend(core, ThreadFlags::empty(), 0x13, 0x3008);
        let regs = expect_resume(threads.resume_from_rpc(core, &mut resume_call(index, CLIENT)));
        assert_eq!(regs.r[1], 0x5555);
    }

    #[test]
    fn bad_thread_rejected_without_change() {
        let threads = pool();
        let core = CoreId::new(0);
        expect_resume(threads.alloc_and_run(core, &mut std_call(1)));
        threads.suspend(core, ThreadFlags::COPY_ARGS_ON_RETURN, 0x13, 0x3000);
        let before = threads.regs(0);

        for mut args in [
            resume_call(0, CLIENT + 1),
            resume_call(1, CLIENT),
            resume_call(2, CLIENT),
            resume_call(u32::MAX, CLIENT),
        ] {
            assert_eq!(threads.resume_from_rpc(core, &mut args), SmcOutcome::Return);
            assert_eq!(args.a0, SMC_CALL_RETURN.0);
            assert_eq!(args.a1, u32::from(TrustedOsReturn::BadThread));
            assert_eq!(threads.thread_state(0), ThreadState::Suspended);
            assert_eq!(threads.regs(0), before);
            assert_eq!(threads.current_thread(core), None);
        }

        // The right client can still resume it, with its arguments copied.
        let regs = expect_resume(threads.resume_from_rpc(core, &mut resume_call(0, CLIENT)));
        assert_eq!(regs.r[1], 0x11);
    }

    #[test]
    fn init_stack_errors() {
        let threads = pool();
        let core = CoreId::new(1);
        assert_eq!(
            threads.init_stack(core, StackId::Thread(2), 0x30_0000),
            Err(ThreadError::InvalidStackId(2))
        );
        expect_resume(threads.alloc_and_run(core, &mut std_call(1)));
        assert_eq!(
            threads.init_stack(core, StackId::Thread(0), 0x30_0000),
            Err(ThreadError::ThreadNotFree)
        );
        assert_eq!(threads.init_stack(core, StackId::Abort, 0x4000), Ok(()));
        assert_eq!(threads.tmp_sp(core), 0x2000);

        // Reassigning the temporary stack forgets the current thread.
        threads.init_stack(core, StackId::Temporary, 0x2800).unwrap();
        assert_eq!(threads.current_thread(core), None);
        assert_eq!(threads.tmp_sp(core), 0x2800);
    }

    static RELEASED: AtomicUsize = AtomicUsize::new(0);

    fn release(data: NonNull<()>) {
        RELEASED.fetch_add(data.as_ptr() as usize, Ordering::SeqCst);
    }

    #[test]
    fn thread_specific_data() {
        let threads = pool();
        let core = CoreId::new(0);
        let data = NonNull::<u64>::dangling().cast::<()>();
        assert_eq!(threads.get_tsd(core), None);

        expect_resume(threads.alloc_and_run(core, &mut std_call(1)));
        assert!(threads.set_tsd(core, Tsd::new(data, Some(release))).is_none());
        assert_eq!(threads.get_tsd(core), Some(data));
        assert_eq!(threads.get_tsd(CoreId::new(1)), None);

        let before = RELEASED.load(Ordering::SeqCst);
        threads.free(core).unwrap().release();
        assert_eq!(
            RELEASED.load(Ordering::SeqCst),
            before + data.as_ptr() as usize
        );
        assert_eq!(threads.get_tsd(core), None);
    }

    #[test]
    #[should_panic]
    fn set_tsd_without_thread_panics() {
        let threads = pool();
        threads.set_tsd(CoreId::new(0), Tsd::new(NonNull::dangling(), None));
    }

    #[test]
    fn thread_error_messages() {
        assert_eq!(
            ThreadError::InvalidStackId(7).to_string(),
            "No thread with index 7"
        );
    }
}
