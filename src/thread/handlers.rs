// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The top-level handlers which the thread layer calls into, registered once at boot.

use crate::smccc::SmcArgs;
use log::debug;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use spin::Once;

static HANDLERS: Once<&'static dyn ThreadHandlers> = Once::new();

/// Registers reported to the SVC handler. The handler may change them to return results.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct ThreadSvcRegs {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r4: u32,
    pub r5: u32,
    pub lr: u32,
    pub spsr: u32,
    pub r12: u32,
    _pad: u32,
}

/// Registers reported to the abort handler.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct ThreadAbortRegs {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub ip: u32,
    /// The address of the faulting instruction.
    pub lr: u32,
    pub spsr: u32,
    _pad: u32,
}

/// The kind of exception reported to the abort handler.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum AbortType {
    Undefined = 0,
    Prefetch = 1,
    Data = 2,
}

/// The handlers the thread layer dispatches to.
///
/// `fastcall` and `fiq` run on the CPU's temporary stack with FIQ masked. They must not block,
/// must not cause an abort and must not unmask FIQ.
pub trait ThreadHandlers: Sync {
    /// Handles a standard call on a thread stack, with interrupts unmasked. Results go in
    /// `args.a1` to `args.a3`.
    fn stdcall(&self, args: &mut SmcArgs);

    /// Handles a fast call. Results go in `args.a1` to `args.a3`.
    fn fastcall(&self, args: &mut SmcArgs);

    /// Handles a FIQ, either forwarded by the monitor or taken while a thread was running.
    fn fiq(&self);

    /// Handles an SVC, with IRQ masked.
    fn svc(&self, regs: &mut ThreadSvcRegs);

    /// Handles an undefined instruction, prefetch abort or data abort, in abort mode.
    fn abort(&self, abort_type: AbortType, regs: &mut ThreadAbortRegs);
}

/// Registers the top-level handlers, then points the exception vectors at the thread layer.
///
/// Panics if called more than once.
pub fn init_handlers(handlers: &'static dyn ThreadHandlers) {
    assert!(
        !HANDLERS.is_completed(),
        "Thread handlers already registered"
    );
    HANDLERS.call_once(|| handlers);
    debug!("Thread handlers registered");
    #[cfg(all(target_arch = "arm", not(test)))]
    super::asm::install_vectors();
}

/// Returns the registered handlers.
///
/// Panics if `init_handlers` hasn't been called yet.
pub fn handlers() -> &'static dyn ThreadHandlers {
    *HANDLERS
        .get()
        .expect("Thread handlers used before registration")
}
