// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The secure world core of a TrustZone trusted OS for 32-bit Arm.

#![cfg_attr(not(test), no_main)]
#![cfg_attr(not(test), no_std)]

mod aarch32;
mod debug;
mod gic;
#[cfg_attr(test, path = "layout_fake.rs")]
mod layout;
mod logger;
mod mmu;
mod platform;
mod prebss;
mod resmem;
mod sm;
mod smccc;
mod stacks;
mod tee;
mod thread;

use crate::{
    platform::{Platform, PlatformImpl},
    sm::CoresImpl,
    smccc::SmcArgs,
    thread::{AbortType, StackId, ThreadAbortRegs, ThreadHandlers, ThreadSvcRegs, init_stack},
};
use log::{debug, error, info, warn};
use percore::Cores;

/// The top-level handlers of the trusted OS.
struct MainHandlers;

impl ThreadHandlers for MainHandlers {
    fn stdcall(&self, args: &mut SmcArgs) {
        debug!("Standard call {}", args.function());
        tee::entry(args);
    }

    fn fastcall(&self, args: &mut SmcArgs) {
        debug!("Fast call {}", args.function());
        tee::entry(args);
    }

    fn fiq(&self) {
        match gic::GIC.get() {
            Some(gic) => {
                gic::handle_fiq(&mut *gic.lock());
            }
            None => warn!("FIQ before the GIC was configured"),
        }
    }

    fn svc(&self, regs: &mut ThreadSvcRegs) {
        debug!("SVC from {:#x}", regs.lr);
    }

    fn abort(&self, abort_type: AbortType, regs: &mut ThreadAbortRegs) {
        error!(
            "{abort_type:?} abort at {:#x}, spsr {:#x}",
            regs.lr, regs.spsr
        );
        panic!("Unhandled {abort_type:?} abort");
    }
}

static HANDLERS: MainHandlers = MainHandlers;

/// Brings up the trusted OS on the boot CPU, before its first return to the normal world at
/// `nsec_entry`.
#[cfg_attr(test, allow(unused))]
extern "C" fn main_init(nsec_entry: u32) {
    resmem::init(layout::image_end(), layout::end_of_ram());

    PlatformImpl::init_before_mmu();
    info!("Trusted OS initializing");

    // SAFETY: The code and data ranges come from the linker script and cover the whole image,
    // its stacks and the reserved memory. The logger writes to the platform's UART.
    unsafe {
        mmu::init(
            layout::code_range(),
            layout::data_start()..resmem::limits().end,
            PlatformImpl::UART_BASE..PlatformImpl::UART_BASE + 0x1000,
        );
    }
    PlatformImpl::map_devices();
    // TODO: Let the normal world tell us where its memory is.
    mmu::map_rwmem(PlatformImpl::NS_DRAM_BASE, PlatformImpl::NS_DRAM_SIZE, true);
    debug!("BSS {:#x?} cleared at reset", layout::bss_range());

    gic::init();

    let core = CoresImpl::core_index();
    debug!("Booting on core {core}");
    stacks::init_canaries();
    let per_core = [
        (StackId::Temporary, stacks::tmp_stack_top(core)),
        (StackId::Abort, stacks::abt_stack_top(core)),
    ];
    let per_thread = (0..PlatformImpl::THREAD_COUNT)
        .map(|n| (StackId::Thread(n), stacks::thread_stack_top(n)));
    for (id, sp) in per_core.into_iter().chain(per_thread) {
        if let Err(e) = init_stack(id, sp) {
            panic!("Failed to assign stack {id:?}: {e}");
        }
    }

    // The thread vectors expect IRQ and FIQ to be masked while on the temporary stack.
    aarch32::mask_interrupts();
    thread::init_handlers(&HANDLERS);

    sm::init(sm::mon_stack_top());
    sm::set_nsec_entry(nsec_entry);

    info!("Switching to normal world boot");
}

#[cfg(all(target_arch = "arm", not(test)))]
mod asm {
    use super::*;
    use crate::{
        smccc::SMC_CALL_RETURN,
        stacks::{STACK_ALIGNMENT, STACK_TMP, STACK_TMP_SIZE},
    };
    use arm32_sysregs::Mode;
    use core::arch::naked_asm;

    /// The cold boot entry point, executed only by the boot CPU with the normal world entry point
    /// in lr.
    ///
    /// Sets up the temporary stack of this CPU, clears the BSS, then runs `main_init` and returns
    /// to the normal world through the thread dispatcher.
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    #[unsafe(link_section = ".text.entry")]
    unsafe extern "C" fn tee_entrypoint() -> ! {
        naked_asm!(
            ".arm",
            "mov r4, lr",
            "cpsid aif, #{MODE_SVC}",
            // The same linear index as `Platform::core_position`.
            "mrc p15, 0, r0, c0, c0, 5",
            "ubfx r1, r0, #8, #8",
            "and r0, r0, #0xff",
            "add r0, r0, r1, lsl #{CLUSTER_SHIFT}",
            "add r0, r0, #1",
            "ldr r1, ={stack_tmp}",
            "ldr r2, ={STACK_TMP_SIZE}",
            "mla r1, r0, r2, r1",
            "sub sp, r1, #{STACK_ALIGNMENT}",
            // Statics used before this point live in `.bss.prebss` and are left alone.
            "ldr r0, =__BSS_START__",
            "ldr r1, =__BSS_END__",
            "mov r2, #0",
            "0:",
            "cmp r0, r1",
            "strlo r2, [r0], #4",
            "blo 0b",
            "mov r0, r4",
            "bl {main_init}",
            "ldr r0, ={SMC_CALL_RETURN}",
            "mov r1, #0",
            "mov r2, #0",
            "mov r3, #0",
            "mov r4, #0",
            "mov r5, #0",
            "mov r6, #0",
            "mov r7, #0",
            "b thread_return_to_monitor",
            MODE_SVC = const Mode::Svc as u32,
            CLUSTER_SHIFT = const PlatformImpl::CLUSTER_SHIFT,
            STACK_TMP_SIZE = const STACK_TMP_SIZE,
            STACK_ALIGNMENT = const STACK_ALIGNMENT,
            SMC_CALL_RETURN = const SMC_CALL_RETURN.0,
            stack_tmp = sym STACK_TMP,
            main_init = sym main_init,
        );
    }
}
