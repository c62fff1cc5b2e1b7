// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use super::Platform;
use crate::{
    gic::SecureGic,
    logger::{self, LockedWriter},
};
use arm_gic::gicv2::registers::{Gicc, Gicd};
use arm_pl011_uart::{PL011Registers, Uart, UniqueMmioPointer};
use arm32_sysregs::Mpidr;
use core::ptr::NonNull;

const GICD_BASE: usize = 0x0800_0000;
const GICC_BASE: usize = 0x0801_0000;

/// Base address of the secure world PL011 UART, aka. UART1.
const UART1_BASE: usize = 0x0904_0000;

/// The number of CPU clusters.
const CLUSTER_COUNT: usize = 1;
const PLATFORM_CPU_PER_CLUSTER_SHIFT: u32 = 2;
/// The maximum number of CPUs in each cluster.
const MAX_CPUS_PER_CLUSTER: usize = 1 << PLATFORM_CPU_PER_CLUSTER_SHIFT;

/// The 'virt' machine of the QEMU emulator, with a Cortex-A15.
pub struct Qemu;

// SAFETY: `core_position` combines Aff1 and Aff0 without overlap as long as
// `PLATFORM_CPU_PER_CLUSTER_SHIFT` is correct, and `mpidr_is_valid` keeps it below `CORE_COUNT`.
unsafe impl Platform for Qemu {
    const CORE_COUNT: usize = CLUSTER_COUNT * MAX_CPUS_PER_CLUSTER;
    const THREAD_COUNT: usize = 4;
    const CLUSTER_SHIFT: u32 = PLATFORM_CPU_PER_CLUSTER_SHIFT;

    const UART_BASE: usize = UART1_BASE;
    const GICD_BASE: usize = GICD_BASE;
    const GICC_BASE: usize = GICC_BASE;

    const NS_DRAM_BASE: usize = 0x4000_0000;
    const NS_DRAM_SIZE: usize = 0x4000_0000;

    type LogSinkImpl = LockedWriter<Uart<'static>>;
    type GicImpl = SecureGic<'static>;

    fn init_before_mmu() {
        // SAFETY: `UART1_BASE` is the base address of a PL011 device, and nothing else accesses
        // that address range. The address stays valid once the MMU is enabled, as devices are
        // identity mapped.
        let uart_pointer = unsafe {
            UniqueMmioPointer::new(NonNull::new_unchecked(UART1_BASE as *mut PL011Registers))
        };
        let _ = logger::init(LockedWriter::new(Uart::new(uart_pointer)));
    }

    unsafe fn create_gic() -> SecureGic<'static> {
        // SAFETY: These are the GICv2 distributor and CPU interface of the platform, identity
        // mapped as device memory, and the caller promises not to create another driver.
        unsafe {
            SecureGic::new(
                UniqueMmioPointer::new(NonNull::new_unchecked(GICD_BASE as *mut Gicd)),
                UniqueMmioPointer::new(NonNull::new_unchecked(GICC_BASE as *mut Gicc)),
            )
        }
    }

    fn mpidr_is_valid(mpidr: Mpidr) -> bool {
        mpidr.aff2() == 0
            && usize::from(mpidr.aff1()) < CLUSTER_COUNT
            && usize::from(mpidr.aff0()) < MAX_CPUS_PER_CLUSTER
    }
}
