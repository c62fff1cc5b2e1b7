// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

macro_rules! select_platform {
    (platform = $condition:literal, $mod:ident::$plat_impl:ident) => {
        #[cfg(all(platform = $condition, not(test)))]
        mod $mod;

        #[cfg(all(platform = $condition, not(test)))]
        pub use $mod::$plat_impl as PlatformImpl;
    };
    (test, $mod:ident::$plat_impl:ident) => {
        #[cfg(test)]
        mod $mod;

        #[cfg(test)]
        pub use $mod::$plat_impl as PlatformImpl;
    };
}

select_platform!(platform = "vexpress", vexpress::Vexpress);
select_platform!(platform = "qemu", qemu::Qemu);
select_platform!(test, test::TestPlatform);

use crate::{gic::InterruptController, logger::LogSink};
use arm32_sysregs::Mpidr;
#[cfg(not(test))]
pub use crate::aarch32::exception_free;
#[cfg(test)]
pub use test::{exception_free, in_exception_free};

/// Type alias for convenience, to avoid having to use the complicated type name everywhere.
pub type LogSinkImpl = <PlatformImpl as Platform>::LogSinkImpl;

/// The platform's interrupt controller driver.
pub type GicImpl = <PlatformImpl as Platform>::GicImpl;

/// The hooks implemented by all platforms.
///
/// # Safety
///
/// `core_position` must never return the same index for two different valid MPIDR values, and
/// must never return a value greater than or equal to `CORE_COUNT`. The reset code computes the
/// same index from `CLUSTER_SHIFT` before any stack exists, so the two must agree.
pub unsafe trait Platform {
    /// The number of CPU cores.
    const CORE_COUNT: usize;

    /// The number of threads available to run standard calls.
    const THREAD_COUNT: usize;

    /// log2 of the maximum number of cores in each cluster.
    const CLUSTER_SHIFT: u32;

    /// Base address of the UART used for logging.
    const UART_BASE: usize;

    /// Base address of the GIC distributor.
    const GICD_BASE: usize;

    /// Base address of the GIC CPU interface.
    const GICC_BASE: usize;

    /// Base address of the DRAM owned by the normal world.
    const NS_DRAM_BASE: usize;

    /// Size in bytes of the DRAM owned by the normal world.
    const NS_DRAM_SIZE: usize;

    /// Platform dependent LogSink implementation type for Logger.
    type LogSinkImpl: LogSink;

    /// Platform dependent interrupt controller driver.
    type GicImpl: InterruptController + Send;

    /// Initialises the logger and anything else the platform needs. This will be called before the
    /// MMU is enabled.
    ///
    /// Any logs sent before this is called will be ignored.
    fn init_before_mmu();

    /// Maps the platform's devices, once the MMU is enabled.
    fn map_devices() {
        crate::mmu::map_device(Self::UART_BASE, 0x1000);
        crate::mmu::map_device(Self::GICD_BASE, 0x1000);
        crate::mmu::map_device(Self::GICC_BASE, 0x1000);
    }

    /// Creates instance of GIC driver.
    ///
    /// # Safety
    ///
    /// This must only be called once, to avoid creating aliases of the GIC driver.
    unsafe fn create_gic() -> Self::GicImpl;

    /// Returns whether the given MPIDR is valid for this platform.
    fn mpidr_is_valid(mpidr: Mpidr) -> bool;

    /// Given a valid MPIDR value, returns the corresponding linear core index.
    fn core_position(mpidr: Mpidr) -> usize {
        (usize::from(mpidr.aff1()) << Self::CLUSTER_SHIFT) + usize::from(mpidr.aff0())
    }
}
