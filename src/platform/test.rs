// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use super::Platform;
use crate::{
    gic::{FakeGic, SecureGic},
    logger::{self, LogSink},
};
use arm32_sysregs::Mpidr;
use core::fmt;
use percore::ExceptionFree;
use std::{
    cell::Cell,
    io::{Write, stdout},
};

const CLUSTER_COUNT: usize = 2;
const PLATFORM_CPU_PER_CLUSTER_SHIFT: u32 = 1;
const MAX_CPUS_PER_CLUSTER: usize = 1 << PLATFORM_CPU_PER_CLUSTER_SHIFT;

std::thread_local! {
    static EXCEPTION_FREE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// A fake platform for unit tests.
pub struct TestPlatform;

impl TestPlatform {
    /// The MPIDR values for each core, for use in tests.
    pub const MPIDR_VALUES: [Mpidr; Self::CORE_COUNT] = [
        Mpidr::from_bits_retain(0x8000_0000),
        Mpidr::from_bits_retain(0x8000_0001),
        Mpidr::from_bits_retain(0x8000_0100),
        Mpidr::from_bits_retain(0x8000_0101),
    ];
}

// SAFETY: The test platform is exempt from the usual safety requirements on `core_position`,
// because it is only used in unit tests and so is never relied on by assembly code.
unsafe impl Platform for TestPlatform {
    const CORE_COUNT: usize = CLUSTER_COUNT * MAX_CPUS_PER_CLUSTER;
    const THREAD_COUNT: usize = 4;
    const CLUSTER_SHIFT: u32 = PLATFORM_CPU_PER_CLUSTER_SHIFT;

    const UART_BASE: usize = 0x1c0a_0000;
    const GICD_BASE: usize = 0x2c00_1000;
    const GICC_BASE: usize = 0x2c00_2000;

    const NS_DRAM_BASE: usize = 0x8000_0000;
    const NS_DRAM_SIZE: usize = 0x1000_0000;

    type LogSinkImpl = StdOutSink;
    type GicImpl = SecureGic<'static>;

    fn init_before_mmu() {
        let _ = logger::init(StdOutSink);
    }

    unsafe fn create_gic() -> SecureGic<'static> {
        // Two 32-line registers, i.e. 64 interrupts.
        Box::leak(FakeGic::new(1)).build()
    }

    fn mpidr_is_valid(mpidr: Mpidr) -> bool {
        mpidr.aff2() == 0
            && usize::from(mpidr.aff1()) < CLUSTER_COUNT
            && usize::from(mpidr.aff0()) < MAX_CPUS_PER_CLUSTER
    }
}

/// Runs the given function and returns the result.
///
/// This is a fake version of `exception_free` for use in unit tests only, which must be run on a
/// single thread.
pub fn exception_free<T>(f: impl FnOnce(ExceptionFree) -> T) -> T {
    // SAFETY: This is only used in unit tests, which are run on the host where there are no
    // hardware exceptions nor multiple threads.
    let token = unsafe { ExceptionFree::new() };
    EXCEPTION_FREE_DEPTH.set(EXCEPTION_FREE_DEPTH.get() + 1);
    let result = f(token);
    EXCEPTION_FREE_DEPTH.set(EXCEPTION_FREE_DEPTH.get() - 1);
    result
}

/// Returns whether the calling test is currently inside `exception_free`, i.e. whether interrupts
/// would be masked on real hardware.
#[allow(unused)]
pub fn in_exception_free() -> bool {
    EXCEPTION_FREE_DEPTH.get() > 0
}

/// A log sink for tests which writes logs to standard output.
pub struct StdOutSink;

impl LogSink for StdOutSink {
    fn write_fmt(&self, args: fmt::Arguments) {
        stdout().write_fmt(args).unwrap();
    }

    fn flush(&self) {
        stdout().flush().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_logging() {
        let writer = StdOutSink;
        writeln!(writer, "hello");
    }

    #[test]
    fn core_positions_are_unique() {
        for (index, mpidr) in TestPlatform::MPIDR_VALUES.iter().enumerate() {
            assert!(TestPlatform::mpidr_is_valid(*mpidr));
            assert_eq!(TestPlatform::core_position(*mpidr), index);
        }
        assert!(!TestPlatform::mpidr_is_valid(Mpidr::from_bits_retain(
            0x8000_0002
        )));
    }
}
