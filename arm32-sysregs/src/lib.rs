// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Access to AArch32 CP15 system registers.
//!
//! On `arm` targets the accessors execute `mrc`/`mcr`. Everywhere else, or with the `fakes`
//! feature, they operate on the [`fake::SYSREGS`] values so that code using them can be unit
//! tested on the host.

#![cfg_attr(all(target_arch = "arm", not(any(test, feature = "fakes"))), no_std)]

#[cfg(all(target_arch = "arm", not(any(test, feature = "fakes"))))]
mod cp15;
#[cfg(not(all(target_arch = "arm", not(any(test, feature = "fakes")))))]
pub mod fake;

use bitflags::bitflags;

#[doc(hidden)]
pub use paste as _paste;

/// Generates `read_$sysreg` and `write_$sysreg` functions for a register which is safe to read but
/// not to write.
#[macro_export]
macro_rules! read_write_sysreg {
    (
        $(#[$attributes:meta])*
        $sysreg:ident : ($op1:literal, $crn:ident, $crm:ident, $op2:literal), $type:ty $(: $bitflags_type:ty)?, safe_read, $fake_sysregs:expr
    ) => {
        $crate::read_sysreg!($sysreg : ($op1, $crn, $crm, $op2), $type $(: $bitflags_type)?, safe, $fake_sysregs);
        $crate::write_sysreg! {
            $(#[$attributes])*
            $sysreg : ($op1, $crn, $crm, $op2), $type $(: $bitflags_type)?, $fake_sysregs
        }
    };
}

bitflags! {
    /// MPIDR system register value.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Mpidr: u32 {
        /// Lowest level of affinity consists of logical cores implemented with multithreading.
        const MT = 1 << 24;
        /// Uniprocessor system.
        const U = 1 << 30;
        /// Multiprocessing extensions register format. Always set.
        const MP_EXT = 1 << 31;
    }
}

impl Mpidr {
    /// Size in bits of the affinity fields.
    pub const AFFINITY_BITS: usize = 8;
    /// Position of the lowest bit in the Aff0 field.
    pub const AFF0_SHIFT: u8 = 0;
    /// Position of the lowest bit in the Aff1 field.
    pub const AFF1_SHIFT: u8 = 8;
    /// Position of the lowest bit in the Aff2 field.
    pub const AFF2_SHIFT: u8 = 16;
    /// Mask for the Aff0 field, before shifting.
    pub const AFF_MASK: u32 = 0xff;

    /// Returns the value of the Aff0 field.
    pub const fn aff0(self) -> u8 {
        (self.bits() >> Self::AFF0_SHIFT) as u8
    }

    /// Returns the value of the Aff1 field.
    pub const fn aff1(self) -> u8 {
        (self.bits() >> Self::AFF1_SHIFT) as u8
    }

    /// Returns the value of the Aff2 field.
    pub const fn aff2(self) -> u8 {
        (self.bits() >> Self::AFF2_SHIFT) as u8
    }
}

bitflags! {
    /// SCTLR system register value.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Sctlr: u32 {
        /// MMU enable.
        const M = 1 << 0;
        /// Alignment check enable.
        const A = 1 << 1;
        /// Data and unified cache enable.
        const C = 1 << 2;
        /// Branch prediction enable.
        const Z = 1 << 11;
        /// Instruction cache enable.
        const I = 1 << 12;
        /// High exception vectors.
        const V = 1 << 13;
        /// TEX remap enable.
        const TRE = 1 << 28;
        /// Access flag enable.
        const AFE = 1 << 29;
        /// Thumb exception enable.
        const TE = 1 << 30;
    }
}

bitflags! {
    /// Current or saved program status register value.
    ///
    /// The mode field is not a flag; use [`Cpsr::mode`] and [`Cpsr::with_mode`] for it.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Cpsr: u32 {
        /// Thumb execution state.
        const T = 1 << 5;
        /// FIQ mask.
        const F = 1 << 6;
        /// IRQ mask.
        const I = 1 << 7;
        /// Asynchronous abort mask.
        const A = 1 << 8;
        /// Big-endian data.
        const E = 1 << 9;

        const _ = !0;
    }
}

/// A processor mode, as encoded in the `M` field of the CPSR.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Mode {
    /// User mode.
    Usr = 0x10,
    /// FIQ mode.
    Fiq = 0x11,
    /// IRQ mode.
    Irq = 0x12,
    /// Supervisor mode.
    Svc = 0x13,
    /// Monitor mode.
    Mon = 0x16,
    /// Abort mode.
    Abt = 0x17,
    /// Undefined mode.
    Und = 0x1b,
    /// System mode.
    Sys = 0x1f,
}

impl Cpsr {
    /// Mask for the mode field.
    pub const MODE_MASK: u32 = 0x1f;

    /// Returns the raw value of the mode field.
    pub const fn mode(self) -> u32 {
        self.bits() & Self::MODE_MASK
    }

    /// Returns a copy of `self` with the mode field replaced by `mode`.
    pub const fn with_mode(self, mode: Mode) -> Self {
        Self::from_bits_retain((self.bits() & !Self::MODE_MASK) | mode as u32)
    }
}

read_sysreg!(mpidr: (0, c0, c0, 5), u32: Mpidr, safe, fake::SYSREGS);
read_write_sysreg! {
    /// # Safety
    ///
    /// Enabling the MMU or caches requires valid translation tables and coherent memory.
    sctlr: (0, c1, c0, 0), u32: Sctlr, safe_read, fake::SYSREGS
}
read_write_sysreg! {
    /// # Safety
    ///
    /// The value must point to a valid translation table which maps the running code.
    ttbr0: (0, c2, c0, 0), u32, safe_read, fake::SYSREGS
}
read_write_sysreg! {
    /// # Safety
    ///
    /// Changing domain access may make mapped memory, including the running code, inaccessible.
    dacr: (0, c3, c0, 0), u32, safe_read, fake::SYSREGS
}
read_write_sysreg! {
    /// # Safety
    ///
    /// The value must be the address of a valid exception vector table.
    vbar: (0, c12, c0, 0), u32, safe_read, fake::SYSREGS
}
read_write_sysreg! {
    /// # Safety
    ///
    /// The value must be the address of a valid monitor vector table.
    mvbar: (0, c12, c0, 1), u32, safe_read, fake::SYSREGS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpidr_affinity() {
        let mpidr = Mpidr::from_bits_retain(0x8001_0203);
        assert_eq!(mpidr.aff0(), 0x03);
        assert_eq!(mpidr.aff1(), 0x02);
        assert_eq!(mpidr.aff2(), 0x01);
        assert!(mpidr.contains(Mpidr::MP_EXT));
    }

    #[test]
    fn cpsr_mode() {
        let cpsr = Cpsr::F.with_mode(Mode::Svc);
        assert_eq!(cpsr.mode(), Mode::Svc as u32);
        assert_eq!(cpsr.bits(), 0x53);
        assert_eq!(cpsr.with_mode(Mode::Mon).bits(), 0x56);
    }

    #[test]
    fn fake_registers() {
        // SAFETY: These are fake registers.
        unsafe {
            write_dacr(1);
        }
        assert_eq!(read_dacr(), 1);
    }
}
