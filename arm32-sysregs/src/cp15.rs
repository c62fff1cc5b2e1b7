// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

/// Generates a public function named `read_$sysreg` to read the CP15 register `$sysreg`, encoded
/// as `(opc1, CRn, CRm, opc2)`, as a value of type `$type`.
///
/// Only registers which are always safe to read are supported.
#[macro_export]
macro_rules! read_sysreg {
    ($sysreg:ident : ($op1:literal, $crn:ident, $crm:ident, $op2:literal), $type:ty, safe $(, $fake_sysregs:expr)?) => {
        $crate::_paste::paste! {
            #[doc = "Returns the value of the `"]
            #[doc = stringify!($sysreg)]
            #[doc = "` system register."]
            #[inline(always)]
            pub fn [< read_ $sysreg >]() -> $type {
                let value: u32;
                // SAFETY: The macro call site's author has determined that it is always safe to
                // read the given `$sysreg`.
                unsafe {
                    core::arch::asm!(
                        concat!(
                            "mrc p15, ", stringify!($op1), ", {value}, ",
                            stringify!($crn), ", ", stringify!($crm), ", ", stringify!($op2)
                        ),
                        options(nostack, preserves_flags),
                        value = out(reg) value,
                    );
                }
                value
            }
        }
    };
    ($sysreg:ident : ($op1:literal, $crn:ident, $crm:ident, $op2:literal), $type:ty : $bitflags_type:ty, safe $(, $fake_sysregs:expr)?) => {
        $crate::_paste::paste! {
            #[doc = "Returns the value of the `"]
            #[doc = stringify!($sysreg)]
            #[doc = "` system register."]
            #[inline(always)]
            pub fn [< read_ $sysreg >]() -> $bitflags_type {
                let value: $type;
                // SAFETY: The macro call site's author has determined that it is always safe to
                // read the given `$sysreg`.
                unsafe {
                    core::arch::asm!(
                        concat!(
                            "mrc p15, ", stringify!($op1), ", {value}, ",
                            stringify!($crn), ", ", stringify!($crm), ", ", stringify!($op2)
                        ),
                        options(nostack, preserves_flags),
                        value = out(reg) value,
                    );
                }
                <$bitflags_type>::from_bits_retain(value)
            }
        }
    };
}

/// Generates a public unsafe function named `write_$sysreg` to write a value of type `$type` to
/// the CP15 register `$sysreg`, encoded as `(opc1, CRn, CRm, opc2)`.
///
/// The attributes should include a `# Safety` section describing what the caller must uphold.
#[macro_export]
macro_rules! write_sysreg {
    (
        $(#[$attributes:meta])*
        $sysreg:ident : ($op1:literal, $crn:ident, $crm:ident, $op2:literal), $type:ty $(, $fake_sysregs:expr)?
    ) => {
        $crate::_paste::paste! {
            #[doc = "Writes `value` to the `"]
            #[doc = stringify!($sysreg)]
            #[doc = "` system register."]
            $(#[$attributes])*
            #[inline(always)]
            pub unsafe fn [< write_ $sysreg >](value: $type) {
                // SAFETY: The caller promises that it is safe to write `value` to `$sysreg`.
                unsafe {
                    core::arch::asm!(
                        concat!(
                            "mcr p15, ", stringify!($op1), ", {value}, ",
                            stringify!($crn), ", ", stringify!($crm), ", ", stringify!($op2)
                        ),
                        options(nostack, preserves_flags),
                        value = in(reg) value,
                    );
                }
            }
        }
    };
    (
        $(#[$attributes:meta])*
        $sysreg:ident : ($op1:literal, $crn:ident, $crm:ident, $op2:literal), $type:ty : $bitflags_type:ty $(, $fake_sysregs:expr)?
    ) => {
        $crate::_paste::paste! {
            #[doc = "Writes `value` to the `"]
            #[doc = stringify!($sysreg)]
            #[doc = "` system register."]
            $(#[$attributes])*
            #[inline(always)]
            pub unsafe fn [< write_ $sysreg >](value: $bitflags_type) {
                let value: $type = value.bits();
                // SAFETY: The caller promises that it is safe to write `value` to `$sysreg`.
                unsafe {
                    core::arch::asm!(
                        concat!(
                            "mcr p15, ", stringify!($op1), ", {value}, ",
                            stringify!($crn), ", ", stringify!($crm), ", ", stringify!($op2)
                        ),
                        options(nostack, preserves_flags),
                        value = in(reg) value,
                    );
                }
            }
        }
    };
}
