// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Safe abstractions for data which lives in the `.bss.prebss` sections.
//!
//! These sections are zeroed by the loader rather than by the boot code, so anything placed in
//! them may be used before the BSS is cleared.

use zerocopy::FromZeros;

/// Creates a zeroed instance of the given type.
///
/// This is equivalent to `FromZeros::new_zeroed()` but const.
pub const fn const_zeroed<T: FromZeros>() -> T {
    // SAFETY: T implements `FromZeros` so it must be safe to initialise with zeros.
    unsafe { core::mem::zeroed() }
}

/// Declares a static zero-initialised `$t` in the given pre-BSS section, and a SpinMutex
/// initialised with a mutable reference to it. E.g.,
///
/// ```
/// prebss_mut!(FOO, u64, ".bss.prebss.foo");
/// ```
///
/// will create
///
/// ```
/// static FOO: SpinMutex<&'static mut u64> = ...;
/// ```
///
/// For this to work, `$t` must implement `zerocopy::FromZeros`. The section is only applied to
/// target builds; in unit tests the value is an ordinary static.
macro_rules! prebss_mut {
    ($(#[$attributes:meta])* $visibility:vis $name:ident, $t:ty, $section:literal) => {
        $(#[$attributes])*
        $visibility static $name: spin::mutex::SpinMutex<&'static mut $t> = spin::mutex::SpinMutex::new({
            #[cfg_attr(not(test), unsafe(link_section = $section))]
            static mut RAW: $t = $crate::prebss::const_zeroed();
            // SAFETY: This is the only place where we create a reference to the contents of this
            // static mut.
            unsafe { &mut *&raw mut RAW }
        });
    };
}
pub(crate) use prebss_mut;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn use_zeroed() {
        static TEST_ZEROED: [u32; 64] = const_zeroed();

        assert_eq!(TEST_ZEROED[0], 0);
        assert_eq!(TEST_ZEROED[63], 0);
    }

    #[test]
    fn mutable_macro() {
        prebss_mut!(TEST, u64, ".bss.prebss.test");

        let mut test_ref = TEST.lock();
        assert_eq!(**test_ref, 0);
        **test_ref = 42;
        assert_eq!(**test_ref, 42);
    }
}
