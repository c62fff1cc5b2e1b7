// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Helper functions to get addresses defined by the linker script.

use core::ops::Range;

unsafe extern "C" {
    // These aren't really variables, just symbols defined by the linker script whose addresses we
    // need to get. They should never be read or written.
    static __TEXT_START__: u32;
    static __RODATA_END__: u32;
    static __DATA_START__: u32;
    static __BSS_START__: u32;
    static __BSS_END__: u32;
    static _end: u32;
    static _end_of_ram: u32;
}

/// Returns the range covering the code and read-only data of the image.
pub fn code_range() -> Range<usize> {
    (&raw const __TEXT_START__) as usize..(&raw const __RODATA_END__) as usize
}

/// Returns the address of the start of the writable data of the image.
pub fn data_start() -> usize {
    (&raw const __DATA_START__) as usize
}

/// Returns the range of the BSS section which is zeroed during boot.
///
/// This doesn't include the `.bss.prebss` sections.
pub fn bss_range() -> Range<usize> {
    (&raw const __BSS_START__) as usize..(&raw const __BSS_END__) as usize
}

/// Returns the address of the end of the image, where reserved memory begins.
pub fn image_end() -> usize {
    (&raw const _end) as usize
}

/// Returns the address of the end of the secure RAM owned by the trusted OS.
pub fn end_of_ram() -> usize {
    (&raw const _end_of_ram) as usize
}
