// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use core::ops::Range;

pub fn code_range() -> Range<usize> {
    0x9fe0_0000..0x9fe2_0000
}

pub fn data_start() -> usize {
    0x9fe2_0000
}

pub fn bss_range() -> Range<usize> {
    0x9fe3_0000..0x9fe3_8000
}

pub fn image_end() -> usize {
    0x9fe4_0000
}

pub fn end_of_ram() -> usize {
    0xa000_0000
}
