// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Bump allocator over the memory between the end of the image and the end of secure RAM, for
//! structures which are needed before any general purpose allocator exists.

use crate::prebss::prebss_mut;
use core::ops::Range;
use log::debug;
use zerocopy::FromZeros;

/// Alignment of every allocation, and of the start of the region.
pub const RESMEM_ALIGNMENT: usize = 8;

prebss_mut!(RESMEM, ReservedMemory, ".bss.prebss.resmem");

/// The cursor of a reserved memory region.
///
/// `begin` only ever increases and never passes `end`. Once disabled the region stays disabled.
#[derive(Debug, Eq, FromZeros, PartialEq)]
pub struct ReservedMemory {
    begin: usize,
    end: usize,
    disabled: bool,
}

impl ReservedMemory {
    /// Creates a region covering `begin..end`, with `begin` rounded up to the allocation
    /// alignment.
    ///
    /// If the rounded `begin` overflows or passes `end`, the region is empty and disabled, so a
    /// misconfigured range never allocates.
    pub fn new(begin: usize, end: usize) -> Self {
        match round_up(begin) {
            Some(aligned) if aligned <= end => Self {
                begin: aligned,
                end,
                disabled: false,
            },
            _ => Self {
                begin: end,
                end,
                disabled: true,
            },
        }
    }

    /// Allocates `size` bytes, rounded up to the allocation alignment, and returns the address of
    /// the allocation.
    ///
    /// Returns `None` if the region is disabled or doesn't have enough space left.
    pub fn alloc(&mut self, size: usize) -> Option<usize> {
        if self.disabled {
            return None;
        }
        let size = round_up(size)?;
        let new_begin = self.begin.checked_add(size)?;
        if new_begin > self.end {
            return None;
        }
        let allocation = self.begin;
        self.begin = new_begin;
        Some(allocation)
    }

    /// Permanently prevents any further allocation.
    pub fn disable(&mut self) {
        self.disabled = true;
    }

    /// Returns the remaining unallocated range.
    pub fn limits(&self) -> Range<usize> {
        self.begin..self.end
    }
}

fn round_up(value: usize) -> Option<usize> {
    Some(value.checked_add(RESMEM_ALIGNMENT - 1)? & !(RESMEM_ALIGNMENT - 1))
}

/// Sets up the global reserved memory region.
pub fn init(begin: usize, end: usize) {
    let region = ReservedMemory::new(begin, end);
    debug!("Reserved memory {:#x}..{:#x}", region.begin, region.end);
    **RESMEM.lock() = region;
}

/// Allocates `size` bytes from the global reserved memory region.
#[allow(unused)]
pub fn alloc(size: usize) -> Option<usize> {
    RESMEM.lock().alloc(size)
}

/// Permanently disables the global reserved memory region, once a general purpose allocator has
/// taken over.
#[allow(unused)]
pub fn disable() {
    RESMEM.lock().disable();
}

/// Returns the remaining range of the global reserved memory region.
pub fn limits() -> Range<usize> {
    RESMEM.lock().limits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_rounded_up() {
        let region = ReservedMemory::new(0x1001, 0x2000);
        assert_eq!(region.limits(), 0x1008..0x2000);
    }

    #[test]
    fn overflowing_begin_disables() {
        let mut region = ReservedMemory::new(usize::MAX - 2, usize::MAX);
        assert_eq!(region.alloc(1), None);
        assert_eq!(region.alloc(0), None);
        assert_eq!(region.limits(), usize::MAX..usize::MAX);
    }

    #[test]
    fn rounding_past_end_disables() {
        let mut region = ReservedMemory::new(0x1001, 0x1004);
        assert_eq!(region.limits(), 0x1004..0x1004);
        assert_eq!(region.alloc(0), None);

        let region = ReservedMemory::new(0x2000, 0x1000);
        assert_eq!(region.limits(), 0x1000..0x1000);
    }

    #[test]
    fn allocations_do_not_overlap() {
        let mut region = ReservedMemory::new(0x1000, 0x1100);
        let first = region.alloc(3).unwrap();
        let second = region.alloc(8).unwrap();
        let third = region.alloc(17).unwrap();
        assert_eq!(first, 0x1000);
        assert_eq!(second, 0x1008);
        assert_eq!(third, 0x1010);
        assert_eq!(region.limits(), 0x1028..0x1100);
    }

    #[test]
    fn exhaustion() {
        let mut region = ReservedMemory::new(0x1000, 0x1040);
        let mut total = 0;
        while let Some(address) = region.alloc(12) {
            assert_eq!(address, 0x1000 + total);
            total += 16;
        }
        assert_eq!(total, 0x40);
        assert_eq!(region.alloc(1), None);
        // A failed allocation doesn't move the cursor.
        assert_eq!(region.limits(), 0x1040..0x1040);
    }

    #[test]
    fn oversized_allocation_fails() {
        let mut region = ReservedMemory::new(0x1000, 0x2000);
        assert_eq!(region.alloc(usize::MAX), None);
        assert_eq!(region.alloc(usize::MAX - 3), None);
        assert_eq!(region.alloc(0x1001), None);
        assert_eq!(region.alloc(0x1000), Some(0x1000));
    }

    #[test]
    fn disabled_never_allocates() {
        let mut region = ReservedMemory::new(0x1000, 0x2000);
        assert_eq!(region.alloc(8), Some(0x1000));
        region.disable();
        assert_eq!(region.alloc(8), None);
        assert_eq!(region.limits(), 0x1008..0x2000);
    }

    #[test]
    fn global_region() {
        init(0x9fe4_0004, 0x9fe5_0000);
        assert_eq!(limits(), 0x9fe4_0008..0x9fe5_0000);
        assert_eq!(alloc(0x10), Some(0x9fe4_0008));
        disable();
        assert_eq!(alloc(0x10), None);
    }
}
