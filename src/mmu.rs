// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Identity mapping with a single level of 1 MiB section descriptors, using the short-descriptor
//! translation table format.

use crate::{
    aarch32::{isb, tlb_invalidate_all},
    prebss::prebss_mut,
};
use arm32_sysregs::{Sctlr, read_sctlr, write_dacr, write_sctlr, write_ttbr0};
use bitflags::bitflags;
use core::{
    fmt::{self, Debug, Formatter},
    ops::Range,
};
use log::{debug, info, trace};
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// The number of entries in the first level table, enough to map 4 GiB.
pub const SECTION_COUNT: usize = 4096;
const SECTION_SHIFT: usize = 20;
/// The size of the region mapped by a single section descriptor.
pub const SECTION_SIZE: usize = 1 << SECTION_SHIFT;
const SECTION_MASK: usize = SECTION_SIZE - 1;

/// TTBR0 attributes: shareable, inner and outer write-back write-allocate table walks.
const TTBR_SHARED_WBWA: u32 = (1 << 1) | (1 << 3) | (1 << 6);

/// Client access to domain 0, so the permission bits of each descriptor are checked.
const DACR_CLIENT_D0: u32 = 1;

bitflags! {
    /// Attribute bits of a first level section descriptor.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct SectionAttributes: u32 {
        const SECTION = 0b10;
        const B = 1 << 2;
        const C = 1 << 3;
        const XN = 1 << 4;
        const AP0 = 1 << 10;
        const AP1 = 1 << 11;
        const TEX0 = 1 << 12;
        const AP2 = 1 << 15;
        const S = 1 << 16;
        const NG = 1 << 17;
        const NS = 1 << 19;
    }
}

/// Normal memory, inner and outer write-back write-allocate.
const TYPE_WBWA: SectionAttributes = SectionAttributes::TEX0
    .union(SectionAttributes::B)
    .union(SectionAttributes::C);
/// Shareable device memory.
const TYPE_DEVICE: SectionAttributes = SectionAttributes::B;

/// Attributes used for all mappings: shared, global, with the access flag set.
const BASE: SectionAttributes = SectionAttributes::SECTION
    .union(SectionAttributes::S)
    .union(SectionAttributes::AP0);

/// Read-only for PL1, no access from PL0, executable.
pub const MT_CODE: SectionAttributes = TYPE_WBWA.union(BASE).union(SectionAttributes::AP2);

/// Read-write for PL1, no access from PL0.
pub const MT_MEMORY: SectionAttributes = TYPE_WBWA.union(BASE);

/// Device memory is never cached and never executable.
pub const MT_DEVICE: SectionAttributes = TYPE_DEVICE.union(BASE).union(SectionAttributes::XN);

prebss_mut!(TRANSLATION_TABLE, SectionTable, ".bss.prebss.mmu");

/// A first level translation table made up entirely of section descriptors.
#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C, align(16384))]
pub struct SectionTable {
    entries: [u32; SECTION_COUNT],
}

impl SectionTable {
    /// Clears the table, then identity maps `code` as read-only executable memory and `data` as
    /// read-write memory, both secure.
    pub fn init(&mut self, code: Range<usize>, data: Range<usize>) {
        self.entries.fill(0);
        self.map_range(code, MT_CODE);
        self.map_range(data, MT_MEMORY);
    }

    /// Identity maps the given range as secure device memory.
    ///
    /// Returns whether any descriptor changed, in which case the TLB must be invalidated.
    pub fn map_device(&mut self, addr: usize, len: usize) -> bool {
        self.map_range(addr..addr.saturating_add(len), MT_DEVICE)
    }

    /// Identity maps the given range for read-write access, as non-secure memory if `non_secure`
    /// is set.
    ///
    /// The range gets the same shareable device attributes as [`Self::map_device`] rather than
    /// [`MT_MEMORY`].
    ///
    /// Returns whether any descriptor changed, in which case the TLB must be invalidated.
    pub fn map_rwmem(&mut self, addr: usize, len: usize, non_secure: bool) -> bool {
        let attributes = if non_secure {
            MT_DEVICE.union(SectionAttributes::NS)
        } else {
            MT_DEVICE
        };
        self.map_range(addr..addr.saturating_add(len), attributes)
    }

    /// Returns the descriptor which maps the given address.
    pub fn entry(&self, addr: usize) -> u32 {
        self.entries[addr >> SECTION_SHIFT]
    }

    /// Writes a descriptor with the given attributes for each section overlapping `range`, unless
    /// it is already present. Returns whether any descriptor was written.
    fn map_range(&mut self, range: Range<usize>, attributes: SectionAttributes) -> bool {
        if range.is_empty() {
            return false;
        }
        let first = range.start >> SECTION_SHIFT;
        let last = (range.end - 1) >> SECTION_SHIFT;
        assert!(
            last < SECTION_COUNT,
            "Range {range:#x?} is beyond the 4 GiB address space"
        );

        let mut changed = false;
        for index in first..=last {
            let descriptor = section_descriptor(index, attributes);
            let entry = &mut self.entries[index];
            if *entry != descriptor {
                trace!(
                    "Section {:#010x}: {:#010x} -> {:#010x}",
                    index << SECTION_SHIFT,
                    *entry,
                    descriptor
                );
                *entry = descriptor;
                changed = true;
            }
        }
        changed
    }
}

impl Debug for SectionTable {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut list = f.debug_map();
        for (index, entry) in self.entries.iter().enumerate() {
            if *entry != 0 {
                list.entry(&(index << SECTION_SHIFT), entry);
            }
        }
        list.finish()
    }
}

fn section_descriptor(index: usize, attributes: SectionAttributes) -> u32 {
    ((index << SECTION_SHIFT) & !SECTION_MASK) as u32 | attributes.bits()
}

/// Builds the identity map for the image and the log console in the global table, and enables the
/// MMU, caches and branch prediction.
///
/// # Safety
///
/// `code` and `data` must cover everything the running code accesses, including its stacks and
/// the translation table itself, with nothing else mapped. `console` must be the device the logger
/// writes to.
pub unsafe fn init(code: Range<usize>, data: Range<usize>, console: Range<usize>) {
    let mut table = TRANSLATION_TABLE.lock();
    info!("Mapping code {code:#x?} and data {data:#x?}");
    table.init(code, data);
    // Logs after this point need the console mapped.
    table.map_device(console.start, console.len());
    let table_address = (&raw const **table) as usize;

    // SAFETY: The table is 16 KiB aligned, lives for the rest of the program and maps the image,
    // as promised by our caller.
    unsafe {
        write_ttbr0(table_address as u32 | TTBR_SHARED_WBWA);
        write_dacr(DACR_CLIENT_D0);
        write_sctlr(read_sctlr() | Sctlr::AFE | Sctlr::M | Sctlr::C | Sctlr::I | Sctlr::Z);
    }
    isb();
    debug!("MMU enabled with translation table at {table_address:#x}");
}

/// Identity maps a secure device region and returns its virtual address.
pub fn map_device(addr: usize, len: usize) -> usize {
    if TRANSLATION_TABLE.lock().map_device(addr, len) {
        tlb_invalidate_all();
    }
    addr
}

/// Identity maps a read-write region and returns its virtual address.
///
/// See [`SectionTable::map_rwmem`] for the attributes used.
pub fn map_rwmem(addr: usize, len: usize, non_secure: bool) -> usize {
    if TRANSLATION_TABLE.lock().map_rwmem(addr, len, non_secure) {
        tlb_invalidate_all();
    }
    addr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prebss::const_zeroed;
    use arm32_sysregs::{fake::SYSREGS, read_dacr, read_ttbr0};

    fn new_table() -> Box<SectionTable> {
        Box::new(const_zeroed())
    }

    #[test]
    fn descriptor_encoding() {
        assert_eq!(MT_CODE.bits(), 0x0001_940e);
        assert_eq!(MT_MEMORY.bits(), 0x0001_140e);
        assert_eq!(MT_DEVICE.bits(), 0x0001_0416);
        assert_eq!(section_descriptor(0x801, MT_DEVICE), 0x8011_0416);
    }

    #[test]
    fn device_never_cached_or_executable() {
        assert!(MT_DEVICE.contains(SectionAttributes::XN));
        assert!(!MT_DEVICE.contains(SectionAttributes::C));
        assert!(!MT_DEVICE.contains(SectionAttributes::TEX0));
    }

    #[test]
    fn init_maps_code_and_data() {
        let mut table = new_table();
        table.map_device(0x1c0a_0000, 0x1000);
        table.init(0x9fe0_0000..0x9fe2_0000, 0x9fe2_0000..0xa000_0000);

        assert_eq!(table.entry(0x1c0a_0000), 0);
        // Code and data share the first section, and data wins.
        assert_eq!(table.entry(0x9fe0_0000), 0x9fe0_0000 | MT_MEMORY.bits());
        assert_eq!(table.entry(0x9ff0_0000), 0x9ff0_0000 | MT_MEMORY.bits());
        assert_eq!(table.entry(0xa000_0000), 0);
        assert_eq!(table.entry(0x9fd0_0000), 0);
    }

    #[test]
    fn code_only_section_read_only() {
        let mut table = new_table();
        table.init(0x0e10_0000..0x0e20_0000, 0x0e20_0000..0x0e30_0000);
        assert_eq!(table.entry(0x0e10_0000), 0x0e10_0000 | MT_CODE.bits());
        assert_eq!(table.entry(0x0e20_0000), 0x0e20_0000 | MT_MEMORY.bits());
    }

    #[test]
    fn map_device_idempotent() {
        let mut table = new_table();
        assert!(table.map_device(0x2c00_1000, 0x20_0000));
        assert_eq!(table.entry(0x2c00_0000), 0x2c00_0000 | MT_DEVICE.bits());
        assert_eq!(table.entry(0x2c10_0000), 0x2c10_0000 | MT_DEVICE.bits());
        assert_eq!(table.entry(0x2c20_0000), 0x2c20_0000 | MT_DEVICE.bits());
        assert_eq!(table.entry(0x2c30_0000), 0);

        let before = table.entries;
        assert!(!table.map_device(0x2c00_1000, 0x20_0000));
        assert_eq!(table.entries, before);
    }

    #[test]
    fn map_rwmem_idempotent() {
        let mut table = new_table();
        assert!(table.map_rwmem(0x8000_0000, 510 * SECTION_SIZE, true));
        let before = table.entries;
        assert!(!table.map_rwmem(0x8000_0000, 510 * SECTION_SIZE, true));
        assert_eq!(table.entries, before);

        let expected = (MT_DEVICE | SectionAttributes::NS).bits();
        assert_eq!(table.entry(0x8000_0000), 0x8000_0000 | expected);
        assert_eq!(table.entry(0x9fd0_0000), 0x9fd0_0000 | expected);
        assert_eq!(table.entry(0x9fe0_0000), 0);

        // Changing only the security state rewrites the descriptors.
        assert!(table.map_rwmem(0x8000_0000, SECTION_SIZE, false));
        assert_eq!(table.entry(0x8000_0000), 0x8000_0000 | MT_DEVICE.bits());
    }

    #[test]
    fn empty_range_maps_nothing() {
        let mut table = new_table();
        assert!(!table.map_device(0x1000_0000, 0));
        assert_eq!(table.entry(0x1000_0000), 0);
    }

    #[test]
    fn top_of_address_space() {
        let mut table = new_table();
        assert!(table.map_device(0xfff0_0000, SECTION_SIZE));
        assert_eq!(table.entry(0xfff0_0000), 0xfff0_0000 | MT_DEVICE.bits());
    }

    #[test]
    fn global_table() {
        // SAFETY: The MMU is fake in unit tests.
        unsafe {
            init(
                0x9fe0_0000..0x9fe2_0000,
                0x9fe2_0000..0x9ff0_0000,
                0x1c0a_0000..0x1c0a_1000,
            );
        }
        // The console is usable as soon as the MMU is on.
        assert_eq!(
            TRANSLATION_TABLE.lock().entry(0x1c0a_0000),
            0x1c00_0000 | MT_DEVICE.bits()
        );
        assert_eq!(read_ttbr0() & 0x3fff, TTBR_SHARED_WBWA);
        assert_eq!(read_dacr(), DACR_CLIENT_D0);
        assert!(
            SYSREGS
                .lock()
                .unwrap()
                .sctlr
                .contains(Sctlr::AFE | Sctlr::M | Sctlr::C | Sctlr::I | Sctlr::Z)
        );

        assert_eq!(map_device(0x1c0a_0000, 0x1000), 0x1c0a_0000);
        assert_eq!(
            TRANSLATION_TABLE.lock().entry(0x1c0a_0000),
            0x1c00_0000 | MT_DEVICE.bits()
        );
        assert_eq!(map_rwmem(0x8000_0000, SECTION_SIZE, true), 0x8000_0000);
    }
}
