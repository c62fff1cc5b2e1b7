// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use super::Builder;

pub struct VexpressBuilder;

impl VexpressBuilder {
    pub const PLAT_NAME: &str = "vexpress";

    /// The top 2 MiB of DDR0, above the 510 MiB given to the normal world.
    const TEE_RAM_BASE: u64 = 0x9fe0_0000;
    const TEE_RAM_SIZE: u64 = 0x0020_0000;
}

impl Builder for VexpressBuilder {
    fn tee_ram_base(&self) -> u64 {
        Self::TEE_RAM_BASE
    }

    fn tee_ram_size(&self) -> u64 {
        Self::TEE_RAM_SIZE
    }
}
