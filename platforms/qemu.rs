// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use super::Builder;

pub struct QemuBuilder;

impl QemuBuilder {
    pub const PLAT_NAME: &str = "qemu";

    const TEE_RAM_BASE: u64 = 0x0e10_0000;
    const TEE_RAM_SIZE: u64 = 0x00f0_0000;
}

impl Builder for QemuBuilder {
    fn tee_ram_base(&self) -> u64 {
        Self::TEE_RAM_BASE
    }

    fn tee_ram_size(&self) -> u64 {
        Self::TEE_RAM_SIZE
    }
}
