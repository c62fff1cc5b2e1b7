// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

mod qemu;
mod vexpress;

use qemu::QemuBuilder;
use std::{error::Error, path::Path};
use vexpress::VexpressBuilder;

pub const PLATFORMS: [&str; 2] = [VexpressBuilder::PLAT_NAME, QemuBuilder::PLAT_NAME];

pub trait Builder {
    /// Base address of the secure RAM the trusted OS is linked to run from.
    ///
    /// This is passed to the linker script through the `TEE_RAM_BASE` symbol.
    fn tee_ram_base(&self) -> u64;

    /// Size of the secure RAM the trusted OS owns, including the reserved memory after the
    /// image.
    ///
    /// This is passed to the linker script through the `TEE_RAM_SIZE` symbol. The end of this
    /// range becomes `_end_of_ram`, the upper bound of the reserved memory allocator.
    fn tee_ram_size(&self) -> u64;
}

pub fn get_builder(platform: &str) -> Result<Box<dyn Builder>, Box<dyn Error>> {
    match platform {
        VexpressBuilder::PLAT_NAME => Ok(Box::new(VexpressBuilder)),
        QemuBuilder::PLAT_NAME => Ok(Box::new(QemuBuilder)),
        _ => Err(format!(
            "Unexpected platform name {platform:?}. Supported platforms: {PLATFORMS:?}"
        )
        .into()),
    }
}

pub fn add_linker_script(path: &Path) {
    println!("cargo:rustc-link-arg=-T{}", path.display());
    println!("cargo:rerun-if-changed={}", path.display());
}

pub fn define_linker_symbol(name: &str, value: u64) {
    println!("cargo:rustc-link-arg=--defsym={name}={value}");
}
