// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Secure world configuration of a GICv2, on top of the `arm-gic` driver.

use crate::platform::{GicImpl, Platform, PlatformImpl};
use arm_gic::{
    IntId, InterruptGroup, UniqueMmioPointer,
    gicv2::{
        GicV2,
        registers::{Gicc, Gicd},
    },
};
use core::ops::RangeInclusive;
use log::{debug, info, warn};
use safe_mmio::field;
use spin::{Once, mutex::SpinMutex};

/// Interrupt IDs with a special meaning, which are never acknowledged.
const SPECIAL_INTIDS: RangeInclusive<IntId> = IntId::SPECIAL_SECURE..=IntId::SPECIAL_NONE;

const GICC_CTLR_ENABLEGRP0: u32 = 1 << 0;
const GICC_CTLR_ENABLEGRP1: u32 = 1 << 1;
const GICC_CTLR_FIQEN: u32 = 1 << 3;

/// The interrupt controller, once it has been initialised.
pub static GIC: Once<SpinMutex<GicImpl>> = Once::new();

/// The operations the secure world needs from an interrupt controller.
pub trait InterruptController {
    /// Disables every interrupt, makes them non-secure, and enables the controller.
    fn init(&mut self);

    /// Configures the given interrupt as a disabled secure interrupt, signalled as FIQ.
    fn add(&mut self, id: IntId);

    /// Routes the given shared peripheral interrupt to the CPUs in `cpu_mask`.
    fn set_target(&mut self, id: IntId, cpu_mask: u8);

    /// Sets the priority of the given interrupt. Lower values are higher priority.
    fn set_priority(&mut self, id: IntId, priority: u8);

    /// Enables forwarding of the given interrupt.
    fn enable(&mut self, id: IntId);

    /// Disables forwarding of the given interrupt.
    fn disable(&mut self, id: IntId);

    /// Acknowledges the highest priority pending secure interrupt, or returns `None` if nothing is
    /// pending.
    fn acknowledge(&mut self) -> Option<IntId>;

    /// Signals completion of the given acknowledged interrupt.
    fn end_of_interrupt(&mut self, id: IntId);
}

/// A GICv2 with the security extensions, as programmed from the secure side.
pub struct SecureGic<'a> {
    gicd: UniqueMmioPointer<'a, Gicd>,
    gicc: UniqueMmioPointer<'a, Gicc>,
}

impl<'a> SecureGic<'a> {
    /// Creates a driver for the GIC with the given distributor and CPU interface registers.
    pub fn new(gicd: UniqueMmioPointer<'a, Gicd>, gicc: UniqueMmioPointer<'a, Gicc>) -> Self {
        Self { gicd, gicc }
    }

    fn driver(&mut self) -> GicV2<'_> {
        // SAFETY: The `UniqueMmioPointer`s guarantee that the registers are valid and have no other
        // aliases, and the driver borrows `self` so they can't be used any other way while it
        // exists.
        unsafe { GicV2::new(self.gicd.ptr_mut(), self.gicc.ptr_mut()) }
    }

    /// Returns the number of interrupt lines implemented by the distributor.
    fn line_count(&mut self) -> u32 {
        self.driver()
            .typer()
            .num_irqs()
            .min(IntId::SPECIAL_SECURE.into())
    }

    fn check_id(&mut self, id: IntId) {
        let lines = self.line_count();
        assert!(
            u32::from(id) < lines,
            "{id:?} is beyond the {lines} lines of the GIC"
        );
    }
}

fn reg_and_bit(id: IntId) -> (usize, u32) {
    let id = u32::from(id);
    ((id / 32) as usize, 1 << (id % 32))
}

fn byte_index_and_shift(id: IntId) -> (usize, u32) {
    let id = u32::from(id);
    ((id / 4) as usize, 8 * (id % 4))
}

impl InterruptController for SecureGic<'_> {
    fn init(&mut self) {
        let lines = self.line_count();
        debug!("GIC has {lines} interrupt lines");

        let mut gic = self.driver();
        gic.enable_all_interrupts(false);
        // With the security extensions this routes every line to group 1, which is non-secure.
        gic.setup();
        gic.enable_group0(true);

        for mut pending in field!(self.gicd, icpendr)
            .into_iter()
            .take(lines.div_ceil(32) as usize)
        {
            pending.write(0xffff_ffff);
        }
        let control = GICC_CTLR_ENABLEGRP0 | GICC_CTLR_ENABLEGRP1 | GICC_CTLR_FIQEN;
        field!(self.gicc, ctlr).write(control);
    }

    fn add(&mut self, id: IntId) {
        self.check_id(id);
        self.disable(id);
        let (index, bit) = reg_and_bit(id);
        if let Some(mut pending) = field!(self.gicd, icpendr).get(index) {
            pending.write(bit);
        }
        self.driver().set_group(id, InterruptGroup::Group0);
    }

    fn set_target(&mut self, id: IntId, cpu_mask: u8) {
        self.check_id(id);
        let (index, shift) = byte_index_and_shift(id);
        if let Some(mut targets) = field!(self.gicd, itargetsr).get(index) {
            // SAFETY: Reading and writing ITARGETSR has no side effects.
            unsafe {
                let value = targets.read_unsafe();
                targets.write_unsafe((value & !(0xff << shift)) | (u32::from(cpu_mask) << shift));
            }
        }
    }

    fn set_priority(&mut self, id: IntId, priority: u8) {
        self.check_id(id);
        // `GicV2::set_interrupt_priority` overwrites the other three lines sharing the register.
        let (index, shift) = byte_index_and_shift(id);
        if let Some(mut priorities) = field!(self.gicd, ipriorityr).get(index) {
            priorities.modify(|value| (value & !(0xff << shift)) | (u32::from(priority) << shift));
        }
    }

    fn enable(&mut self, id: IntId) {
        self.check_id(id);
        if let Err(e) = self.driver().enable_interrupt(id, true) {
            warn!("{e}");
        }
    }

    fn disable(&mut self, id: IntId) {
        self.check_id(id);
        if let Err(e) = self.driver().enable_interrupt(id, false) {
            warn!("{e}");
        }
    }

    fn acknowledge(&mut self) -> Option<IntId> {
        self.driver().get_and_acknowledge_interrupt(InterruptGroup::Group0)
    }

    fn end_of_interrupt(&mut self, id: IntId) {
        self.driver().end_interrupt(id, InterruptGroup::Group0);
    }
}

/// Creates the platform's interrupt controller and initialises it.
pub fn init() {
    GIC.call_once(|| {
        // SAFETY: This is the only place the GIC driver is created, as `call_once` runs this
        // closure at most once.
        SpinMutex::new(unsafe { PlatformImpl::create_gic() })
    })
    .lock()
    .init();
    info!("GIC configured");
}

/// Acknowledges the pending interrupt, logs it, and signals its end.
///
/// Returns the acknowledged interrupt ID, or `None` if it was spurious.
pub fn handle_fiq(gic: &mut impl InterruptController) -> Option<IntId> {
    let id = gic.acknowledge().filter(|id| !SPECIAL_INTIDS.contains(id));
    let Some(id) = id else {
        debug!("Spurious FIQ");
        return None;
    };
    debug!("FIQ {id:?}");
    gic.end_of_interrupt(id);
    Some(id)
}

/// Fake GIC registers for unit tests.
#[cfg(test)]
pub struct FakeGic {
    /// The distributor registers.
    pub gicd: Gicd,
    /// The CPU interface registers.
    pub gicc: Gicc,
}

#[cfg(test)]
impl FakeGic {
    const TYPER_SECURITY_EXTN: u32 = 1 << 10;

    /// Returns zeroed registers of a GIC with the security extensions and
    /// `32 * (it_lines_number + 1)` interrupt lines.
    pub fn new(it_lines_number: u32) -> Box<Self> {
        // SAFETY: All the registers are plain integers, for which zero is a valid value.
        let mut fake = unsafe { Box::<Self>::new_zeroed().assume_init() };
        let typer: &mut u32 = zerocopy::transmute_mut!(&mut fake.gicd.typer.0);
        *typer = Self::TYPER_SECURITY_EXTN | it_lines_number;
        fake
    }

    /// Returns a driver for the fake registers.
    pub fn build(&mut self) -> SecureGic<'_> {
        SecureGic::new(
            UniqueMmioPointer::from(&mut self.gicd),
            UniqueMmioPointer::from(&mut self.gicc),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arm_gic::gicv2::registers::GicdCtlr;

    #[test]
    fn init_makes_everything_non_secure() {
        let mut fake = FakeGic::new(2);
        fake.build().init();

        for n in 0..32 {
            assert_eq!(fake.gicd.icenabler[n].0, 0xffff_ffff);
            assert_eq!(fake.gicd.igroupr[n].0, 0xffff_ffff);
        }
        for n in 0..3 {
            assert_eq!(fake.gicd.icpendr[n].0, 0xffff_ffff);
        }
        assert_eq!(fake.gicd.icpendr[3].0, 0);
        assert_eq!(fake.gicc.ctlr.0, 0b1011);
        assert_eq!(fake.gicc.pmr.0, 0xff);
        assert_eq!(fake.gicd.ctlr.0, GicdCtlr::EnableGrp0 | GicdCtlr::EnableGrp1);
    }

    #[test]
    fn line_count_capped() {
        let mut fake = FakeGic::new(31);
        assert_eq!(fake.build().line_count(), 1020);
    }

    #[test]
    fn add_secure_interrupt() {
        let mut fake = FakeGic::new(2);
        let id = IntId::spi(5);
        {
            let mut gic = fake.build();
            gic.init();
            gic.add(id);
            gic.set_priority(id, 0x20);
            gic.set_target(id, 0x1);
            gic.enable(id);
        }

        assert_eq!(fake.gicd.igroupr[1].0, !(1 << 5));
        assert_eq!(fake.gicd.isenabler[1].0, 1 << 5);
        assert_eq!(fake.gicd.ipriorityr[9].0, 0x20 << 8);
        assert_eq!(fake.gicd.itargetsr[9], 0x1 << 8);

        fake.gicd.icenabler[1].0 = 0;
        fake.build().disable(id);
        assert_eq!(fake.gicd.icenabler[1].0, 1 << 5);
    }

    #[test]
    fn neighbouring_lines_keep_their_settings() {
        let mut fake = FakeGic::new(2);
        {
            let mut gic = fake.build();
            gic.set_priority(IntId::spi(4), 0x10);
            gic.set_priority(IntId::spi(5), 0x20);
            gic.set_target(IntId::spi(4), 0x2);
            gic.set_target(IntId::spi(7), 0x1);
        }
        assert_eq!(fake.gicd.ipriorityr[9].0, 0x2010);
        assert_eq!(fake.gicd.itargetsr[9], 0x0100_0002);
    }

    #[test]
    #[should_panic(expected = "beyond the 32 lines")]
    fn interrupt_out_of_range() {
        let mut fake = FakeGic::new(0);
        fake.build().enable(IntId::spi(0));
    }

    #[test]
    fn global_gic() {
        init();
        assert_eq!(GIC.get().unwrap().lock().line_count(), 64);
    }

    #[test]
    fn fiq_acknowledged_and_ended() {
        let mut fake = FakeGic::new(2);
        fake.gicc.iar.0 = 37;
        assert_eq!(handle_fiq(&mut fake.build()), Some(IntId::spi(5)));
        assert_eq!(fake.gicc.eoir.0, 37);
    }

    #[test]
    fn spurious_fiq() {
        let mut fake = FakeGic::new(2);
        for iar in [1022, 1023] {
            fake.gicc.iar.0 = iar;
            assert_eq!(handle_fiq(&mut fake.build()), None);
            assert_eq!(fake.gicc.eoir.0, 0);
        }
    }
}
