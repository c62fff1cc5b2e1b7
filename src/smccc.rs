// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Types and helpers related to the SMC Calling Convention, as used between the secure monitor
//! and the trusted OS.

use core::fmt::{self, Debug, Display, Formatter};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, transmute};

const FAST_CALL: u32 = 0x8000_0000;
const SMC64: u32 = 0x4000_0000;
const OEN_MASK: u32 = 0x3f00_0000;
const OEN_SHIFT: u8 = 24;

/// Value returned in the first register for a function ID which isn't recognised.
pub const UNKNOWN_FUNCTION: u32 = 0xffff_ffff;

/// The type of an SMCCC call: whether it is a fast call or yielding call, and which calling
/// convention it uses.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SmcccCallType {
    /// An SMC32 fast call.
    Fast32,
    /// An SMC64 fast call.
    Fast64,
    /// A yielding (standard) call.
    Yielding,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OwningEntity {
    ArmArchitectureService,
    CPUService,
    SiPService,
    OEMService,
    StandardService,
    TrustedApplications,
    TrustedOS,
    Monitor,
    Unknown,
}

/// Owning Entity Number (OEN)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OwningEntityNumber(pub u8);

impl OwningEntityNumber {
    pub const ARM_ARCHITECTURE: Self = Self(0);
    pub const CPU: Self = Self(1);
    pub const SIP: Self = Self(2);
    pub const OEM: Self = Self(3);
    pub const STANDARD: Self = Self(4);
    pub const TRUSTED_APP: Self = Self(48);
    pub const TRUSTED_OS: Self = Self(50);
    /// Calls exchanged between the secure monitor and the trusted OS.
    pub const MONITOR: Self = Self(63);

    pub fn oe(self) -> OwningEntity {
        match self {
            Self::ARM_ARCHITECTURE => OwningEntity::ArmArchitectureService,
            Self::CPU => OwningEntity::CPUService,
            Self::SIP => OwningEntity::SiPService,
            Self::OEM => OwningEntity::OEMService,
            Self::STANDARD => OwningEntity::StandardService,
            Self(48..=49) => OwningEntity::TrustedApplications,
            Self::MONITOR => OwningEntity::Monitor,
            Self(50..=62) => OwningEntity::TrustedOS,
            _ => OwningEntity::Unknown,
        }
    }
}

impl Display for OwningEntityNumber {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An SMCCC function ID.
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct FunctionId(pub u32);

impl FunctionId {
    /// Creates a new `FunctionId` from its components.
    pub const fn new(call_type: SmcccCallType, oen: OwningEntityNumber, number: u16) -> Self {
        let type_bits = match call_type {
            SmcccCallType::Fast32 => FAST_CALL,
            SmcccCallType::Fast64 => FAST_CALL | SMC64,
            SmcccCallType::Yielding => 0,
        };
        Self(type_bits | (((oen.0 as u32) << OEN_SHIFT) & OEN_MASK) | (number as u32))
    }

    /// Returns the Owning Entity Number of the function ID.
    pub fn oen(self) -> OwningEntityNumber {
        OwningEntityNumber(((self.0 & OEN_MASK) >> OEN_SHIFT) as u8)
    }

    /// Returns the lower 16 bits of the function ID.
    pub fn number(self) -> u16 {
        self.0 as u16
    }

    /// Returns what type of call this is.
    pub fn call_type(self) -> SmcccCallType {
        if self.is_fast() {
            if self.0 & SMC64 != 0 {
                SmcccCallType::Fast64
            } else {
                SmcccCallType::Fast32
            }
        } else {
            SmcccCallType::Yielding
        }
    }

    /// Returns whether this is a fast call, which must be handled without blocking.
    pub fn is_fast(self) -> bool {
        self.0 & FAST_CALL != 0
    }
}

impl Display for FunctionId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl Debug for FunctionId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{:#010x} ({:?} OEN {} {:?})",
            self.0,
            self.call_type(),
            self.oen(),
            self.oen().oe()
        )
    }
}

const fn monitor_call(number: u16) -> FunctionId {
    FunctionId::new(SmcccCallType::Fast32, OwningEntityNumber::MONITOR, number)
}

/// Returns from the trusted OS to the monitor, with the results in the following registers.
pub const SMC_CALL_RETURN: FunctionId = monitor_call(0);
/// Asks the trusted OS to handle a FIQ which was taken while the normal world was running.
pub const SMC_CALL_HANDLE_FIQ: FunctionId = monitor_call(1);
/// Returns from the trusted OS to the monitor after handling a FIQ.
pub const SMC_CALL_RETURN_FROM_FIQ: FunctionId = monitor_call(2);
/// Asks the monitor to forward an RPC request to the normal world.
pub const SMC_CALL_REQUEST_RPC: FunctionId = monitor_call(3);
/// Reports a call the monitor didn't recognise.
pub const SMC_CALL_UNKNOWN: FunctionId = monitor_call(4);
/// Resumes a thread which was suspended for an RPC.
pub const SMC_CALL_RETURN_FROM_RPC: FunctionId =
    FunctionId::new(SmcccCallType::Yielding, OwningEntityNumber::TRUSTED_OS, 0);

/// Codes returned in the first result register when a standard call completes or is rejected.
#[derive(Copy, Clone, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum TrustedOsReturn {
    /// The call completed.
    Ok = 0,
    /// The thread is suspended waiting for the normal world to service an RPC.
    Rpc = 1,
    /// No thread was free to service the call.
    NoThread = 0x10,
    /// The thread to resume doesn't exist, isn't suspended, or belongs to another client.
    BadThread = 0x11,
}

/// Reasons for an RPC, passed along with [`TrustedOsReturn::Rpc`].
#[derive(Copy, Clone, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum RpcReason {
    /// The thread was interrupted by an IRQ which must be handled by the normal world.
    Irq = 0,
}

/// The eight argument registers of an SMC, as captured by the monitor.
///
/// The same structure carries the results back.
#[derive(
    Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq,
)]
#[repr(C)]
pub struct SmcArgs {
    /// Function ID, or the first result.
    pub a0: u32,
    pub a1: u32,
    pub a2: u32,
    pub a3: u32,
    /// Thread ID when returning from an RPC.
    pub a4: u32,
    pub a5: u32,
    /// Optional session ID.
    pub a6: u32,
    /// Hypervisor client ID.
    pub a7: u32,
}

impl SmcArgs {
    /// Returns the function ID in the first register.
    pub fn function(&self) -> FunctionId {
        FunctionId(self.a0)
    }

    /// Returns the registers as an array, `a0` first.
    pub fn to_array(self) -> [u32; 8] {
        transmute!(self)
    }

    /// Creates a set of registers from an array, `a0` first.
    #[cfg(test)]
    pub fn from_array(values: [u32; 8]) -> Self {
        transmute!(values)
    }

    /// Rejects the call by returning `code` to the monitor, clearing the other result registers.
    pub fn reject(&mut self, code: TrustedOsReturn) {
        self.a0 = SMC_CALL_RETURN.0;
        self.a1 = code.into();
        self.a2 = 0;
        self.a3 = 0;
        self.a4 = 0;
    }

    /// Builds the registers which ask the monitor to forward an RPC for the given thread to the
    /// normal world.
    ///
    /// The monitor passes `a1` onwards to the normal world as its `r0`, so the thread ID in `a5`
    /// reaches the normal world in `r4`, which is where it must be supplied when resuming.
    pub fn rpc_request(thread_id: u32, reason: RpcReason) -> Self {
        Self {
            a0: SMC_CALL_RETURN.0,
            a1: TrustedOsReturn::Rpc.into(),
            a2: reason.into(),
            a5: thread_id,
            ..Default::default()
        }
    }
}
