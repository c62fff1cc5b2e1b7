// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Entry point for trusted OS commands, called by both the standard and fast call handlers.

use crate::smccc::{
    FunctionId, OwningEntityNumber, SMC_CALL_RETURN, SmcArgs, SmcccCallType, TrustedOsReturn,
    UNKNOWN_FUNCTION,
};
use log::{debug, info};

const fn tee_call(number: u16) -> FunctionId {
    FunctionId::new(SmcccCallType::Yielding, OwningEntityNumber::TRUSTED_OS, number)
}

const OPEN_SESSION: FunctionId = tee_call(1);
const CLOSE_SESSION: FunctionId = tee_call(2);
const INVOKE_COMMAND: FunctionId = tee_call(3);
const REGISTER_RPC: FunctionId = tee_call(4);
const CANCEL: FunctionId = tee_call(5);

/// Handles a trusted OS command, leaving the results in `args.a1` to `args.a3`.
pub fn entry(args: &mut SmcArgs) {
    let function = args.function();
    let result = match function {
        OPEN_SESSION => {
            info!("Open session, session {:#x}", args.a6);
            TrustedOsReturn::Ok.into()
        }
        INVOKE_COMMAND => {
            debug!("Invoke command {:#x}, session {:#x}", args.a1, args.a6);
            TrustedOsReturn::Ok.into()
        }
        CLOSE_SESSION | REGISTER_RPC | CANCEL => {
            debug!("Unsupported call {function}");
            UNKNOWN_FUNCTION
        }
        _ => {
            debug!("Unknown call {function}");
            UNKNOWN_FUNCTION
        }
    };
    args.a0 = SMC_CALL_RETURN.0;
    args.a1 = result;
}
