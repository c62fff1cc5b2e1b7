// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Statically allocated stacks, each guarded by a canary word at either end.

use crate::platform::{Platform, PlatformImpl};
use core::{cell::UnsafeCell, fmt::Display};
use log::error;
use thiserror::Error;

/// Alignment of every stack and of every stack top.
pub const STACK_ALIGNMENT: usize = 8;

/// Per-CPU stack used while no thread is running.
///
/// Boot, fast calls and FIQs all run on it, including log formatting.
pub const STACK_TMP_SIZE: usize = 2048;
/// Per-CPU stack used while handling aborts.
pub const STACK_ABT_SIZE: usize = 1024;
/// Per-CPU stack used in monitor mode.
pub const STACK_MON_SIZE: usize = 24 * 4;
/// Per-thread stack.
pub const STACK_THREAD_SIZE: usize = 8 * 1024;

const START_CANARY: u32 = 0xdede_dede;
const END_CANARY: u32 = 0xabab_abab;
/// Bytes at the top of each stack reserved for the end canary, keeping the top aligned.
const END_CANARY_SPACE: usize = STACK_ALIGNMENT;

const _: () = assert!(STACK_TMP_SIZE % STACK_ALIGNMENT == 0);
const _: () = assert!(STACK_ABT_SIZE % STACK_ALIGNMENT == 0);
const _: () = assert!(STACK_MON_SIZE % STACK_ALIGNMENT == 0);
const _: () = assert!(STACK_THREAD_SIZE % STACK_ALIGNMENT == 0);

pub(crate) type TmpStack = Stack<{ STACK_TMP_SIZE / 4 }>;
type AbtStack = Stack<{ STACK_ABT_SIZE / 4 }>;
type MonStack = Stack<{ STACK_MON_SIZE / 4 }>;
type ThreadStack = Stack<{ STACK_THREAD_SIZE / 4 }>;

/// Also used by the reset code, before any Rust runs.
#[cfg_attr(not(test), unsafe(link_section = ".bss.prebss.stack"))]
pub(crate) static STACK_TMP: [TmpStack; PlatformImpl::CORE_COUNT] =
    [const { Stack::new() }; PlatformImpl::CORE_COUNT];
#[cfg_attr(not(test), unsafe(link_section = ".bss.prebss.stack"))]
static STACK_ABT: [AbtStack; PlatformImpl::CORE_COUNT] =
    [const { Stack::new() }; PlatformImpl::CORE_COUNT];
#[cfg_attr(not(test), unsafe(link_section = ".bss.prebss.stack"))]
static STACK_MON: [MonStack; PlatformImpl::CORE_COUNT] =
    [const { Stack::new() }; PlatformImpl::CORE_COUNT];
#[cfg_attr(not(test), unsafe(link_section = ".bss.prebss.stack"))]
static STACK_THREAD: [ThreadStack; PlatformImpl::THREAD_COUNT] =
    [const { Stack::new() }; PlatformImpl::THREAD_COUNT];

/// Which set of stacks a corrupted stack belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StackKind {
    Temporary,
    Abort,
    Monitor,
    Thread,
}

impl Display for StackKind {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let name = match self {
            Self::Temporary => "temporary",
            Self::Abort => "abort",
            Self::Monitor => "monitor",
            Self::Thread => "thread",
        };
        f.write_str(name)
    }
}

/// A stack canary was overwritten.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("{end} canary of {kind} stack {index} corrupted")]
pub struct StackCorruption {
    /// The set of stacks.
    pub kind: StackKind,
    /// The index of the stack within its set.
    pub index: usize,
    /// Which end of the stack: "start" (the lowest address) or "end".
    pub end: &'static str,
}

/// A stack of `WORDS` 32-bit words.
///
/// The memory is only ever accessed through raw pointers, by the CPU using it as a stack and by
/// the canary checks.
#[repr(C, align(8))]
pub struct Stack<const WORDS: usize> {
    words: UnsafeCell<[u32; WORDS]>,
}

// SAFETY: Only the canary words are accessed from Rust, with volatile accesses through raw
// pointers. The rest of the stack is used by whichever CPU or thread owns it.
unsafe impl<const WORDS: usize> Sync for Stack<WORDS> {}

impl<const WORDS: usize> Stack<WORDS> {
    /// Creates a new zeroed stack.
    pub const fn new() -> Self {
        Self {
            words: UnsafeCell::new([0; WORDS]),
        }
    }

    /// Returns the lowest address of the stack.
    pub fn bottom(&self) -> usize {
        self.words.get() as usize
    }

    /// Returns the initial stack pointer, below the end canary.
    pub fn top(&self) -> usize {
        self.bottom() + WORDS * 4 - END_CANARY_SPACE
    }

    fn init_canaries(&self) {
        let words = self.words.get() as *mut u32;
        // SAFETY: Both indices are within the array, and neither word is ever part of a stack
        // frame.
        unsafe {
            words.write_volatile(START_CANARY);
            words.add(WORDS - 1).write_volatile(END_CANARY);
        }
    }

    fn check_canaries(&self) -> Result<(), &'static str> {
        let words = self.words.get() as *const u32;
        // SAFETY: Both indices are within the array, and neither word is ever part of a stack
        // frame.
        let (start, end) = unsafe {
            (
                words.read_volatile(),
                words.add(WORDS - 1).read_volatile(),
            )
        };
        if start != START_CANARY {
            Err("start")
        } else if end != END_CANARY {
            Err("end")
        } else {
            Ok(())
        }
    }
}

impl<const WORDS: usize> Default for Stack<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

fn check_set<const WORDS: usize>(
    stacks: &[Stack<WORDS>],
    kind: StackKind,
) -> Result<(), StackCorruption> {
    for (index, stack) in stacks.iter().enumerate() {
        stack
            .check_canaries()
            .map_err(|end| StackCorruption { kind, index, end })?;
    }
    Ok(())
}

/// Writes the canaries of every stack.
///
/// This must be called once at boot, before any of the stacks are used.
pub fn init_canaries() {
    STACK_TMP.iter().for_each(Stack::init_canaries);
    STACK_ABT.iter().for_each(Stack::init_canaries);
    STACK_MON.iter().for_each(Stack::init_canaries);
    STACK_THREAD.iter().for_each(Stack::init_canaries);
}

/// Checks the canaries of every stack.
pub fn check_canaries() -> Result<(), StackCorruption> {
    check_set(&STACK_TMP, StackKind::Temporary)?;
    check_set(&STACK_ABT, StackKind::Abort)?;
    check_set(&STACK_MON, StackKind::Monitor)?;
    check_set(&STACK_THREAD, StackKind::Thread)
}

/// Checks the canaries of every stack, and panics if any has been overwritten.
pub fn assert_canaries() {
    if let Err(e) = check_canaries() {
        error!("{e}");
        panic!("Stack corruption: {e}");
    }
}

/// Returns the initial stack pointer of the temporary stack of the given CPU.
pub fn tmp_stack_top(core_index: usize) -> usize {
    STACK_TMP[core_index].top()
}

/// Returns the initial stack pointer of the abort stack of the given CPU.
pub fn abt_stack_top(core_index: usize) -> usize {
    STACK_ABT[core_index].top()
}

/// Returns the initial stack pointer of the monitor stack of the given CPU.
pub fn mon_stack_top(core_index: usize) -> usize {
    STACK_MON[core_index].top()
}

/// Returns the initial stack pointer of the stack for the given thread.
pub fn thread_stack_top(thread_index: usize) -> usize {
    STACK_THREAD[thread_index].top()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_is_aligned_below_end_canary() {
        let stack = Stack::<64>::new();
        assert_eq!(stack.bottom() % STACK_ALIGNMENT, 0);
        assert_eq!(stack.top() % STACK_ALIGNMENT, 0);
        assert_eq!(stack.top(), stack.bottom() + 256 - 8);
    }

    #[test]
    fn zeroed_stack_fails_check() {
        let stack = Stack::<8>::new();
        assert_eq!(stack.check_canaries(), Err("start"));
    }

    #[test]
    fn detects_overflow() {
        let stacks = [Stack::<8>::new(), Stack::<8>::new()];
        stacks.iter().for_each(Stack::init_canaries);
        assert_eq!(check_set(&stacks, StackKind::Thread), Ok(()));

        // SAFETY: The stack isn't in use, and the address is within it.
        unsafe {
            (stacks[1].bottom() as *mut u32).write_volatile(0x1234);
        }
        assert_eq!(
            check_set(&stacks, StackKind::Thread),
            Err(StackCorruption {
                kind: StackKind::Thread,
                index: 1,
                end: "start",
            })
        );
    }

    #[test]
    fn detects_underflow() {
        let stack = Stack::<8>::new();
        stack.init_canaries();
        // SAFETY: The stack isn't in use, and the address is within it.
        unsafe {
            ((stack.bottom() + 7 * 4) as *mut u32).write_volatile(0);
        }
        assert_eq!(stack.check_canaries(), Err("end"));
    }

    #[test]
    fn global_stacks() {
        init_canaries();
        assert_eq!(check_canaries(), Ok(()));
        assert!(tmp_stack_top(0) > STACK_TMP[0].bottom());
        assert_ne!(thread_stack_top(0), thread_stack_top(1));
        assert_eq!(
            StackCorruption {
                kind: StackKind::Abort,
                index: 2,
                end: "end"
            }
            .to_string(),
            "end canary of abort stack 2 corrupted"
        );
    }
}
