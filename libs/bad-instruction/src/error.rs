// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt::{Display, Formatter};

/// Status reported back to the exception transport, using the kernel's `kern_return_t` values.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// The new thread state has been written and the thread may resume.
    Success = 0,
    /// The request was well-formed but its state can't be rewritten.
    InvalidArgument = 4,
    /// The request itself was malformed.
    Failure = 5,
    /// The request is for a state flavor we don't handle.
    NotSupported = 46,
}

impl Status {
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Status::Success => write!(f, "success"),
            Status::InvalidArgument => write!(f, "invalid argument"),
            Status::Failure => write!(f, "failure"),
            Status::NotSupported => write!(f, "not supported"),
        }
    }
}

/// Why a thread state could not be rewritten.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RewriteError {
    /// The old state isn't exactly one record large.
    OldStateSize { expected: u32, found: usize },
    /// The output buffer can't hold a record.
    NewStateCapacity { expected: u32, found: usize },
    /// Reserving a slot would move the stack pointer below zero.
    StackUnderflow { sp: u64 },
    /// The slot below the stack pointer is not an address we can write through.
    InvalidStackSlot { addr: u64 },
}

impl From<RewriteError> for Status {
    fn from(_err: RewriteError) -> Self {
        Status::InvalidArgument
    }
}

impl Display for RewriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            RewriteError::OldStateSize { expected, found } => write!(
                f,
                "old thread state is {found} words, expected exactly {expected}"
            ),
            RewriteError::NewStateCapacity { expected, found } => write!(
                f,
                "new thread state buffer holds {found} words, need at least {expected}"
            ),
            RewriteError::StackUnderflow { sp } => {
                write!(f, "stack pointer {sp:#x} has no room for a return slot")
            }
            RewriteError::InvalidStackSlot { addr } => {
                write!(f, "stack slot {addr:#x} is null or misaligned")
            }
        }
    }
}

impl core::error::Error for RewriteError {}
