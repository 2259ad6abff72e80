// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Computing the redirected thread state.
//!
//! The redirect is split in two: [`redirect`] is a pure function from the old register state to the
//! new one plus a description of the stack slot that has to be filled in, and
//! [`Redirect::commit`] is the one place that writes to the suspended thread's memory.

use crate::error::RewriteError;
use core::ptr;
use thread_state::ThreadState;

/// A pointer-sized write into the suspended thread's stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StackSlot {
    /// Address of the slot, this is the stack pointer the thread will resume with.
    pub addr: u64,
    /// Value to store, this is the program counter the thread trapped at.
    pub value: u64,
}

/// A rewritten thread state whose stack slot has not been written yet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[must_use = "the redirect does nothing until it is committed"]
pub struct Redirect<S> {
    state: S,
    slot: StackSlot,
}

/// Computes the state that makes a thread suspended at `old` resume in `target` as if it had been
/// called from the faulting instruction.
///
/// The stack pointer moves down by one pointer-sized slot that will hold the faulting program
/// counter, the program counter becomes `target`, every other register is carried over unchanged.
///
/// # Errors
///
/// Returns [`RewriteError::StackUnderflow`] if the stack pointer is too close to zero to reserve a
/// slot below it.
pub fn redirect<S: ThreadState>(old: &S, target: u64) -> Result<Redirect<S>, RewriteError> {
    let sp = old
        .sp()
        .checked_sub(S::POINTER_WIDTH)
        .ok_or(RewriteError::StackUnderflow { sp: old.sp() })?;

    let mut state = *old;
    state.set_sp(sp);
    state.set_pc(target);

    Ok(Redirect {
        state,
        slot: StackSlot {
            addr: sp,
            value: old.pc(),
        },
    })
}

impl<S: ThreadState> Redirect<S> {
    /// The state the thread will resume with.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// The stack write [`Self::commit`] will perform.
    pub fn slot(&self) -> StackSlot {
        self.slot
    }

    /// Stores the faulting program counter into the reserved stack slot and returns the new state.
    ///
    /// # Errors
    ///
    /// Returns [`RewriteError::InvalidStackSlot`] without writing anything if the slot address is
    /// null or not aligned to a pointer.
    ///
    /// # Safety
    ///
    /// The slot must lie in writable memory that nothing else is using, in practice the stack of
    /// the suspended thread just below its stack pointer. The caller must guarantee the thread stays
    /// suspended until the state returned here has been handed back to the kernel.
    ///
    /// Only null and misaligned slots are detected. A slot in unmapped memory is not reported as an
    /// error, the write faults while the thread is still suspended.
    pub unsafe fn commit(self) -> Result<S, RewriteError> {
        let StackSlot { addr, value } = self.slot;

        let slot = usize::try_from(addr)
            .ok()
            .filter(|addr| *addr != 0 && addr % align_of::<u64>() == 0)
            .map(ptr::with_exposed_provenance_mut::<u64>)
            .ok_or(RewriteError::InvalidStackSlot { addr })?;

        // Safety: non-null and aligned, the caller guarantees it is writable
        unsafe {
            slot.write(value);
        }

        Ok(self.state)
    }
}
