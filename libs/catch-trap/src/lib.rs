// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Catching illegal instruction traps.
//!
//! Code that enforces its preconditions by executing an illegal instruction can't be tested with
//! `#[should_panic]`: the trap kills the whole test process. [`catch_bad_instruction`] runs a
//! closure with the trap intercepted, the thread that trapped is redirected into raising a
//! [`BadInstructionException`] and the closure returns `Err` instead.
//!
//! ```no_run
//! use catch_trap::{catch_bad_instruction, execute_bad_instruction};
//!
//! fn checked_div(a: u32, b: u32) -> u32 {
//!     if b == 0 {
//!         execute_bad_instruction();
//!     }
//!     a / b
//! }
//!
//! assert!(catch_bad_instruction(|| checked_div(1, 0)).is_err());
//! assert_eq!(catch_bad_instruction(|| checked_div(6, 3)), Ok(2));
//! ```
//!
//! ## Scope
//!
//! Interception is per thread. A trap on a thread that hasn't armed interception is forwarded to
//! whatever handled `SIGILL` before, and if that was the default disposition the process crashes
//! exactly as it would have without this crate.
//!
//! The exception unwinds from the faulting instruction, so every frame between the trap and the
//! catch is unwound normally and runs its destructors. The faulting function itself is left behind
//! mid-instruction, it should not own values whose destructors matter.

mod config;
mod error;
mod frame;
mod signal;
mod trap;

pub use bad_instruction::BadInstructionException;
pub use error::Error;
pub use trap::execute_bad_instruction;

use core::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

/// Keeps illegal instruction traps on the current thread intercepted while alive.
///
/// Created by [`arm`]. Guards nest, interception ends when the last guard of a thread is dropped.
#[must_use = "interception ends when the guard is dropped"]
#[derive(Debug)]
pub struct ArmGuard {
    /// The guard must be dropped on the thread it armed.
    /// ```compile_fail
    /// fn send<T: Send>() {}
    /// send::<catch_trap::ArmGuard>();
    /// ```
    _m: PhantomData<*mut ()>,
}

/// Arms interception of illegal instruction traps on the current thread.
///
/// A trap while armed raises a [`BadInstructionException`] from the faulting instruction. Unless
/// something catches it, the exception unwinds the thread like any other panic payload would.
///
/// # Errors
///
/// Returns an error if the trap handler could not be installed.
pub fn arm() -> Result<ArmGuard, Error> {
    signal::acquire()?;

    Ok(ArmGuard { _m: PhantomData })
}

impl Drop for ArmGuard {
    fn drop(&mut self) {
        signal::release();
    }
}

/// Returns whether illegal instruction traps on the current thread are intercepted.
pub fn is_armed() -> bool {
    signal::is_armed()
}

/// Invokes a closure, catching an illegal instruction trap if one occurs.
///
/// Analogous to [`catch_unwind`][1] this returns `Ok` with the closure's result if the closure
/// didn't trap, and `Err` if it did. Panics other than the [`BadInstructionException`] are not
/// caught, they continue unwinding out of this function.
///
/// The closure is treated as unwind safe. Like with any panic, state the closure was mutating when
/// it trapped may be left inconsistent.
///
/// # Panics
///
/// Panics if the trap handler can't be installed, see [`arm`].
///
/// [1]: std::panic::catch_unwind
pub fn catch_bad_instruction<F, R>(f: F) -> Result<R, BadInstructionException>
where
    F: FnOnce() -> R,
{
    let guard = match arm() {
        Ok(guard) => guard,
        Err(err) => panic!("failed to arm bad instruction interception: {err}"),
    };

    let result = panic::catch_unwind(AssertUnwindSafe(f));
    drop(guard);

    match result {
        Ok(value) => Ok(value),
        Err(payload) => match BadInstructionException::downcast(payload) {
            Ok(exception) => {
                tracing::debug!(exception = exception.name(), "caught bad instruction");
                Err(exception)
            }
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}
