// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The function a redirected thread resumes in.
//!
//! Nothing calls [`bad_instruction_trampoline`]. A thread arrives there because its program counter
//! was overwritten while it was suspended, with the faulting program counter stored in the word its
//! stack pointer points to (see [`crate::rewrite`]). That is the only thing the trampoline relies on.
//! It builds a frame that tells the unwinder the faulting function is its caller, then calls
//! [`raise_bad_instruction`] which throws the [`BadInstructionException`] from there.
//!
//! The frame is marked as a signal frame so the unwinder looks up the faulting function at the
//! faulting instruction itself rather than at the instruction before it, which is what it does for
//! ordinary return addresses.

use crate::BadInstructionException;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use x86_64::bad_instruction_trampoline;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use aarch64::bad_instruction_trampoline;
    } else {
        compile_error!("Unsupported target architecture");
    }
}

/// Address of [`bad_instruction_trampoline`], the program counter redirected threads resume at.
#[inline]
pub fn address() -> u64 {
    bad_instruction_trampoline as usize as u64
}

/// Raises the [`BadInstructionException`] on behalf of the trampoline.
///
/// By the time this runs the thread is executing normally again, so unlike the callback this may
/// allocate and log.
#[inline(never)]
extern "C-unwind" fn raise_bad_instruction() -> ! {
    tracing::debug!(
        exception = BadInstructionException::NAME,
        "raising exception from redirected thread"
    );

    std::panic::resume_unwind(Box::new(BadInstructionException::new()))
}

/// Called if [`raise_bad_instruction`] ever returns into the trampoline.
///
/// The thread's original context is gone at that point, there is nothing left to return to.
#[cold]
extern "C" fn trampoline_unreachable() -> ! {
    tracing::error!("bad instruction trampoline returned");
    std::process::abort()
}
