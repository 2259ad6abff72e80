// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::arch::asm;

/// Executes an illegal instruction.
///
/// Unless the current thread is armed this terminates the process with `SIGILL`, like a failed
/// precondition would. On an armed thread a [`BadInstructionException`][1] is raised from here.
///
/// The function owns no values and is never inlined so its frame can be unwound from the trapping
/// instruction.
///
/// [1]: crate::BadInstructionException
#[inline(never)]
pub fn execute_bad_instruction() -> ! {
    // The leading `nop` keeps the trapping instruction off the function's first byte, unwinders
    // look up the frame at the exact faulting address.
    // Safety: the instruction traps, nothing after it is reached
    unsafe {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "x86_64")] {
                asm!("nop", "ud2", options(noreturn, nomem, nostack));
            } else if #[cfg(target_arch = "aarch64")] {
                asm!("nop", "udf #0", options(noreturn, nomem, nostack));
            } else {
                compile_error!("Unsupported target architecture");
            }
        }
    }
}
