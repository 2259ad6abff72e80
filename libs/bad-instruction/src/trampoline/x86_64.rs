// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! ## Stack layout
//!
//! On x86_64 the pushed slot is exactly what a `call` at the faulting instruction would have left
//! behind, so on entry the stack looks like this:
//!
//! ```text
//! |              |
//! ~ Faulting fn  ~
//! |              |
//! +--------------+  <- Faulting RSP
//! | Faulting RIP |
//! +--------------+  <- RSP on entry
//! ```
//!
//! The trampoline then pushes RBP and realigns RSP before calling into Rust, because the faulting
//! RSP may be at any offset relative to the 16-byte boundary the ABI demands at a call:
//!
//! ```text
//! +--------------+  <- Faulting RSP
//! | Faulting RIP |
//! +--------------+
//! | Saved RBP    |
//! +--------------+  <- RBP
//! | Padding      |
//! +--------------+  <- RSP, 16-byte aligned
//! ```

use core::arch::naked_asm;

#[unsafe(naked)]
pub unsafe extern "C" fn bad_instruction_trampoline() {
    naked_asm! {
        ".cfi_startproc",
        ".cfi_signal_frame",
        // At this point our register state contains the following:
        // - RSP points to the faulting RIP, the CFA is RSP + 8 as for any call.
        // - All other registers hold their value from the faulting context.
        "push rbp",
        ".cfi_adjust_cfa_offset 8",
        ".cfi_rel_offset rbp, 0",
        "mov rbp, rsp",
        ".cfi_def_cfa_register rbp",

        // Realign the stack for the call.
        "and rsp, -16",

        "call {raise}",

        // The raise never returns, but if it does we must not fall through into whatever follows.
        "call {unreachable}",
        "int3",
        ".cfi_endproc",

        raise = sym super::raise_bad_instruction,
        unreachable = sym super::trampoline_unreachable,
    }
}
