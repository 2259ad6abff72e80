// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! ## Stack layout
//!
//! On aarch64 calls pass the return address in LR, not on the stack, so the pushed slot is not
//! something the unwinder would find on its own. On entry the stack looks like this:
//!
//! ```text
//! |              |
//! ~ Faulting fn  ~
//! |              |
//! +--------------+  <- Faulting SP (CFA)
//! | Faulting PC  |
//! +--------------+  <- SP on entry
//! ```
//!
//! SP is only 8-byte aligned here and faults if used as a base register, so the trampoline reaches
//! the slot through X16. It then moves SP down to the next 16-byte boundary and saves LR, which
//! still holds the faulting function's value:
//!
//! ```text
//! +--------------+  <- Faulting SP (CFA)
//! | Faulting PC  |
//! +--------------+
//! | Faulting LR  |
//! +--------------+  <- SP
//! ```
//!
//! The CFI uses X16 as the return address column so the unwinder can restore the faulting PC as the
//! return address and the faulting LR as the caller's LR independently.

use core::arch::naked_asm;

#[unsafe(naked)]
pub unsafe extern "C" fn bad_instruction_trampoline() {
    naked_asm! {
        ".balign 4",
        ".cfi_startproc",
        ".cfi_signal_frame",
        ".cfi_return_column x16",
        // At this point our register state contains the following:
        // - SP points to the faulting PC, 8 bytes below the faulting SP.
        // - All other registers hold their value from the faulting context.
        ".cfi_def_cfa sp, 8",
        ".cfi_offset x16, -8",
        ".cfi_same_value x30",
        ".cfi_same_value x29",

        "mov x16, sp",
        "sub sp, x16, #8",
        ".cfi_def_cfa_offset 16",
        "str x30, [sp]",
        ".cfi_offset x30, -16",

        "bl {raise}",

        // The raise never returns, but if it does we must not fall through into whatever follows.
        "bl {unreachable}",
        "brk #0x1",
        ".cfi_endproc",

        raise = sym super::raise_bad_instruction,
        unreachable = sym super::trampoline_unreachable,
    }
}
