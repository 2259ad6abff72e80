// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ffi::c_int;

/// The signal the kernel delivers for an illegal instruction
pub const TRAP_SIGNAL: c_int = libc::SIGILL;
/// Flags of the installed handler. `SA_SIGINFO` is required to receive the `ucontext_t` we rewrite.
/// The handler must run on the faulting thread's own stack, so no `SA_ONSTACK`.
pub const HANDLER_FLAGS: c_int = libc::SA_SIGINFO;
