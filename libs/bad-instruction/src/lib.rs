// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Turning illegal instruction traps into exceptions.
//!
//! Unconditional precondition failures are usually implemented as an illegal instruction (`ud2`
//! on x86_64, `udf` on aarch64). Executing one makes the kernel suspend the thread and deliver the
//! trap together with the thread's saved registers to whatever handles exceptions for it. This
//! crate is the piece that runs at that point: given the saved registers it produces new ones that
//! make the thread resume in [`trampoline`] *as if* the faulting instruction had been a call to it.
//! The trampoline then raises a [`BadInstructionException`] which unwinds like any other Rust
//! panic and can be caught with [`std::panic::catch_unwind`].
//!
//! ## Rewriting the thread state
//!
//! Three things change in the saved state, everything else is preserved:
//!
//! ```text
//!  before                          after
//! +----------------+              +----------------+
//! |      ...       |              |      ...       |
//! +----------------+ <- sp        +----------------+
//! |                |              | faulting pc    |
//! +----------------+              +----------------+ <- sp
//!
//!  pc = faulting instruction       pc = trampoline
//! ```
//!
//! [`rewrite::redirect`] computes the new state without touching memory, [`rewrite::Redirect::commit`]
//! performs the single stack write, and [`callback`] wraps both behind the kind of request an
//! exception transport delivers.
//!
//! ## Restrictions
//!
//! The callback runs while the faulting thread is suspended, on a context where allocating,
//! locking or faulting again would deadlock or recurse. Nothing reachable from [`callback`] does
//! any of these things, and nothing in there logs.

mod error;
mod exception;

pub mod callback;
pub mod rewrite;
pub mod trampoline;

pub use callback::{
    StateRequest, bad_instruction_state_callback, handle_flavored_request, handle_state_request,
};
pub use error::{RewriteError, Status};
pub use exception::BadInstructionException;
