// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::any::Any;
use std::fmt::{Display, Formatter};

/// The exception raised by a thread that was redirected away from an illegal instruction.
///
/// It carries nothing but its identity: a panic payload of this type means "an illegal
/// instruction trap was intercepted", as opposed to any other panic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BadInstructionException {
    _priv: (),
}

impl BadInstructionException {
    /// The fixed identifier of this exception.
    pub const NAME: &'static str = "com.cocoawithlove.BadInstruction";

    pub(crate) const fn new() -> Self {
        Self { _priv: () }
    }

    pub const fn name(self) -> &'static str {
        Self::NAME
    }

    /// Extracts the exception from a panic payload, as returned by [`std::panic::catch_unwind`].
    ///
    /// # Errors
    ///
    /// Returns the payload unchanged if it isn't a `BadInstructionException`, so it can be
    /// resumed with [`std::panic::resume_unwind`].
    pub fn downcast(payload: Box<dyn Any + Send>) -> Result<Self, Box<dyn Any + Send>> {
        payload.downcast::<Self>().map(|exception| *exception)
    }
}

impl Display for BadInstructionException {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: illegal instruction trap intercepted", Self::NAME)
    }
}

impl core::error::Error for BadInstructionException {}
