// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt::{Display, Formatter};
use std::io;

#[derive(Debug)]
pub enum Error {
    /// Installing the trap handler failed.
    Install(io::Error),
    /// Restoring the handler that was installed before us failed.
    Restore(io::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Install(err) => write!(f, "failed to install the trap handler: {err}"),
            Error::Restore(err) => write!(f, "failed to restore the previous trap handler: {err}"),
        }
    }
}

impl core::error::Error for Error {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Error::Install(err) | Error::Restore(err) => Some(err),
        }
    }
}
