// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The `SIGILL` handler.
//!
//! The kernel suspends the faulting thread on its own stack and hands the handler the thread's
//! register state in a `ucontext_t`. Whatever state the `ucontext_t` holds when the handler returns
//! is what the thread resumes with, which makes the handler an exception transport for
//! [`bad_instruction::handle_state_request`].
//!
//! The handler is installed while at least one thread is armed and the previous disposition is put
//! back when the last thread disarms. The handler itself never locks, allocates or logs.

use crate::config::{HANDLER_FLAGS, TRAP_SIGNAL};
use crate::error::Error;
use crate::frame;
use bad_instruction::{StateRequest, handle_state_request, trampoline};
use core::cell::{Cell, UnsafeCell};
use core::ffi::{c_int, c_void};
use core::mem::{self, MaybeUninit};
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};
use std::io;
use std::sync::{Mutex, PoisonError};
use thread_state::{NativeThreadState, ThreadState, natural_t};

thread_local! {
    /// Number of live arm guards on this thread.
    static ARM_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Number of threads currently armed. The handler is installed while this is non-zero.
static ARMED_THREADS: Mutex<usize> = Mutex::new(0);

/// The disposition that was in place before the handler was installed.
static PREVIOUS: PreviousAction = PreviousAction {
    action: UnsafeCell::new(MaybeUninit::uninit()),
    valid: AtomicBool::new(false),
};

struct PreviousAction {
    action: UnsafeCell<MaybeUninit<libc::sigaction>>,
    valid: AtomicBool,
}

// Safety: `action` is only written while `ARMED_THREADS` is locked and the handler is not
// installed, and only read after `valid` has been observed set.
unsafe impl Sync for PreviousAction {}

impl PreviousAction {
    /// Copies the saved disposition out, so a later `install` can't change it under the reader.
    fn get(&self) -> Option<libc::sigaction> {
        if self.valid.load(Ordering::Acquire) {
            // Safety: `valid` is only set after `action` was initialized
            Some(unsafe { (*self.action.get()).assume_init() })
        } else {
            None
        }
    }
}

pub fn is_armed() -> bool {
    ARM_DEPTH.try_with(Cell::get).unwrap_or(0) > 0
}

pub fn acquire() -> Result<(), Error> {
    let depth = ARM_DEPTH.get();

    if depth == 0 {
        let mut armed_threads = ARMED_THREADS.lock().unwrap_or_else(PoisonError::into_inner);
        if *armed_threads == 0 {
            // Safety: the lock is held and the handler is not installed
            unsafe { install()? };
            tracing::trace!(signal = TRAP_SIGNAL, "installed trap handler");
        }
        *armed_threads += 1;
    }

    ARM_DEPTH.set(depth + 1);
    tracing::trace!(depth = depth + 1, "armed");

    Ok(())
}

pub fn release() {
    let depth = ARM_DEPTH.get();
    debug_assert!(depth > 0, "released more arm guards than were acquired");
    let depth = depth.saturating_sub(1);
    ARM_DEPTH.set(depth);
    tracing::trace!(depth, "disarmed");

    if depth == 0 {
        let mut armed_threads = ARMED_THREADS.lock().unwrap_or_else(PoisonError::into_inner);
        *armed_threads = armed_threads.saturating_sub(1);
        if *armed_threads == 0 {
            // Safety: the lock is held and no thread is armed anymore
            match unsafe { restore() } {
                Ok(()) => tracing::trace!(signal = TRAP_SIGNAL, "restored previous trap handler"),
                Err(err) => tracing::warn!("{err}"),
            }
        }
    }
}

/// # Safety
///
/// Must be called with `ARMED_THREADS` locked and the handler not installed.
unsafe fn install() -> Result<(), Error> {
    // Safety: both structs are valid for the duration of the calls
    unsafe {
        let mut previous = MaybeUninit::<libc::sigaction>::zeroed();
        if libc::sigaction(TRAP_SIGNAL, ptr::null(), previous.as_mut_ptr()) != 0 {
            return Err(Error::Install(io::Error::last_os_error()));
        }
        (*PREVIOUS.action.get()).write(previous.assume_init());
        PREVIOUS.valid.store(true, Ordering::Release);

        let mut handler: libc::sigaction = mem::zeroed();
        handler.sa_sigaction = trap_handler as usize;
        handler.sa_flags = HANDLER_FLAGS;
        libc::sigemptyset(&mut handler.sa_mask);

        if libc::sigaction(TRAP_SIGNAL, &handler, ptr::null_mut()) != 0 {
            PREVIOUS.valid.store(false, Ordering::Release);
            return Err(Error::Install(io::Error::last_os_error()));
        }
    }

    Ok(())
}

/// # Safety
///
/// Must be called with `ARMED_THREADS` locked and the handler installed.
unsafe fn restore() -> Result<(), Error> {
    let Some(previous) = PREVIOUS.get() else {
        return Ok(());
    };

    // Safety: `previous` is a disposition the kernel handed us
    if unsafe { libc::sigaction(TRAP_SIGNAL, &previous, ptr::null_mut()) } != 0 {
        return Err(Error::Restore(io::Error::last_os_error()));
    }
    PREVIOUS.valid.store(false, Ordering::Release);

    Ok(())
}

unsafe extern "C" fn trap_handler(signum: c_int, info: *mut libc::siginfo_t, context: *mut c_void) {
    // Safety: the kernel passes a valid `siginfo_t` for `SA_SIGINFO` handlers
    let fault = unsafe { is_fault(info) };

    // Safety: the kernel passes a valid `ucontext_t` of the interrupted thread
    if fault && is_armed() && unsafe { redirect(context) } {
        return;
    }

    // Safety: arguments are passed through as we received them
    unsafe { forward(signum, info, context, fault) }
}

/// Whether the signal was generated by the kernel for a faulting instruction.
///
/// Signals sent with `kill`, `raise`, `pthread_kill` or `sigqueue` carry an `si_code` of zero or
/// below, the `ILL_*` codes of a real trap are positive.
unsafe fn is_fault(info: *const libc::siginfo_t) -> bool {
    // Safety: ensured by caller
    !info.is_null() && unsafe { (*info).si_code } > 0
}

/// Rewrites the interrupted thread's state so it resumes in the trampoline.
///
/// Returns `false` if the state was refused, in which case `context` is unchanged.
unsafe fn redirect(context: *mut c_void) -> bool {
    // Safety: ensured by caller
    let old = unsafe { frame::capture(context) };

    let mut new = [0 as natural_t; NativeThreadState::COUNT as usize];
    let mut new_count = NativeThreadState::COUNT;
    let request = StateRequest {
        old_state: old.as_words(),
        new_state: &mut new,
        new_state_count: &mut new_count,
    };

    // Safety: the thread is suspended in this handler until we return, its stack pointer points
    // just above its own stack
    let status =
        unsafe { handle_state_request::<NativeThreadState>(request, trampoline::address()) };
    if !status.is_success() {
        return false;
    }

    let Some(new) = NativeThreadState::from_words(&new[..new_count as usize]) else {
        return false;
    };

    // Safety: ensured by caller
    unsafe { frame::restore(context, &new) };

    true
}

/// Hands the signal to whatever handled it before us.
///
/// A fault re-executes the faulting instruction once the handler returns, so reinstating the
/// default disposition is enough to crash. A sent signal doesn't come back and is raised again.
unsafe fn forward(
    signum: c_int,
    info: *mut libc::siginfo_t,
    context: *mut c_void,
    fault: bool,
) {
    let Some(previous) = PREVIOUS.get() else {
        // Nothing to forward to, fall back to the default disposition.
        // Safety: resetting a disposition to the default is always sound
        unsafe {
            libc::signal(signum, libc::SIG_DFL);
            if !fault {
                libc::raise(signum);
            }
        }
        return;
    };

    // Safety: we call the previous handler the way it asked to be called
    unsafe {
        if previous.sa_flags & libc::SA_SIGINFO != 0 {
            let handler: extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void) =
                mem::transmute(previous.sa_sigaction);
            handler(signum, info, context);
        } else if previous.sa_sigaction == libc::SIG_DFL || previous.sa_sigaction == libc::SIG_IGN {
            // Reinstate the previous disposition and let the signal arrive again under it. The
            // signal is blocked while we run, a raised one stays pending until we return.
            libc::sigaction(signum, &previous, ptr::null_mut());
            if !fault && previous.sa_sigaction == libc::SIG_DFL {
                libc::raise(signum);
            }
        } else {
            let handler: extern "C" fn(c_int) = mem::transmute(previous.sa_sigaction);
            handler(signum);
        }
    }
}
