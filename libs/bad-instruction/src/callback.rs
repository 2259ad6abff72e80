// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The exception callback.
//!
//! The exception transport suspends the faulting thread, hands us its register state as raw words
//! and expects a replacement state back in a buffer it owns. [`handle_state_request`] is the safe
//! entry point for a layout known at compile time, [`handle_flavored_request`] dispatches on the
//! flavor the transport reports, and [`bad_instruction_state_callback`] is the same thing over raw
//! pointers for transports that talk C.

use crate::error::{RewriteError, Status};
use crate::{rewrite, trampoline};
use core::slice;
use thread_state::{AnyThreadState, Flavor, ThreadState, natural_t};

/// A request to rewrite the state of a suspended thread.
#[derive(Debug)]
pub struct StateRequest<'a> {
    /// The state the thread trapped with. Its length is the declared size of the state.
    pub old_state: &'a [natural_t],
    /// Buffer for the state the thread will resume with.
    pub new_state: &'a mut [natural_t],
    /// On entry the declared capacity of `new_state`, on success the number of words written.
    pub new_state_count: &'a mut u32,
}

/// Rewrites the state in `request` so the thread resumes in `trampoline`.
///
/// The sizes declared in the request are checked against `S` before any field is read. If they
/// don't match, or the state can't be redirected, nothing is written to `new_state` or
/// `new_state_count` and [`Status::InvalidArgument`] is returned. On [`Status::Success`] the first
/// `S::COUNT` words of `new_state` hold the new state and `new_state_count` is `S::COUNT`.
///
/// # Safety
///
/// The stack pointer in `old_state` must point just above writable memory of a thread that stays
/// suspended until the new state has been handed back, see [`rewrite::Redirect::commit`].
pub unsafe fn handle_state_request<S: ThreadState>(
    request: StateRequest<'_>,
    trampoline: u64,
) -> Status {
    // Safety: ensured by caller
    match unsafe { rewrite_state::<S>(request, trampoline) } {
        Ok(()) => Status::Success,
        Err(err) => err.into(),
    }
}

unsafe fn rewrite_state<S: ThreadState>(
    request: StateRequest<'_>,
    trampoline: u64,
) -> Result<(), RewriteError> {
    let StateRequest {
        old_state,
        new_state,
        new_state_count,
    } = request;

    let old = S::from_words(old_state).ok_or(RewriteError::OldStateSize {
        expected: S::COUNT,
        found: old_state.len(),
    })?;
    check_capacity(S::COUNT, new_state, new_state_count)?;

    // Safety: ensured by caller
    let new = unsafe { rewrite::redirect(&old, trampoline)?.commit()? };

    store(new.as_words(), new_state, new_state_count);
    Ok(())
}

/// Like [`handle_state_request`], for a record whose layout is only known from its raw flavor.
///
/// Unknown flavors are answered with [`Status::NotSupported`] before anything else is looked at.
///
/// # Safety
///
/// The requirements of [`handle_state_request`] apply.
pub unsafe fn handle_flavored_request(
    flavor: i32,
    request: StateRequest<'_>,
    trampoline: u64,
) -> Status {
    let Some(flavor) = Flavor::from_raw(flavor) else {
        return Status::NotSupported;
    };

    // Safety: ensured by caller
    match unsafe { rewrite_any(flavor, request, trampoline) } {
        Ok(()) => Status::Success,
        Err(err) => err.into(),
    }
}

unsafe fn rewrite_any(
    flavor: Flavor,
    request: StateRequest<'_>,
    trampoline: u64,
) -> Result<(), RewriteError> {
    let StateRequest {
        old_state,
        new_state,
        new_state_count,
    } = request;

    let old =
        AnyThreadState::decode(flavor.as_raw(), old_state).ok_or(RewriteError::OldStateSize {
            expected: flavor.count(),
            found: old_state.len(),
        })?;
    check_capacity(flavor.count(), new_state, new_state_count)?;

    // Safety: ensured by caller
    let new: AnyThreadState = unsafe {
        match old {
            AnyThreadState::X86_64(state) => rewrite::redirect(&state, trampoline)?.commit()?.into(),
            AnyThreadState::Aarch64(state) => {
                rewrite::redirect(&state, trampoline)?.commit()?.into()
            }
        }
    };

    store(new.as_words(), new_state, new_state_count);
    Ok(())
}

fn check_capacity(
    count: u32,
    new_state: &[natural_t],
    new_state_count: &u32,
) -> Result<(), RewriteError> {
    let capacity = new_state.len().min(*new_state_count as usize);
    if capacity < count as usize {
        return Err(RewriteError::NewStateCapacity {
            expected: count,
            found: capacity,
        });
    }

    Ok(())
}

fn store(words: &[natural_t], new_state: &mut [natural_t], new_state_count: &mut u32) {
    new_state[..words.len()].copy_from_slice(words);
    *new_state_count = u32::try_from(words.len()).unwrap_or(u32::MAX);
}

/// Redirects the calling architecture's thread state into the [`trampoline`].
///
/// This has the shape of the state arguments of the Mach `catch_mach_exception_raise_state`
/// callback: `flavor` is the layout of both states, `old_state_cnt` is the size of `old_state`,
/// `*new_state_cnt` is the capacity of `new_state` on entry and the written size on return. A null
/// pointer is reported as [`Status::Failure`]. The trampoline only exists for the architecture we
/// run on, any other flavor is answered with [`Status::NotSupported`].
///
/// # Safety
///
/// `old_state` must be valid for reading `old_state_cnt` words, `new_state` must be valid for
/// writing `*new_state_cnt` words and must not overlap `old_state`. The requirements of
/// [`handle_state_request`] apply to the state itself.
pub unsafe extern "C" fn bad_instruction_state_callback(
    flavor: i32,
    old_state: *const natural_t,
    old_state_cnt: u32,
    new_state: *mut natural_t,
    new_state_cnt: *mut u32,
) -> i32 {
    if old_state.is_null() || new_state.is_null() || new_state_cnt.is_null() {
        return Status::Failure.as_raw();
    }
    if flavor != Flavor::NATIVE.as_raw() {
        return Status::NotSupported.as_raw();
    }

    // Safety: ensured by caller
    let status = unsafe {
        let new_state_count = &mut *new_state_cnt;
        let request = StateRequest {
            old_state: slice::from_raw_parts(old_state, old_state_cnt as usize),
            new_state: slice::from_raw_parts_mut(new_state, *new_state_count as usize),
            new_state_count,
        };

        handle_flavored_request(flavor, request, trampoline::address())
    };

    status.as_raw()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr;
    use thread_state::{ArmThreadState64, NativeThreadState, X86ThreadState64};

    const SENTINEL: natural_t = 0xdead_beef;
    const TARGET: u64 = 0x0000_5555_0000_1000;

    /// A fake suspended thread: a register state whose stack pointer points into `stack`.
    struct Suspended<S> {
        stack: Box<[u64; 8]>,
        state: S,
    }

    impl<S: ThreadState> Suspended<S> {
        fn new(pc: u64) -> Self {
            let mut stack = Box::new([0; 8]);
            let mut state = S::default();
            state.set_pc(pc);
            state.set_sp(stack.as_mut_ptr().wrapping_add(4) as u64);
            Self { stack, state }
        }
    }

    fn request<S: ThreadState>(
        old: &[natural_t],
        new: &mut [natural_t],
        count: &mut u32,
    ) -> Status {
        let request = StateRequest {
            old_state: old,
            new_state: new,
            new_state_count: count,
        };
        // Safety: every caller points the stack pointer into a live `Suspended::stack`
        unsafe { handle_state_request::<S>(request, TARGET) }
    }

    fn rewrites<S: ThreadState>() {
        let mut thread = Suspended::<S>::new(0x4242_0000);
        let count = S::COUNT as usize;

        // one word of headroom that must stay untouched
        let mut new = vec![SENTINEL; count + 1];
        let mut new_count = u32::try_from(new.len()).unwrap();

        let status = request::<S>(thread.state.as_words(), &mut new, &mut new_count);
        assert_eq!(status, Status::Success);
        assert_eq!(new_count, S::COUNT);
        assert_eq!(new[count], SENTINEL);

        let new = S::from_words(&new[..count]).unwrap();
        assert_eq!(new.pc(), TARGET);
        assert_eq!(new.sp(), thread.state.sp() - 8);
        assert_eq!(thread.stack[3], 0x4242_0000);

        // nothing but pc and sp changed
        let mut expected = thread.state;
        expected.set_pc(TARGET);
        expected.set_sp(thread.state.sp() - 8);
        assert_eq!(new, expected);
    }

    fn refuses<S: ThreadState>(old_len: usize, new_len: usize, declared: u32) {
        let thread = Suspended::<S>::new(0x4242_0000);

        let mut old = thread.state.as_words().to_vec();
        old.resize(old_len, 0);
        let mut new = vec![SENTINEL; new_len];
        let mut new_count = declared;

        let status = request::<S>(&old, &mut new, &mut new_count);
        assert_eq!(status, Status::InvalidArgument);
        assert!(new.iter().all(|word| *word == SENTINEL));
        assert_eq!(new_count, declared);
        assert!(thread.stack.iter().all(|slot| *slot == 0));
    }

    #[test]
    fn rewrites_x86_64_state() {
        rewrites::<X86ThreadState64>();
    }

    #[test]
    fn rewrites_aarch64_state() {
        rewrites::<ArmThreadState64>();
    }

    #[test]
    fn refuses_short_old_state() {
        refuses::<X86ThreadState64>(41, 42, 42);
        refuses::<ArmThreadState64>(67, 68, 68);
    }

    #[test]
    fn refuses_long_old_state() {
        refuses::<X86ThreadState64>(43, 42, 42);
        refuses::<ArmThreadState64>(69, 68, 68);
    }

    #[test]
    fn refuses_small_new_buffer() {
        refuses::<X86ThreadState64>(42, 41, 42);
        refuses::<ArmThreadState64>(68, 67, 68);
    }

    #[test]
    fn refuses_small_declared_capacity() {
        refuses::<X86ThreadState64>(42, 42, 41);
        refuses::<ArmThreadState64>(68, 68, 0);
    }

    #[test]
    fn refuses_unwritable_slot() {
        let mut old = X86ThreadState64::default();
        old.rsp = 8;
        let mut new = [SENTINEL; 42];
        let mut new_count = 42;

        let status = request::<X86ThreadState64>(old.as_words(), &mut new, &mut new_count);
        assert_eq!(status, Status::InvalidArgument);
        assert!(new.iter().all(|word| *word == SENTINEL));
        assert_eq!(new_count, 42);
    }

    #[test]
    fn c_callback_targets_trampoline() {
        let mut thread = Suspended::<NativeThreadState>::new(0x4242_0000);
        let mut new = NativeThreadState::default();
        let mut new_count = NativeThreadState::COUNT;

        // Safety: the stack pointer points into `thread.stack`, buffers are distinct
        let status = unsafe {
            bad_instruction_state_callback(
                Flavor::NATIVE.as_raw(),
                thread.state.as_words().as_ptr(),
                NativeThreadState::COUNT,
                new.as_words_mut().as_mut_ptr(),
                &mut new_count,
            )
        };

        assert_eq!(status, Status::Success.as_raw());
        assert_eq!(new_count, NativeThreadState::COUNT);
        assert_eq!(new.pc(), trampoline::address());
        assert_eq!(thread.stack[3], 0x4242_0000);

        thread.state.set_sp(thread.state.sp() - 8);
        thread.state.set_pc(trampoline::address());
        assert_eq!(new, thread.state);
    }

    #[test]
    fn c_callback_rejects_null() {
        let state = NativeThreadState::default();
        let mut new_count = NativeThreadState::COUNT;

        // Safety: null pointers are rejected before use
        let status = unsafe {
            bad_instruction_state_callback(
                Flavor::NATIVE.as_raw(),
                state.as_words().as_ptr(),
                NativeThreadState::COUNT,
                ptr::null_mut(),
                &mut new_count,
            )
        };

        assert_eq!(status, Status::Failure.as_raw());
        assert_eq!(new_count, NativeThreadState::COUNT);
    }

    fn flavored<S: ThreadState>() {
        let mut thread = Suspended::<S>::new(0x4242_0000);
        let mut new = vec![SENTINEL; S::COUNT as usize];
        let mut new_count = S::COUNT;

        let request = StateRequest {
            old_state: thread.state.as_words(),
            new_state: &mut new,
            new_state_count: &mut new_count,
        };
        // Safety: the stack pointer points into `thread.stack`
        let status = unsafe { handle_flavored_request(S::FLAVOR.as_raw(), request, TARGET) };

        assert_eq!(status, Status::Success);
        assert_eq!(new_count, S::COUNT);
        assert_eq!(thread.stack[3], 0x4242_0000);

        thread.state.set_sp(thread.state.sp() - 8);
        thread.state.set_pc(TARGET);
        assert_eq!(S::from_words(&new).unwrap(), thread.state);
    }

    #[test]
    fn flavored_request_dispatches_by_layout() {
        flavored::<X86ThreadState64>();
        flavored::<ArmThreadState64>();
    }

    #[test]
    fn flavored_request_rejects_unknown_flavor() {
        let thread = Suspended::<X86ThreadState64>::new(0x4242_0000);
        let mut new = [SENTINEL; 42];
        let mut new_count = 42;

        let request = StateRequest {
            old_state: thread.state.as_words(),
            new_state: &mut new,
            new_state_count: &mut new_count,
        };
        // Safety: the stack pointer points into `thread.stack`
        let status = unsafe { handle_flavored_request(1, request, TARGET) };

        assert_eq!(status, Status::NotSupported);
        assert!(new.iter().all(|word| *word == SENTINEL));
        assert_eq!(new_count, 42);
        assert!(thread.stack.iter().all(|slot| *slot == 0));
    }

    #[test]
    fn flavored_request_checks_size_of_flavor() {
        // an x86 record declared as an arm one
        let thread = Suspended::<X86ThreadState64>::new(0x4242_0000);
        let mut new = [SENTINEL; 68];
        let mut new_count = 68;

        let request = StateRequest {
            old_state: thread.state.as_words(),
            new_state: &mut new,
            new_state_count: &mut new_count,
        };
        // Safety: the stack pointer points into `thread.stack`
        let status = unsafe {
            handle_flavored_request(Flavor::ArmThreadState64.as_raw(), request, TARGET)
        };

        assert_eq!(status, Status::InvalidArgument);
        assert!(new.iter().all(|word| *word == SENTINEL));
        assert_eq!(new_count, 68);
    }

    #[test]
    fn c_callback_rejects_foreign_flavor() {
        let thread = Suspended::<NativeThreadState>::new(0x4242_0000);
        let mut new = [SENTINEL; 68];
        let mut new_count = NativeThreadState::COUNT;

        let foreign = match Flavor::NATIVE {
            Flavor::X86ThreadState64 => Flavor::ArmThreadState64,
            Flavor::ArmThreadState64 => Flavor::X86ThreadState64,
        };

        for flavor in [foreign.as_raw(), 1, -1] {
            // Safety: the stack pointer points into `thread.stack`, buffers are distinct
            let status = unsafe {
                bad_instruction_state_callback(
                    flavor,
                    thread.state.as_words().as_ptr(),
                    NativeThreadState::COUNT,
                    new.as_mut_ptr(),
                    &mut new_count,
                )
            };

            assert_eq!(status, Status::NotSupported.as_raw());
            assert!(new.iter().all(|word| *word == SENTINEL));
            assert_eq!(new_count, NativeThreadState::COUNT);
            assert!(thread.stack.iter().all(|slot| *slot == 0));
        }
    }
}
