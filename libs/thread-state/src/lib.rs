// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Saved thread register state.
//!
//! When a thread traps, the kernel freezes its general purpose registers into a fixed-size record
//! and hands that record to whoever is handling the trap. This crate defines the two record layouts
//! we know how to rewrite: the 64-bit x86 general register set ([`X86ThreadState64`]) and the
//! 64-bit ARM general register set ([`ArmThreadState64`]). Both follow the Mach `thread_state`
//! layouts exactly, which means they can be exchanged with the kernel as arrays of 32-bit
//! [`natural_t`] words.
//!
//! Code that only cares about the program counter and stack pointer can be written against the
//! [`ThreadState`] trait, code that receives a record of unknown shape can decode it into
//! [`AnyThreadState`], and code that deals with the thread it is running on uses
//! [`NativeThreadState`].

#![cfg_attr(not(test), no_std)]

mod aarch64;
mod x86_64;

pub use aarch64::ArmThreadState64;
pub use x86_64::X86ThreadState64;

use core::fmt;
use core::ptr;
use core::slice;

/// The unit in which thread state is counted and exchanged with the kernel.
#[expect(non_camel_case_types, reason = "mirrors the kernel type name")]
pub type natural_t = u32;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// The register-state record of the architecture we are compiled for.
        pub type NativeThreadState = X86ThreadState64;
    } else if #[cfg(target_arch = "aarch64")] {
        /// The register-state record of the architecture we are compiled for.
        pub type NativeThreadState = ArmThreadState64;
    } else {
        compile_error!("Unsupported target architecture");
    }
}

/// Identifies the layout of a thread-state record.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Flavor {
    /// `x86_THREAD_STATE64`
    X86ThreadState64 = 4,
    /// `ARM_THREAD_STATE64`
    ArmThreadState64 = 6,
}

impl Flavor {
    /// The flavor of [`NativeThreadState`].
    pub const NATIVE: Flavor = NativeThreadState::FLAVOR;

    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            4 => Some(Self::X86ThreadState64),
            6 => Some(Self::ArmThreadState64),
            _ => None,
        }
    }

    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Size of a record of this flavor, in [`natural_t`] words.
    pub const fn count(self) -> u32 {
        match self {
            Flavor::X86ThreadState64 => X86ThreadState64::COUNT,
            Flavor::ArmThreadState64 => ArmThreadState64::COUNT,
        }
    }
}

/// A fixed-size record of a thread's saved registers.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, exactly `COUNT * size_of::<natural_t>()` bytes large, at
/// least as aligned as [`natural_t`], contain no padding bytes and accept any bit pattern as a valid
/// value. The default methods rely on this to reinterpret records as word slices and back.
pub unsafe trait ThreadState: Copy + Default + Eq + fmt::Debug + 'static {
    /// The layout identifier of this record.
    const FLAVOR: Flavor;
    /// Size of the record in [`natural_t`] words.
    const COUNT: u32;
    /// Width in bytes of a pointer-sized slot on this architectures stack.
    const POINTER_WIDTH: u64 = 8;

    fn pc(&self) -> u64;
    fn set_pc(&mut self, pc: u64);
    fn sp(&self) -> u64;
    fn set_sp(&mut self, sp: u64);

    /// Reads a record out of `words`.
    ///
    /// Returns `None` unless `words` holds exactly [`Self::COUNT`] words. The words don't have to
    /// be aligned beyond [`natural_t`].
    fn from_words(words: &[natural_t]) -> Option<Self> {
        if words.len() != Self::COUNT as usize {
            return None;
        }

        // Safety: the length has been checked above and any bit pattern is a valid record
        Some(unsafe { ptr::read_unaligned(words.as_ptr().cast::<Self>()) })
    }

    /// Views the record as the words the kernel exchanges.
    fn as_words(&self) -> &[natural_t] {
        // Safety: the trait contract guarantees the record is exactly COUNT words without padding
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast::<natural_t>(), Self::COUNT as usize) }
    }

    /// Mutably views the record as the words the kernel exchanges.
    fn as_words_mut(&mut self) -> &mut [natural_t] {
        // Safety: the trait contract guarantees the record is exactly COUNT words without padding
        // and that every bit pattern written through the slice remains a valid record
        unsafe {
            slice::from_raw_parts_mut(ptr::from_mut(self).cast::<natural_t>(), Self::COUNT as usize)
        }
    }
}

/// A register-state record of either supported layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AnyThreadState {
    X86_64(X86ThreadState64),
    Aarch64(ArmThreadState64),
}

impl AnyThreadState {
    /// Decodes `words` as a record of the given raw flavor.
    ///
    /// Returns `None` if the flavor is unknown or `words` isn't exactly as long as records of that
    /// flavor are.
    pub fn decode(flavor: i32, words: &[natural_t]) -> Option<Self> {
        match Flavor::from_raw(flavor)? {
            Flavor::X86ThreadState64 => X86ThreadState64::from_words(words).map(Self::X86_64),
            Flavor::ArmThreadState64 => ArmThreadState64::from_words(words).map(Self::Aarch64),
        }
    }

    pub fn flavor(&self) -> Flavor {
        match self {
            AnyThreadState::X86_64(_) => Flavor::X86ThreadState64,
            AnyThreadState::Aarch64(_) => Flavor::ArmThreadState64,
        }
    }

    pub fn pc(&self) -> u64 {
        match self {
            AnyThreadState::X86_64(state) => state.pc(),
            AnyThreadState::Aarch64(state) => state.pc(),
        }
    }

    pub fn sp(&self) -> u64 {
        match self {
            AnyThreadState::X86_64(state) => state.sp(),
            AnyThreadState::Aarch64(state) => state.sp(),
        }
    }

    pub fn as_words(&self) -> &[natural_t] {
        match self {
            AnyThreadState::X86_64(state) => state.as_words(),
            AnyThreadState::Aarch64(state) => state.as_words(),
        }
    }
}

impl From<X86ThreadState64> for AnyThreadState {
    fn from(state: X86ThreadState64) -> Self {
        Self::X86_64(state)
    }
}

impl From<ArmThreadState64> for AnyThreadState {
    fn from(state: ArmThreadState64) -> Self {
        Self::Aarch64(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn words_of(flavor: Flavor) -> impl Strategy<Value = Vec<natural_t>> {
        vec(any::<natural_t>(), flavor.count() as usize)
    }

    proptest! {
        #[test]
        fn x86_64_words_round_trip(words in words_of(Flavor::X86ThreadState64)) {
            let state = X86ThreadState64::from_words(&words).unwrap();
            prop_assert_eq!(state.as_words(), &words[..]);
            prop_assert_eq!(state.as_words().len(), X86ThreadState64::COUNT as usize);
        }

        #[test]
        fn aarch64_words_round_trip(words in words_of(Flavor::ArmThreadState64)) {
            let state = ArmThreadState64::from_words(&words).unwrap();
            prop_assert_eq!(state.as_words(), &words[..]);
            prop_assert_eq!(state.as_words().len(), ArmThreadState64::COUNT as usize);
        }

        #[test]
        fn decode_matches_layout(words in words_of(Flavor::ArmThreadState64)) {
            let state = AnyThreadState::decode(Flavor::ArmThreadState64.as_raw(), &words).unwrap();
            prop_assert_eq!(state.flavor(), Flavor::ArmThreadState64);
            prop_assert_eq!(state.as_words(), &words[..]);
            prop_assert_eq!(state.pc(), u64::from(words[64]) | (u64::from(words[65]) << 32));
        }
    }

    #[test]
    fn native_flavor_matches_target() {
        if cfg!(target_arch = "x86_64") {
            assert_eq!(Flavor::NATIVE, Flavor::X86ThreadState64);
        } else {
            assert_eq!(Flavor::NATIVE, Flavor::ArmThreadState64);
        }
        assert_eq!(Flavor::NATIVE.count(), NativeThreadState::COUNT);
    }

    #[test]
    fn flavor_raw_values() {
        assert_eq!(Flavor::from_raw(4), Some(Flavor::X86ThreadState64));
        assert_eq!(Flavor::from_raw(6), Some(Flavor::ArmThreadState64));
        assert_eq!(Flavor::from_raw(7), None);
        assert_eq!(Flavor::ArmThreadState64.as_raw(), 6);
    }

    #[test]
    fn decode_picks_layout_by_flavor() {
        let mut arm = ArmThreadState64::default();
        arm.pc = 0x1000;
        arm.sp = 0x7fff_0000;

        let decoded = AnyThreadState::decode(6, arm.as_words()).unwrap();
        assert_eq!(decoded, AnyThreadState::Aarch64(arm));
        assert_eq!(decoded.flavor(), Flavor::ArmThreadState64);
        assert_eq!(decoded.pc(), 0x1000);
        assert_eq!(decoded.sp(), 0x7fff_0000);

        // an arm record is too long to be an x86 record
        assert!(AnyThreadState::decode(4, arm.as_words()).is_none());
        // and unknown flavors are rejected outright
        assert!(AnyThreadState::decode(1, arm.as_words()).is_none());
    }

    #[test]
    fn from_words_rejects_wrong_length() {
        let words = [0; 43];
        assert!(X86ThreadState64::from_words(&words).is_none());
        assert!(X86ThreadState64::from_words(&words[..41]).is_none());
        assert!(X86ThreadState64::from_words(&words[..42]).is_some());
    }

    #[test]
    fn from_words_tolerates_word_alignment() {
        // offset the record by one word so the u64 fields are misaligned
        let mut words = [0; 43];
        let mut state = X86ThreadState64::default();
        state.rip = 0xdead_beef_0000_1234;
        words[1..].copy_from_slice(state.as_words());

        assert_eq!(X86ThreadState64::from_words(&words[1..]), Some(state));
    }
}
