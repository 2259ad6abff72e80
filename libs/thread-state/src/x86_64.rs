// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{Flavor, ThreadState, natural_t};
use core::mem::offset_of;
use static_assertions::const_assert_eq;

/// The x86_64 general purpose registers, laid out like `x86_thread_state64_t`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct X86ThreadState64 {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u64,
    pub fs: u64,
    pub gs: u64,
}

const_assert_eq!(size_of::<X86ThreadState64>(), 168);
const_assert_eq!(
    size_of::<X86ThreadState64>(),
    X86ThreadState64::COUNT as usize * size_of::<natural_t>()
);
const_assert_eq!(offset_of!(X86ThreadState64, rsp), 56);
const_assert_eq!(offset_of!(X86ThreadState64, rip), 128);

// Safety: repr(C), 21 u64 fields and therefore no padding, every bit pattern is valid
unsafe impl ThreadState for X86ThreadState64 {
    const FLAVOR: Flavor = Flavor::X86ThreadState64;
    const COUNT: u32 = 42;

    #[inline]
    fn pc(&self) -> u64 {
        self.rip
    }

    #[inline]
    fn set_pc(&mut self, pc: u64) {
        self.rip = pc;
    }

    #[inline]
    fn sp(&self) -> u64 {
        self.rsp
    }

    #[inline]
    fn set_sp(&mut self, sp: u64) {
        self.rsp = sp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pc_and_sp_words() {
        let mut state = X86ThreadState64::default();
        state.set_pc(0x1122_3344_5566_7788);
        state.set_sp(0x0000_7ffd_0000_1000);

        let words = state.as_words();
        assert_eq!(words.len(), 42);
        // little endian: low word first
        assert_eq!(&words[32..34], &[0x5566_7788, 0x1122_3344]);
        assert_eq!(&words[14..16], &[0x0000_1000, 0x0000_7ffd]);
    }

    #[test]
    fn words_mut_writes_fields() {
        let mut state = X86ThreadState64::default();
        state.as_words_mut()[40] = 0x2b;
        assert_eq!(state.gs, 0x2b);
    }
}
