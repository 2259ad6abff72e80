// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{Flavor, ThreadState, natural_t};
use core::mem::offset_of;
use static_assertions::const_assert_eq;

/// The aarch64 general purpose registers, laid out like `arm_thread_state64_t`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ArmThreadState64 {
    /// General purpose registers x0-x28
    pub x: [u64; 29],
    /// Frame pointer x29
    pub fp: u64,
    /// Link register x30
    pub lr: u64,
    /// Stack pointer x31
    pub sp: u64,
    /// Program counter
    pub pc: u64,
    /// Current program status register
    pub cpsr: u32,
    /// Rounds the record up to a multiple of 8 bytes
    pub pad: u32,
}

const_assert_eq!(size_of::<ArmThreadState64>(), 0x110);
const_assert_eq!(
    size_of::<ArmThreadState64>(),
    ArmThreadState64::COUNT as usize * size_of::<natural_t>()
);
const_assert_eq!(offset_of!(ArmThreadState64, sp), 248);
const_assert_eq!(offset_of!(ArmThreadState64, pc), 256);
const_assert_eq!(offset_of!(ArmThreadState64, cpsr), 264);

// Safety: repr(C), the explicit `pad` field leaves no implicit padding and every bit pattern is
// valid
unsafe impl ThreadState for ArmThreadState64 {
    const FLAVOR: Flavor = Flavor::ArmThreadState64;
    const COUNT: u32 = 68;

    #[inline]
    fn pc(&self) -> u64 {
        self.pc
    }

    #[inline]
    fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    #[inline]
    fn sp(&self) -> u64 {
        self.sp
    }

    #[inline]
    fn set_sp(&mut self, sp: u64) {
        self.sp = sp;
    }
}
