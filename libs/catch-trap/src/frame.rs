// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Conversion between the kernel's signal frame and the thread state records.
//!
//! The thread a signal interrupted resumes with whatever register values the `ucontext_t` holds when
//! the handler returns. [`capture`] reads those values into the thread state record of the current
//! architecture and [`restore`] writes a record back. Registers the record doesn't carry are left
//! untouched.

use core::ffi::c_void;
use thread_state::NativeThreadState;

cfg_if::cfg_if! {
    if #[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "x86_64"))] {
        use libc::{
            REG_CSGSFS, REG_EFL, REG_R8, REG_R9, REG_R10, REG_R11, REG_R12, REG_R13, REG_R14,
            REG_R15, REG_RAX, REG_RBP, REG_RBX, REG_RCX, REG_RDI, REG_RDX, REG_RIP, REG_RSI,
            REG_RSP,
        };

        /// Segment selectors are packed as `cs | gs << 16 | fs << 32` into one register.
        const SELECTOR_MASK: u64 = 0xffff;

        #[expect(
            clippy::cast_sign_loss,
            reason = "general purpose registers are stored as signed words"
        )]
        pub unsafe fn capture(context: *mut c_void) -> NativeThreadState {
            // Safety: ensured by caller
            let gregs = unsafe { &(*context.cast::<libc::ucontext_t>()).uc_mcontext.gregs };
            let reg = |index: libc::c_int| gregs[index as usize] as u64;
            let selectors = reg(REG_CSGSFS);

            NativeThreadState {
                rax: reg(REG_RAX),
                rbx: reg(REG_RBX),
                rcx: reg(REG_RCX),
                rdx: reg(REG_RDX),
                rdi: reg(REG_RDI),
                rsi: reg(REG_RSI),
                rbp: reg(REG_RBP),
                rsp: reg(REG_RSP),
                r8: reg(REG_R8),
                r9: reg(REG_R9),
                r10: reg(REG_R10),
                r11: reg(REG_R11),
                r12: reg(REG_R12),
                r13: reg(REG_R13),
                r14: reg(REG_R14),
                r15: reg(REG_R15),
                rip: reg(REG_RIP),
                rflags: reg(REG_EFL),
                cs: selectors & SELECTOR_MASK,
                gs: (selectors >> 16) & SELECTOR_MASK,
                fs: (selectors >> 32) & SELECTOR_MASK,
            }
        }

        #[expect(
            clippy::cast_sign_loss,
            clippy::cast_possible_wrap,
            reason = "general purpose registers are stored as signed words"
        )]
        pub unsafe fn restore(context: *mut c_void, state: &NativeThreadState) {
            // Safety: ensured by caller
            let gregs = unsafe { &mut (*context.cast::<libc::ucontext_t>()).uc_mcontext.gregs };

            let high = gregs[REG_CSGSFS as usize] as u64 & !((1 << 48) - 1);
            let selectors = (state.cs & SELECTOR_MASK)
                | ((state.gs & SELECTOR_MASK) << 16)
                | ((state.fs & SELECTOR_MASK) << 32)
                | high;

            let mut set = |index: libc::c_int, value: u64| gregs[index as usize] = value as i64;

            set(REG_RAX, state.rax);
            set(REG_RBX, state.rbx);
            set(REG_RCX, state.rcx);
            set(REG_RDX, state.rdx);
            set(REG_RDI, state.rdi);
            set(REG_RSI, state.rsi);
            set(REG_RBP, state.rbp);
            set(REG_RSP, state.rsp);
            set(REG_R8, state.r8);
            set(REG_R9, state.r9);
            set(REG_R10, state.r10);
            set(REG_R11, state.r11);
            set(REG_R12, state.r12);
            set(REG_R13, state.r13);
            set(REG_R14, state.r14);
            set(REG_R15, state.r15);
            set(REG_RIP, state.rip);
            set(REG_EFL, state.rflags);
            set(REG_CSGSFS, selectors);
        }
    } else if #[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64"))] {
        /// Mask of the PSTATE bits mirrored in the 32-bit `cpsr` field.
        const CPSR_MASK: u64 = 0xffff_ffff;

        #[expect(clippy::cast_possible_truncation, reason = "masked to the low 32 bits")]
        pub unsafe fn capture(context: *mut c_void) -> NativeThreadState {
            // Safety: ensured by caller
            let mcontext = unsafe { &(*context.cast::<libc::ucontext_t>()).uc_mcontext };

            let mut x = [0; 29];
            x.copy_from_slice(&mcontext.regs[..29]);

            NativeThreadState {
                x,
                fp: mcontext.regs[29],
                lr: mcontext.regs[30],
                sp: mcontext.sp,
                pc: mcontext.pc,
                cpsr: (mcontext.pstate & CPSR_MASK) as u32,
                pad: 0,
            }
        }

        pub unsafe fn restore(context: *mut c_void, state: &NativeThreadState) {
            // Safety: ensured by caller
            let mcontext = unsafe { &mut (*context.cast::<libc::ucontext_t>()).uc_mcontext };

            mcontext.regs[..29].copy_from_slice(&state.x);
            mcontext.regs[29] = state.fp;
            mcontext.regs[30] = state.lr;
            mcontext.sp = state.sp;
            mcontext.pc = state.pc;
            mcontext.pstate = (mcontext.pstate & !CPSR_MASK) | u64::from(state.cpsr);
        }
    } else if #[cfg(target_vendor = "apple")] {
        use core::ptr;

        // The Darwin signal frame embeds the Mach thread state, the record layouts are identical.
        pub unsafe fn capture(context: *mut c_void) -> NativeThreadState {
            // Safety: ensured by caller
            unsafe {
                let mcontext = (*context.cast::<libc::ucontext_t>()).uc_mcontext;
                ptr::addr_of!((*mcontext).__ss)
                    .cast::<NativeThreadState>()
                    .read_unaligned()
            }
        }

        pub unsafe fn restore(context: *mut c_void, state: &NativeThreadState) {
            // Safety: ensured by caller
            unsafe {
                let mcontext = (*context.cast::<libc::ucontext_t>()).uc_mcontext;
                ptr::addr_of_mut!((*mcontext).__ss)
                    .cast::<NativeThreadState>()
                    .write_unaligned(*state);
            }
        }
    } else {
        compile_error!("Unsupported target");
    }
}
