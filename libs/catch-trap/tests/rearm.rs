// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Checks the process-wide `SIGILL` disposition. This is the only test in its binary so no other
//! test arms interception concurrently.

use catch_trap::{catch_bad_instruction, execute_bad_instruction};
use core::{mem, ptr};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

fn current_disposition() -> libc::sighandler_t {
    // Safety: querying a disposition only writes to `action`
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        assert_eq!(libc::sigaction(libc::SIGILL, ptr::null(), &mut action), 0);
        action.sa_sigaction
    }
}

#[test]
fn restores_previous_disposition() {
    let _trace = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_ids(true)
        .set_default();

    let before = current_disposition();

    for _ in 0..3 {
        let guard = catch_trap::arm().unwrap();
        let installed = current_disposition();
        assert_ne!(installed, before);

        // nested guards share the installation
        let nested = catch_trap::arm().unwrap();
        assert_eq!(current_disposition(), installed);
        drop(nested);
        assert_eq!(current_disposition(), installed);

        drop(guard);
        assert_eq!(current_disposition(), before);
    }

    assert!(catch_bad_instruction(|| -> u32 { execute_bad_instruction() }).is_err());
    assert_eq!(current_disposition(), before);
}
