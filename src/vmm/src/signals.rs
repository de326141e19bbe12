// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! `SIGINT`/`SIGQUIT` handling. Both terminate the run loop, but only
//! after it yields control between `KVM_RUN` calls: the handlers touch
//! nothing but a pair of `AtomicBool` flags, matching §5's requirement
//! that signal handlers confine themselves to `sig_atomic_t`-class state.

use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use libc::c_int;

/// Set by the `SIGINT` handler: clean shutdown, restore the terminal and exit.
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
/// Set by the `SIGQUIT` handler: dump diagnostics and exit.
pub static DIAGNOSTIC_DUMP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signum: c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn handle_sigquit(_signum: c_int) {
    DIAGNOSTIC_DUMP_REQUESTED.store(true, Ordering::SeqCst);
}

fn install(signum: c_int, handler: extern "C" fn(c_int)) -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(signum, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Installs both handlers. Must be called before the run loop starts
/// (and, per §9, before any other signal is armed).
pub fn register() -> io::Result<()> {
    install(libc::SIGINT, handle_sigint)?;
    install(libc::SIGQUIT, handle_sigquit)
}
