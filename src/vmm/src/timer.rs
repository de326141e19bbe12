// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Periodic interrupt injector: a 1 ms monotonic POSIX timer whose only
//! job is to make an in-flight `KVM_RUN` return with `INTR` so the
//! dispatch loop can give device models (the UART) a chance to raise
//! their line. The signal handler itself does nothing — the interruption
//! is the entire point.

use std::io;
use std::mem;
use std::ptr;

use libc::{c_int, itimerspec, sigevent, timer_t};

const TIMER_INTERVAL_NS: i64 = 1_000_000; // 1 ms

extern "C" fn handle_timer_tick(_signum: c_int) {}

/// Owns the POSIX interval timer for the monitor's lifetime; disarmed and
/// deleted on drop.
pub struct IntervalTimer {
    timer_id: timer_t,
}

impl IntervalTimer {
    /// Installs the (empty) `SIGALRM` handler and arms a 1 ms periodic
    /// `CLOCK_MONOTONIC` timer that signals the calling thread.
    pub fn arm() -> io::Result<Self> {
        unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = handle_timer_tick as usize;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(libc::SIGALRM, &action, ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }

            let mut sev: sigevent = mem::zeroed();
            sev.sigev_notify = libc::SIGEV_SIGNAL;
            sev.sigev_signo = libc::SIGALRM;

            let mut timer_id: timer_t = ptr::null_mut();
            if libc::timer_create(libc::CLOCK_MONOTONIC, &mut sev, &mut timer_id) != 0 {
                return Err(io::Error::last_os_error());
            }

            let period = libc::timespec {
                tv_sec: 0,
                tv_nsec: TIMER_INTERVAL_NS,
            };
            let spec = itimerspec {
                it_interval: period,
                it_value: period,
            };
            if libc::timer_settime(timer_id, 0, &spec, ptr::null_mut()) != 0 {
                let err = io::Error::last_os_error();
                libc::timer_delete(timer_id);
                return Err(err);
            }

            Ok(IntervalTimer { timer_id })
        }
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        unsafe {
            libc::timer_delete(self.timer_id);
        }
    }
}
