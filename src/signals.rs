//! Interrupt handling for scan runs.
//!
//! The first SIGINT/SIGTERM flips a process-wide flag that every long-lived
//! loop polls between iterations; the scan then drains and shuts down
//! cleanly. A second interrupt exits immediately for users who really mean
//! it.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// The process-wide interrupt flag. Long-lived loops poll this between
/// iterations; handing it to the coordinator makes it the cancel signal.
pub fn cancel_flag() -> &'static AtomicBool {
    &INTERRUPTED
}

/// True once an interrupt has been delivered.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Install handlers for SIGINT and SIGTERM.
#[cfg(unix)]
pub fn install() -> std::io::Result<()> {
    unsafe {
        for signal in [libc::SIGINT, libc::SIGTERM] {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle as libc::sighandler_t;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

/// Signal handling is unix-only; elsewhere the flag can still be set by
/// embedding callers.
#[cfg(not(unix))]
pub fn install() -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
extern "C" fn handle(_signal: libc::c_int) {
    // Async-signal-safe: one atomic swap, and _exit on the second delivery.
    if INTERRUPTED.swap(true, Ordering::SeqCst) {
        unsafe { libc::_exit(130) };
    }
}
