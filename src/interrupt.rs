use std::sync::atomic::{AtomicBool, Ordering};

// Signal handling logic.
//
// SIGINT and SIGTERM are the daemon's graceful-stop triggers (spec: "Signals. SIGINT and SIGTERM
// to the daemon cause graceful stop"). SIGHUP is treated the same way here -- there is no config
// reload in this daemon, so a reload signal degrades to a clean shutdown rather than being
// ignored.
//
// Call handle_interruptions() once at startup to establish handlers, then poll is_interrupted()
// from the control-surface sweep loop; it notifies the scheduler core to stop on the next sweep.

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn gpusched_signal_handler(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

pub fn handle_interruptions() {
    unsafe {
        let nomask: libc::sigset_t = std::mem::zeroed();
        let action = libc::sigaction {
            sa_sigaction: gpusched_signal_handler as usize,
            sa_mask: nomask,
            sa_flags: 0,
            sa_restorer: None,
        };
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGHUP, &action, std::ptr::null_mut());
    }
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

#[cfg(test)]
pub fn reset_for_test() {
    INTERRUPTED.store(false, Ordering::Relaxed);
}
