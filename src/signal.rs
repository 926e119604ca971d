use std::sync::atomic::{AtomicBool, Ordering};

use libc::{c_int, SIGHUP, SIGINT, SIGTERM};
use log::debug;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static RELOAD: AtomicBool = AtomicBool::new(false);

extern "C" fn on_terminate(_signal: c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

extern "C" fn on_hangup(_signal: c_int) {
    RELOAD.store(true, Ordering::SeqCst);
}

/// Flag-only handlers: SIGINT/SIGTERM ask for a graceful shutdown,
/// SIGHUP for a config reload. Both are polled at tick boundaries; the
/// current tick always completes.
pub fn install() {
    unsafe {
        libc::signal(SIGINT, on_terminate as libc::sighandler_t);
        libc::signal(SIGTERM, on_terminate as libc::sighandler_t);
        libc::signal(SIGHUP, on_hangup as libc::sighandler_t);
    }

    debug!("signal handlers installed");
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

pub fn take_reload_request() -> bool {
    RELOAD.swap(false, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_flag_is_consumed_once() {
        RELOAD.store(true, Ordering::SeqCst);

        assert!(take_reload_request());
        assert!(!take_reload_request());
    }
}
