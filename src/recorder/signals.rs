//! Signal handling: SIGINT/SIGTERM/SIGHUP graceful shutdown, SIGUSR1
//! on-demand flush, SIGUSR2 on-demand rollover.
//!
//! Uses the `signal-hook` crate for safe signal registration. The runner's
//! main loop polls `SignalHandler` flags each iteration rather than
//! blocking on signals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Thread-safe signal state shared between the signal handler and the
/// runner loop.
///
/// All flags use `Ordering::Relaxed`: the loop polls them every iteration
/// and no ordering against other atomics is required.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    flush_flag: Arc<AtomicBool>,
    rollover_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a new handler and register OS signal hooks.
    ///
    /// SIGINT/SIGTERM/SIGHUP -> shutdown, SIGUSR1 -> flush,
    /// SIGUSR2 -> rollover. Registration is best-effort; failures are
    /// logged to stderr but not fatal.
    #[must_use]
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// Flag state only, with no OS hooks. Used by tests and as the
    /// construction base.
    #[must_use]
    pub fn unregistered() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            flush_flag: Arc::new(AtomicBool::new(false)),
            rollover_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check whether a shutdown has been requested.
    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether an on-demand flush has been requested.
    pub fn should_flush(&self) -> bool {
        self.flush_flag.swap(false, Ordering::Relaxed)
    }

    /// Check (and clear) whether an on-demand rollover has been requested.
    pub fn should_rollover(&self) -> bool {
        self.rollover_flag.swap(false, Ordering::Relaxed)
    }

    /// Programmatically request shutdown (e.g. from error escalation).
    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    /// Programmatically request a flush.
    pub fn request_flush(&self) {
        self.flush_flag.store(true, Ordering::Relaxed);
    }

    /// Programmatically request a rollover.
    pub fn request_rollover(&self) {
        self.rollover_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[LMC-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[LMC-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1, SIGUSR2};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.shutdown_flag)) {
                eprintln!("[LMC-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.flush_flag)) {
                eprintln!("[LMC-SIGNAL] failed to register SIGUSR1: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR2, Arc::clone(&self.rollover_flag)) {
                eprintln!("[LMC-SIGNAL] failed to register SIGUSR2: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_quiet() {
        let handler = SignalHandler::unregistered();
        assert!(!handler.should_shutdown());
        assert!(!handler.should_flush());
        assert!(!handler.should_rollover());
    }

    #[test]
    fn shutdown_flag_is_sticky() {
        let handler = SignalHandler::unregistered();
        handler.request_shutdown();
        assert!(handler.should_shutdown());
        assert!(handler.should_shutdown());
    }

    #[test]
    fn flush_and_rollover_flags_clear_on_read() {
        let handler = SignalHandler::unregistered();
        handler.request_flush();
        assert!(handler.should_flush());
        assert!(!handler.should_flush());

        handler.request_rollover();
        assert!(handler.should_rollover());
        assert!(!handler.should_rollover());
    }

    #[test]
    fn handler_clones_share_flags() {
        let handler = SignalHandler::unregistered();
        let clone = handler.clone();
        handler.request_shutdown();
        assert!(clone.should_shutdown());
    }
}
