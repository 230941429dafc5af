//! Signal handling for clean shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Install a SIGINT/SIGTERM handler and return the flag it sets.
///
/// The reactor polls the flag between waits, so the first signal drains and
/// exits cleanly within one poll interval. A second signal means the event
/// loop never got there (wedged in a handler, or the poll thread is gone)
/// and aborts the process instead of stranding the operator.
pub fn install_signal_handler() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            // the loop ignored the first signal
            std::process::exit(130);
        }
        tracing::info!("shutdown requested, draining");
    })
    .expect("failed to install signal handler");

    shutdown
}
