//! Thread helpers shared by the scheduler workers and the bus dispatcher.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::bounded;
use tracing::{debug, warn};

/// Join `handle`, giving up after `timeout`.
///
/// A helper thread performs the join so the caller never blocks longer than
/// `timeout`; a thread that overruns is detached and exits on its own later.
/// Returns `true` if the thread exited cleanly within the timeout.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, label: &str) -> bool {
    let (tx, rx) = bounded(1);
    let joiner = thread::spawn(move || {
        let _ = tx.send(handle.join().is_ok());
    });

    match rx.recv_timeout(timeout) {
        Ok(true) => {
            debug!(thread = label, "thread joined");
            let _ = joiner.join();
            true
        }
        Ok(false) => {
            warn!(thread = label, "thread panicked");
            let _ = joiner.join();
            false
        }
        Err(_) => {
            warn!(thread = label, "thread did not exit within timeout, detaching");
            false
        }
    }
}
