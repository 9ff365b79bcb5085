//! Per-call deadlines and cooperative cancellation for blocking collaborators.
//!
//! The call runs on a worker thread and the caller waits on a channel, polling the cancel
//! flag between short waits. A call that misses its deadline is abandoned: its thread is
//! left to finish on its own and the result is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum CallOutcome<T> {
    Completed(T),
    TimedOut,
    Cancelled,
    /// The worker panicked or could not be started.
    WorkerLost(String),
}

pub fn call_with_deadline<T, F>(
    label: &str,
    timeout: Duration,
    cancel: &CancelToken,
    f: F,
) -> CallOutcome<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if cancel.is_cancelled() {
        return CallOutcome::Cancelled;
    }

    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("dqa-{label}"))
        .spawn(move || {
            // The receiver is gone once the caller gave up; nothing to report then.
            let _ = tx.send(f());
        });
    if let Err(e) = spawned {
        return CallOutcome::WorkerLost(format!("failed to spawn worker: {e}"));
    }

    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return CallOutcome::Cancelled;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return CallOutcome::TimedOut;
        }
        match rx.recv_timeout(remaining.min(POLL_INTERVAL)) {
            Ok(v) => return CallOutcome::Completed(v),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return CallOutcome::WorkerLost(format!("{label} worker exited without a result"))
            }
        }
    }
}
