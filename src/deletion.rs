use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::PlateError;
use crate::store::{DeleteHandle, DeleteStatus, OmeroStore};

#[derive(Debug, Clone, Copy)]
pub struct DeletePolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for DeletePolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Completed,
    TimedOut,
    Cancelled,
}

/// Poll a queued dataset deletion until it finishes, `policy.timeout`
/// elapses, or `cancel` is raised. The store is always polled at least once;
/// `cancel` is checked before every sleep.
pub fn wait_for_delete<S: OmeroStore + ?Sized>(
    store: &S,
    handle: &DeleteHandle,
    policy: DeletePolicy,
    cancel: &AtomicBool,
) -> Result<DeleteOutcome, PlateError> {
    let start = Instant::now();
    let mut polls = 0u32;
    loop {
        polls += 1;
        if store.poll_delete(handle)? == DeleteStatus::Complete {
            debug!(dataset = handle.dataset_id, polls, "dataset deletion finished");
            return Ok(DeleteOutcome::Completed);
        }
        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            warn!(
                dataset = handle.dataset_id,
                waited_ms = elapsed.as_millis() as u64,
                "gave up waiting for dataset deletion"
            );
            return Ok(DeleteOutcome::TimedOut);
        }
        if cancel.load(Ordering::Relaxed) {
            debug!(dataset = handle.dataset_id, polls, "stopped waiting for dataset deletion");
            return Ok(DeleteOutcome::Cancelled);
        }
        thread::sleep(policy.poll_interval.min(policy.timeout - elapsed));
    }
}
