use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

/// What a caller is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressPhase {
    WaitingForTokens,
    Backoff,
}

/// A structured snapshot emitted while a call is waiting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    /// Retry number the wait belongs to; `0` before the first retry.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Time left in the current wait.
    pub delay: Duration,
    pub tokens_remaining: f64,
    /// Unjittered estimate of the backoff still ahead if every retry fails.
    pub estimated_wait: Duration,
    pub phase: ProgressPhase,
    pub message: Option<String>,
}

/// Receives [`ProgressUpdate`]s. Panics inside the callback are caught and
/// logged; they never affect the call being reported on.
pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

pub(crate) fn emit(callback: &ProgressCallback, update: &ProgressUpdate) {
    if catch_unwind(AssertUnwindSafe(|| callback(update))).is_err() {
        tracing::warn!(
            attempt = update.attempt,
            phase = ?update.phase,
            "progress callback panicked; ignoring"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    fn update() -> ProgressUpdate {
        ProgressUpdate {
            attempt: 1,
            max_attempts: 3,
            delay: Duration::from_millis(500),
            tokens_remaining: 4.0,
            estimated_wait: Duration::from_secs(3),
            phase: ProgressPhase::Backoff,
            message: Some("Backoff 50%".to_string()),
        }
    }

    #[test]
    fn callback_receives_update() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |update: &ProgressUpdate| {
            assert_eq!(update.attempt, 1);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emit(&callback, &update());
        emit(&callback, &update());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    fn explode(_: &ProgressUpdate) {
        panic!("observer bug");
    }

    #[test]
    fn panicking_callback_is_contained() {
        let callback: ProgressCallback = Arc::new(explode);
        emit(&callback, &update());
    }
}
