use std::future::Future;
use std::future::ready;
use std::time::Duration;

/// The suspend primitive the retry loop waits with.
///
/// [`RateLimiter::run`](crate::RateLimiter::run) is written once against this
/// trait. [`TokioSleeper`] yields to the runtime, [`ThreadSleeper`] parks the
/// calling thread. Waits are always issued in bounded slices, never as a spin.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Suspends the current task on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Blocks the calling thread. The returned future is already complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        std::thread::sleep(duration);
        ready(())
    }
}
