use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::time::Duration;

use parking_lot::Mutex;
use quanta::Clock;
use quanta::Instant;

use crate::ConfigError;
use crate::Reason;

/// Requests recorded inside the window, oldest first.
#[derive(Debug, Default)]
struct Log {
    entries: VecDeque<(Instant, usize)>,
    total: usize,
}

impl Log {
    /// Drop every entry that is at least one window old.
    fn expire(&mut self, now: Instant, period: Duration) {
        while let Some(&(at, count)) = self.entries.front() {
            if now.saturating_duration_since(at) < period {
                break;
            }
            self.entries.pop_front();
            self.total -= count;
        }
    }

    fn push(&mut self, now: Instant, requests: usize) {
        if requests == 0 {
            return;
        }
        self.total += requests;
        if let Some((at, count)) = self.entries.back_mut() {
            if *at == now {
                *count += requests;
                return;
            }
        }
        self.entries.push_back((now, requests));
    }
}

/// Counts requests over a trailing window.
///
/// Every accepted record is kept with its timestamp and expires exactly one
/// window later, so no window-sized span ever holds more than
/// `max_requests`. Records made at the same instant share one entry.
///
/// Unlike [`TokenBucket`](crate::TokenBucket), a multi-request
/// [`record`](Self::record) is all or nothing.
#[derive(Debug)]
pub struct SlidingWindowCounter {
    max_requests: usize,
    period: Duration,
    log: Mutex<Log>,
    clock: Clock,
}

impl SlidingWindowCounter {
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroWindow`] for an empty window.
    pub fn new(window: Duration, max_requests: NonZeroUsize) -> Result<Self, ConfigError> {
        Self::with_clock(window, max_requests, Clock::new())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroWindow`] for an empty window.
    pub fn with_clock(
        window: Duration,
        max_requests: NonZeroUsize,
        clock: Clock,
    ) -> Result<Self, ConfigError> {
        if window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(Self {
            max_requests: max_requests.get(),
            period: window,
            log: Mutex::new(Log::default()),
            clock,
        })
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.period
    }

    /// Record `requests` if they all fit in the window.
    pub fn record(&self, requests: usize) -> bool {
        self.try_record(requests).is_continue()
    }

    /// Like [`record`](Self::record), but reports how long until the
    /// requests would fit.
    ///
    /// A batch larger than `max_requests` can never fit. Its `retry_after`
    /// is a full window.
    pub fn try_record(&self, requests: usize) -> ControlFlow<Reason> {
        let now = self.clock.now();
        let mut log = self.log.lock();
        log.expire(now, self.period);

        let wanted = log.total.saturating_add(requests);
        if wanted <= self.max_requests {
            log.push(now, requests);
            return ControlFlow::Continue(());
        }

        ControlFlow::Break(Reason::Insufficient {
            missing: (wanted - self.max_requests) as f64,
            retry_after: self.time_until_fits(&log, now, requests),
        })
    }

    /// Requests that could be recorded right now.
    pub fn available(&self) -> usize {
        let now = self.clock.now();
        let mut log = self.log.lock();
        log.expire(now, self.period);
        self.max_requests.saturating_sub(log.total)
    }

    /// Wait before a single request would be accepted.
    pub fn retry_after(&self) -> Duration {
        let now = self.clock.now();
        let mut log = self.log.lock();
        log.expire(now, self.period);
        if log.total < self.max_requests {
            return Duration::ZERO;
        }
        self.time_until_fits(&log, now, 1)
    }

    fn time_until_fits(&self, log: &Log, now: Instant, requests: usize) -> Duration {
        if requests > self.max_requests {
            return self.period;
        }
        let needed = (log.total + requests).saturating_sub(self.max_requests);
        let mut freed = 0;
        for &(at, count) in &log.entries {
            freed += count;
            if freed >= needed {
                return self
                    .period
                    .saturating_sub(now.saturating_duration_since(at));
            }
        }
        Duration::ZERO
    }
}
