//! Retry discipline.
//!
//! [`RetryingOperation`] turns one logical request into as many attempts as
//! the [`RetryPolicy`] allows. Requests that can never be encoded fail before
//! the first attempt; network failures and negative acknowledgments are
//! retried with exponential backoff until success, exhaustion, timeout or
//! cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ConnectionMode;
use crate::connection::{Connection, ConnectionManager, Transport};
use crate::error::{MutexError, Result};
use crate::protocol::{Ack, Request, WireCodec};

/// Granularity at which sleeping operations notice cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// How often and how patiently an operation is retried.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Give up after this many attempts. `None` retries until success.
    pub max_attempts: Option<u32>,
    /// Delay after the first failed attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay.
    pub max_backoff_ms: u64,
    /// Growth factor applied after each failure.
    pub multiplier: f64,
    /// Randomize each delay between half and all of its nominal value.
    pub jitter: bool,
    /// Give up once this much time has passed. `None` waits forever.
    pub timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff_ms: 10,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
            jitter: true,
            timeout_ms: None,
        }
    }
}

impl RetryPolicy {
    /// Retry without any delay.
    pub fn immediate() -> Self {
        Self {
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1.0,
            jitter: false,
            ..Self::default()
        }
    }

    /// Bound the number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Bound the total time spent in one operation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Reject values the backoff arithmetic cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(MutexError::InvalidConfig(format!(
                "retry multiplier must be a finite number >= 1, got {}",
                self.multiplier
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(MutexError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The timeout as a [`Duration`].
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Delay sequence of one operation.
#[derive(Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Backoff {
    /// Start a new sequence.
    pub fn new(policy: &RetryPolicy) -> Self {
        let max = Duration::from_millis(policy.max_backoff_ms);
        Self {
            next: Duration::from_millis(policy.initial_backoff_ms).min(max),
            max,
            multiplier: policy.multiplier.max(1.0),
            jitter: policy.jitter,
        }
    }

    /// The delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.next;
        // Grow in f64 so a huge multiplier saturates at the cap.
        self.next = Duration::try_from_secs_f64(nominal.as_secs_f64() * self.multiplier)
            .map_or(self.max, |next| next.min(self.max));
        if self.jitter && !nominal.is_zero() {
            let half = nominal / 2;
            half + half.mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
        } else {
            nominal
        }
    }
}

/// Shared flag that aborts blocking operations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every operation observing this token, now and in the future.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Clear a cancellation so the token can be used again.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Relaxed);
    }

    /// Whether [`CancelToken::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Sleep for `duration`, waking early on cancellation. Returns `false` if
    /// cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}

/// One logical request, retried per policy.
pub struct RetryingOperation<'a> {
    policy: &'a RetryPolicy,
    codec: &'a dyn WireCodec,
    mode: ConnectionMode,
}

impl<'a> RetryingOperation<'a> {
    /// Create an operation runner.
    pub fn new(policy: &'a RetryPolicy, codec: &'a dyn WireCodec, mode: ConnectionMode) -> Self {
        Self {
            policy,
            codec,
            mode,
        }
    }

    /// Run `request` until the server acknowledges it.
    ///
    /// Returns the number of attempts made. An invalid request fails without
    /// any attempt, and an error that is not transient ends the loop at once.
    /// With a timeout, the last delay is shortened so one final attempt
    /// happens at the deadline.
    pub fn execute<T: Transport>(
        &self,
        manager: &ConnectionManager<T>,
        request: &Request,
        cancel: &CancelToken,
    ) -> Result<u32> {
        self.codec.validate(request)?;
        let start = Instant::now();
        let deadline = self
            .policy
            .timeout()
            .and_then(|timeout| start.checked_add(timeout));
        let mut backoff = Backoff::new(self.policy);
        let mut kept = None;
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(MutexError::Cancelled { attempts });
            }
            attempts += 1;
            let err = match self.attempt(manager, &mut kept, request) {
                Ok(()) => {
                    log::debug!(
                        "{} {:?} acknowledged after {attempts} attempt(s)",
                        request.action.name(),
                        request.key
                    );
                    return Ok(attempts);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };
            log::warn!(
                "{} {:?} attempt {attempts} to {} failed: {err}",
                request.action.name(),
                request.key,
                manager.endpoint()
            );

            if self.policy.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(MutexError::Exhausted {
                    attempts,
                    last: err.to_string(),
                });
            }
            let mut delay = backoff.next_delay();
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(MutexError::TimedOut {
                        attempts,
                        elapsed: start.elapsed(),
                    });
                }
                delay = delay.min(deadline - now);
            }
            if !cancel.sleep(delay) {
                return Err(MutexError::Cancelled { attempts });
            }
        }
    }

    /// Encoding, connecting, sending and awaiting the acknowledgment, once.
    fn attempt<'m, T: Transport>(
        &self,
        manager: &'m ConnectionManager<T>,
        kept: &mut Option<Connection<'m, T>>,
        request: &Request,
    ) -> Result<()> {
        let bytes = self.codec.encode(request)?;
        let mut conn = match kept.take() {
            Some(conn) => conn,
            None => manager.connect()?,
        };
        match conn.exchange(&bytes)? {
            Ack::Success => Ok(()),
            Ack::Failure => {
                if self.mode == ConnectionMode::PerOperation && conn.is_reusable() {
                    *kept = Some(conn);
                }
                Err(MutexError::Rejected)
            }
        }
    }
}
