// Copyright the graphbolt authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::result::Result as StdResult;
use std::thread::sleep;
use std::time::Duration;

use log::warn;
use rand::Rng;
use thiserror::Error;

use crate::error_::{DriverError, Result};
use crate::time::Instant;

// imports for docs
#[allow(unused)]
use crate::driver::session::TransactionBuilder;

/// Specifies how to retry work.
///
/// The driver uses this trait in places like
/// [`TransactionBuilder::run_with_retry()`].
/// Only errors classified as retryable ([`DriverError::is_retryable()`]) may
/// be retried; everything else must propagate immediately.
///
/// A default implementation is provided through [`ExponentialBackoff`].
pub trait RetryPolicy {
    type Error;

    fn execute<R>(&self, work: impl FnMut() -> Result<R>) -> StdResult<R, Self::Error>;
}

/// [`RetryPolicy`] that retries work with truncated exponential backoff and
/// jitter.
///
/// Exponential backoff means that the time between retries will increase
/// exponentially:
///  * work fails → wait 1 second
///  * work fails → wait 2 seconds
///  * work fails → wait 4 seconds
///  * ...
///
/// By default, it will retry for up to 30 seconds in total (counting from the
/// end of the first attempt). This can be changed with
/// [`ExponentialBackoff::with_max_retry_time()`].
///
/// Currently, the implementation uses a start pause of 1 second, a factor of
/// 2, and a random jitter factor of `(0.8..=1.2)`.
/// This is an implementation detail and might change in the future.
///
/// The policy returns [`RetryError::DriverError`] if the work function
/// returns a non-retryable error, and [`RetryError::Timeout`] when another
/// attempt would start past the maximum retry time.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_retry_time: Duration,
    factor: f64,
    jitter: f64,
}

/// Error type returned by [`RetryPolicy::execute()`] to distinguish
/// non-retryable work errors from an exhausted retry budget.
#[derive(Error, Debug)]
pub enum RetryError {
    /// The work failed with a non-retryable driver error.
    #[error("non-retryable error occurred: {0}")]
    DriverError(#[from] DriverError),
    /// A timeout occurred while retrying.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

/// Used to indicate that a retry loop timed out.
///
/// All errors encountered during the retry loop are collected and can be
/// accessed through [`TimeoutError::errors`].
///
/// See also [`RetryError::Timeout`].
#[derive(Error, Debug)]
#[error("timeout occurred while retrying; last error: {}", .errors.last().unwrap())]
pub struct TimeoutError {
    /// Errors encountered during the retry loop.
    pub errors: Vec<DriverError>,
}

impl From<TimeoutError> for Vec<DriverError> {
    fn from(value: TimeoutError) -> Self {
        value.errors
    }
}

impl ExponentialBackoff {
    /// Create a new exponential backoff policy with default settings.
    ///
    /// Same as [`ExponentialBackoff::default()`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Change for how long the policy will retry, before giving up.
    #[inline]
    pub fn with_max_retry_time(self, max_retry_time: Duration) -> Self {
        Self {
            max_retry_time,
            ..self
        }
    }

    fn max_retries(&self) -> usize {
        /*
        1 * 0.8
        + 1 * 2 * 0.8
        + 1 * 2 * 2 * 0.8
        + ...
        = 1 * 0.8 * (2^0 + 2^1 + 2^2 + ... + 2^x)
        = 1 * 0.8 * (2^(x+1) - 1)

        init * min_jitter * (factor ^ (x + 1) - 1) <= max_retry_time

        <=> x <= log factor (max_retry_time / (init * min_jitter) + 1) - 1
         */
        assert!(self.initial_delay > Duration::ZERO);
        assert!(self.max_retry_time > Duration::ZERO);
        let max_time = self.max_retry_time.as_secs_f64();
        let init = self.initial_delay.as_secs_f64();
        let min_jitter = self.factor * self.jitter;
        ((1.0 + max_time / (init * min_jitter)).log(self.factor) - 1.0).ceil() as usize
    }
}

impl Default for ExponentialBackoff {
    #[inline]
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_retry_time: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy for &ExponentialBackoff {
    type Error = RetryError;

    fn execute<R>(&self, mut work: impl FnMut() -> Result<R>) -> StdResult<R, Self::Error> {
        assert!(self.jitter >= 0.0);
        assert!(self.jitter < 1.0);
        let mut time_start = None;
        let mut errors: Option<Vec<DriverError>> = None;
        let mut current_delay = self.initial_delay.as_secs_f64();
        let mut rng = rand::rng();
        loop {
            let res = work();
            if time_start.is_none() {
                time_start = Some(Instant::now());
            }
            let err = match res {
                Err(e) if e.is_retryable() => e,
                _ => return res.map_err(Into::into),
            };
            if errors.is_none() {
                errors = Some(Vec::with_capacity(self.max_retries()));
            }
            errors.as_mut().unwrap().push(err);
            let time_elapsed = time_start.unwrap().elapsed();
            if time_elapsed > self.max_retry_time {
                return Err(TimeoutError {
                    errors: errors.unwrap(),
                }
                .into());
            }
            let jitter_factor = 1.0 + rng.random_range(-self.jitter..=self.jitter);
            let jittered_delay = current_delay * jitter_factor;
            warn!(
                "transaction failed and will be retried in {:.4} seconds: {}",
                jittered_delay,
                errors.as_ref().unwrap().last().unwrap()
            );
            sleep(Duration::try_from_secs_f64(jittered_delay).unwrap_or(Duration::MAX));
            current_delay *= self.factor;
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    type Error = <&'static ExponentialBackoff as RetryPolicy>::Error;

    fn execute<R>(&self, work: impl FnMut() -> Result<R>) -> StdResult<R, Self::Error> {
        (&self).execute(work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_::ServerError;

    fn retryable_error() -> DriverError {
        DriverError::ServerError {
            error: ServerError::new(
                "Neo.TransientError.Transaction.DeadlockDetected".into(),
                "deadlock".into(),
            ),
        }
    }

    fn non_retryable_error() -> DriverError {
        DriverError::ServerError {
            error: ServerError::new(
                "Neo.ClientError.Statement.SyntaxError".into(),
                "syntax".into(),
            ),
        }
    }

    #[test]
    fn test_returns_result_without_retry_on_success() {
        let policy = ExponentialBackoff::new();
        let mut calls = 0;
        let res: StdResult<i32, _> = policy.execute(|| {
            calls += 1;
            Ok(42)
        });
        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_does_not_retry_non_retryable_errors() {
        let policy = ExponentialBackoff::new();
        let mut calls = 0;
        let res: StdResult<(), _> = policy.execute(|| {
            calls += 1;
            Err(non_retryable_error())
        });
        assert!(matches!(res, Err(RetryError::DriverError(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retries_transient_errors_until_budget_exceeded() {
        let policy = ExponentialBackoff {
            initial_delay: Duration::from_millis(1),
            max_retry_time: Duration::from_millis(5),
            factor: 2.0,
            jitter: 0.2,
        };
        let mut calls = 0;
        let res: StdResult<(), _> = policy.execute(|| {
            calls += 1;
            sleep(Duration::from_millis(2));
            Err(retryable_error())
        });
        let Err(RetryError::Timeout(timeout)) = res else {
            panic!("expected timeout, got {res:?}");
        };
        assert_eq!(timeout.errors.len(), calls);
        assert!(calls > 1);
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let policy = ExponentialBackoff {
            initial_delay: Duration::from_millis(1),
            max_retry_time: Duration::from_secs(60),
            factor: 2.0,
            jitter: 0.2,
        };
        let mut calls = 0;
        let res: StdResult<i32, _> = policy.execute(|| {
            calls += 1;
            if calls < 3 {
                Err(retryable_error())
            } else {
                Ok(7)
            }
        });
        assert_eq!(res.unwrap(), 7);
        assert_eq!(calls, 3);
    }
}
