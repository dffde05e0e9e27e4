//! Backoff curves for delay-based retry policies.
//!
//! Attempt semantics match the retry policy contract: `attempt` is the 1-based number of the
//! retry being considered. `attempt = 0` names the initial call and never waits.
//!
//! ```rust
//! use std::time::Duration;
//! use secondwind::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(3), Duration::from_millis(400));
//! assert_eq!(backoff.delay(9), Duration::from_secs(1));
//! ```
//!
//! Computations that would overflow saturate to [`MAX_BACKOFF`].

use std::time::Duration;

/// Upper bound for any computed delay (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for Linear or Exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Curve {
    Constant,
    Linear,
    Exponential,
}

/// A delay curve: constant, linear, or exponential, optionally capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    curve: Curve,
    base: Duration,
    max: Option<Duration>,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { curve: Curve::Constant, base: delay, max: None }
    }

    /// `base * attempt`.
    pub fn linear(base: Duration) -> Self {
        Self { curve: Curve::Linear, base, max: None }
    }

    /// `base * 2^(attempt - 1)`.
    pub fn exponential(base: Duration) -> Self {
        Self { curve: Curve::Exponential, base, max: None }
    }

    /// Cap a growing curve. Rejected for constant curves, zero caps, and caps below `base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        if self.curve == Curve::Constant {
            return Err(BackoffError::ConstantDoesNotSupportMax);
        }
        if max < self.base {
            return Err(BackoffError::MaxLessThanBase { base: self.base, max });
        }
        self.max = Some(max);
        Ok(self)
    }

    /// The configured base delay.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// The configured cap, if any.
    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    /// Delay before retry number `attempt`.
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let uncapped = match self.curve {
            Curve::Constant => self.base,
            Curve::Linear => {
                let factor = attempt.min(u32::MAX as usize) as u32;
                self.base.checked_mul(factor).unwrap_or(MAX_BACKOFF)
            }
            Curve::Exponential => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let nanos = self.base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64)
            }
        };
        let capped = self.max.map_or(uncapped, |max| uncapped.min(max));
        capped.min(MAX_BACKOFF)
    }
}
