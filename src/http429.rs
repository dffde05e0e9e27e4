//! `429 Too Many Requests` policy.
//!
//! Reacts only to a delivered response whose status is 429. The wait comes from the
//! `Retry-After` header, read first as delay-seconds (`Retry-After: 120`) and otherwise as an
//! HTTP date (`Retry-After: Wed, 21 Oct 2015 07:28:00 GMT`), in which case the delay is the time
//! from the policy's clock to that date. A missing or unparsable header, or a date that is not in
//! the future, stops the chain, as does every other status and every transport failure.
//!
//! ```rust
//! use secondwind::{CallOutcome, Decision, Http429Policy, Outcome, RetryPolicy};
//! use std::time::Duration;
//!
//! let response = http::Response::builder()
//!     .status(429)
//!     .header("Retry-After", "100")
//!     .body(())
//!     .unwrap();
//! let outcome: CallOutcome<_, std::io::Error> = Outcome::Success(response);
//! let decision = Http429Policy::new().decide(&(), &outcome, 1, 10);
//! assert_eq!(decision, Decision::Retry(Duration::from_secs(100)));
//! ```

use crate::call::CallOutcome;
use crate::clock::{Clock, SystemClock};
use crate::outcome::Outcome;
use crate::policy::{Decision, RetryPolicy};
use http::header::RETRY_AFTER;
use http::StatusCode;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Status this policy reacts to.
pub const TOO_MANY_REQUESTS: StatusCode = StatusCode::TOO_MANY_REQUESTS;

/// Honours `Retry-After` on `429 Too Many Requests` responses.
#[derive(Debug, Clone)]
pub struct Http429Policy {
    clock: Arc<dyn Clock>,
}

impl Http429Policy {
    /// Policy evaluating HTTP dates against the system clock.
    pub fn new() -> Self {
        Self { clock: Arc::new(SystemClock) }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Delay requested by `response`, or `None` when it does not ask for a retry.
    pub fn retry_delay<B>(&self, response: &http::Response<B>) -> Option<Duration> {
        if response.status() != TOO_MANY_REQUESTS {
            return None;
        }
        let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
        parse_retry_after(value, self.clock.now())
    }
}

impl Default for Http429Policy {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, B, E> RetryPolicy<Req, http::Response<B>, E> for Http429Policy {
    fn decide(
        &self,
        _request: &Req,
        outcome: &CallOutcome<http::Response<B>, E>,
        _attempt: usize,
        _max_attempts: usize,
    ) -> Decision {
        match outcome {
            Outcome::Success(response) => self.retry_delay(response).into(),
            Outcome::Failure(_) => Decision::Stop,
        }
    }
}

/// Parse a `Retry-After` value relative to `now`.
///
/// Integer seconds win over dates. Dates at or before `now` yield `None`.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(now).ok().filter(|delay| !delay.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::CallError;
    use std::io;

    const NOW_SECS: u64 = 1_700_000_000;

    fn policy() -> Http429Policy {
        Http429Policy::new().with_clock(FixedClock::from_unix_secs(NOW_SECS))
    }

    type HttpOutcome = CallOutcome<http::Response<()>, io::Error>;

    fn response(status: u16, retry_after: Option<&str>) -> HttpOutcome {
        let mut builder = http::Response::builder().status(status);
        if let Some(value) = retry_after {
            builder = builder.header(RETRY_AFTER, value);
        }
        Outcome::Success(builder.body(()).unwrap())
    }

    fn decide(outcome: &HttpOutcome) -> Decision {
        policy().decide(&"GET /limited", outcome, 3, 10)
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(
            decide(&response(429, Some("100"))),
            Decision::Retry(Duration::from_millis(100_000))
        );
    }

    #[test]
    fn retry_after_http_date() {
        let date = httpdate::fmt_http_date(FixedClock::from_unix_secs(NOW_SECS + 100).now());
        assert_eq!(
            decide(&response(429, Some(&date))),
            Decision::Retry(Duration::from_millis(100_000))
        );
    }

    #[test]
    fn missing_header_stops() {
        assert_eq!(decide(&response(429, None)), Decision::Stop);
    }

    #[test]
    fn garbage_and_past_dates_stop() {
        assert_eq!(decide(&response(429, Some("soon"))), Decision::Stop);
        assert_eq!(decide(&response(429, Some("-5"))), Decision::Stop);
        let past = httpdate::fmt_http_date(FixedClock::from_unix_secs(NOW_SECS - 1).now());
        assert_eq!(decide(&response(429, Some(&past))), Decision::Stop);
        let now = httpdate::fmt_http_date(FixedClock::from_unix_secs(NOW_SECS).now());
        assert_eq!(decide(&response(429, Some(&now))), Decision::Stop);
    }

    #[test]
    fn other_statuses_and_failures_stop() {
        assert_eq!(decide(&response(503, Some("10"))), Decision::Stop);
        assert_eq!(decide(&response(200, Some("10"))), Decision::Stop);
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let failed: HttpOutcome = Outcome::Failure(CallError::Transport(reset));
        assert_eq!(decide(&failed), Decision::Stop);
    }

    #[test]
    fn zero_seconds_means_retry_now() {
        assert_eq!(decide(&response(429, Some(" 0 "))), Decision::Retry(Duration::ZERO));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let resp = http::Response::builder()
            .status(429)
            .header("retry-after", "7")
            .body(())
            .unwrap();
        assert_eq!(policy().retry_delay(&resp), Some(Duration::from_secs(7)));
    }
}
