//! Retry policies.
//!
//! A [`RetryPolicy`] looks at the attempt that just completed and answers with a [`Decision`]:
//! wait this long and try again, or stop and surface the outcome. Policies are pure: the same
//! `(request, outcome, attempt, max_attempts)` always yields the same decision, and they hold no
//! per-request state. The orchestrator owns the attempt counter and enforces `max_attempts`
//! itself, so a policy only needs to look at the ceiling if it wants to stop earlier.
//!
//! Semantics:
//! - `attempt` is the 1-based number of the retry under consideration; if the policy returns
//!   [`Decision::Retry`], the next attempt to reach the transport is retry number `attempt`.
//! - `max_attempts` is the configured number of retries allowed after the initial call.
//! - A policy that panics is treated as [`Decision::Stop`] by the orchestrator.
//!
//! Built-in policies:
//! - [`Http429Policy`](crate::Http429Policy): honours `429 Too Many Requests` + `Retry-After`.
//! - [`FixedDelay`]: constant wait after transport failures.
//! - [`BackoffPolicy`]: [`Backoff`] curve after transport failures.
//! - [`NeverRetry`]: always stop.
//! - [`PolicyFn`]: adapt a closure.
//! - [`OrElse`]: consult a fallback when the primary policy stops.

use crate::backoff::Backoff;
use crate::call::CallOutcome;
use crate::error::CallError;
use crate::outcome::Outcome;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Start a fresh attempt after this delay. `Duration::ZERO` retries immediately.
    Retry(Duration),
    /// Do not retry; deliver the outcome to the caller.
    Stop,
}

impl Decision {
    /// Check if this decision stops the chain.
    pub fn is_stop(&self) -> bool {
        matches!(self, Decision::Stop)
    }

    /// The requested delay, if this is a retry.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Decision::Retry(delay) => Some(*delay),
            Decision::Stop => None,
        }
    }
}

impl From<Option<Duration>> for Decision {
    fn from(delay: Option<Duration>) -> Self {
        delay.map_or(Decision::Stop, Decision::Retry)
    }
}

/// Pure decision function consulted after every attempt.
///
/// `attempt` is the retry that would follow. Once `attempt > max_attempts` the decision only
/// classifies the outcome (exhausted or stopped); no retry is scheduled.
pub trait RetryPolicy<Req, Resp, E>: Send + Sync + fmt::Debug {
    fn decide(
        &self,
        request: &Req,
        outcome: &CallOutcome<Resp, E>,
        attempt: usize,
        max_attempts: usize,
    ) -> Decision;
}

impl<Req, Resp, E, P> RetryPolicy<Req, Resp, E> for Arc<P>
where
    P: RetryPolicy<Req, Resp, E> + ?Sized,
{
    fn decide(
        &self,
        request: &Req,
        outcome: &CallOutcome<Resp, E>,
        attempt: usize,
        max_attempts: usize,
    ) -> Decision {
        (**self).decide(request, outcome, attempt, max_attempts)
    }
}

impl<Req, Resp, E, P> RetryPolicy<Req, Resp, E> for Box<P>
where
    P: RetryPolicy<Req, Resp, E> + ?Sized,
{
    fn decide(
        &self,
        request: &Req,
        outcome: &CallOutcome<Resp, E>,
        attempt: usize,
        max_attempts: usize,
    ) -> Decision {
        (**self).decide(request, outcome, attempt, max_attempts)
    }
}

fn is_transport_failure<Resp, E>(outcome: &CallOutcome<Resp, E>) -> bool {
    matches!(outcome, Outcome::Failure(CallError::Transport(_)))
}

/// Never retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverRetry;

impl<Req, Resp, E> RetryPolicy<Req, Resp, E> for NeverRetry {
    fn decide(&self, _: &Req, _: &CallOutcome<Resp, E>, _: usize, _: usize) -> Decision {
        Decision::Stop
    }
}

/// Retries every transport failure after the same delay; responses always stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<Req, Resp, E> RetryPolicy<Req, Resp, E> for FixedDelay {
    fn decide(&self, _: &Req, outcome: &CallOutcome<Resp, E>, _: usize, _: usize) -> Decision {
        if is_transport_failure(outcome) {
            Decision::Retry(self.delay)
        } else {
            Decision::Stop
        }
    }
}

/// Retries transport failures, waiting `backoff.delay(attempt)` before each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    backoff: Backoff,
}

impl BackoffPolicy {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }
}

impl<Req, Resp, E> RetryPolicy<Req, Resp, E> for BackoffPolicy {
    fn decide(
        &self,
        _: &Req,
        outcome: &CallOutcome<Resp, E>,
        attempt: usize,
        _: usize,
    ) -> Decision {
        if is_transport_failure(outcome) {
            Decision::Retry(self.backoff.delay(attempt))
        } else {
            Decision::Stop
        }
    }
}

/// Closure-backed policy. See [`policy_fn`].
#[derive(Clone)]
pub struct PolicyFn<F> {
    f: F,
}

impl<F> fmt::Debug for PolicyFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyFn").field("f", &"<closure>").finish()
    }
}

/// Build a policy from a closure `(request, outcome, attempt, max_attempts) -> Decision`.
///
/// ```rust
/// use secondwind::{policy_fn, CallOutcome, Decision, Outcome};
/// use std::time::Duration;
///
/// // Retry 5xx responses twice, one second apart.
/// let policy = policy_fn(
///     |_req: &String, outcome: &CallOutcome<http::Response<()>, std::io::Error>, attempt, _max| {
///         match outcome {
///             Outcome::Success(resp) if resp.status().is_server_error() && attempt <= 2 => {
///                 Decision::Retry(Duration::from_secs(1))
///             }
///             _ => Decision::Stop,
///         }
///     },
/// );
/// # let _ = policy;
/// ```
pub fn policy_fn<Req, Resp, E, F>(f: F) -> PolicyFn<F>
where
    F: Fn(&Req, &CallOutcome<Resp, E>, usize, usize) -> Decision + Send + Sync,
{
    PolicyFn { f }
}

impl<Req, Resp, E, F> RetryPolicy<Req, Resp, E> for PolicyFn<F>
where
    F: Fn(&Req, &CallOutcome<Resp, E>, usize, usize) -> Decision + Send + Sync,
{
    fn decide(
        &self,
        request: &Req,
        outcome: &CallOutcome<Resp, E>,
        attempt: usize,
        max_attempts: usize,
    ) -> Decision {
        (self.f)(request, outcome, attempt, max_attempts)
    }
}

/// Consults `primary`; if it stops, consults `fallback`.
#[derive(Debug, Clone)]
pub struct OrElse<A, B> {
    primary: A,
    fallback: B,
}

impl<A, B> OrElse<A, B> {
    pub fn new(primary: A, fallback: B) -> Self {
        Self { primary, fallback }
    }
}

impl<Req, Resp, E, A, B> RetryPolicy<Req, Resp, E> for OrElse<A, B>
where
    A: RetryPolicy<Req, Resp, E>,
    B: RetryPolicy<Req, Resp, E>,
{
    fn decide(
        &self,
        request: &Req,
        outcome: &CallOutcome<Resp, E>,
        attempt: usize,
        max_attempts: usize,
    ) -> Decision {
        match self.primary.decide(request, outcome, attempt, max_attempts) {
            Decision::Stop => self.fallback.decide(request, outcome, attempt, max_attempts),
            retry => retry,
        }
    }
}
