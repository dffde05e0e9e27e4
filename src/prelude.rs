//! Convenient re-exports for common secondwind types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    call::{Call, CallOutcome, Callback},
    config::{PolicyConfig, RetryConfig},
    error::{BuildError, CallError},
    http429::Http429Policy,
    layer::RetryCallLayer,
    outcome::Outcome,
    policy::{policy_fn, BackoffPolicy, Decision, FixedDelay, NeverRetry, OrElse, RetryPolicy},
    retrying_call::{RetryParams, RetryingCall},
    scheduler::{DelayScheduler, ManualScheduler, TokioScheduler},
    telemetry::{LogSink, MemorySink, NullSink, RetryEvent, TelemetrySink},
};
