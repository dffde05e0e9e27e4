#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # secondwind
//!
//! A retry decorator for asynchronous request/response calls.
//!
//! Wrap any [`Call`] in a [`RetryingCall`] and every completed attempt is judged by a pluggable
//! [`RetryPolicy`]: stop and deliver the outcome, or wait and issue a *fresh clone* of the call.
//! Retries never resume a transport handle that already consumed a connection or part of a
//! body.
//!
//! ## Features
//!
//! - **Single-pending-timer discipline**: one [`DelayScheduler`] slot per chain, last writer wins
//! - **Race-free cancellation**: a cancelled chain never starts another attempt and always
//!   reports [`CallError::Canceled`]
//! - **Pure, composable policies**: [`Http429Policy`], [`FixedDelay`], [`BackoffPolicy`],
//!   [`NeverRetry`], [`policy_fn`], [`OrElse`]
//! - **Transparent decoration**: [`RetryingCall`] implements [`Call`]; [`RetryCallLayer`] is a
//!   `tower_layer::Layer`
//! - **Telemetry** via [`telemetry::TelemetrySink`] and structured `tracing` logs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use secondwind::{Call, Http429Policy, RetryingCall, TokioScheduler};
//! use std::sync::Arc;
//!
//! # async fn run<C>(call: C)
//! # where C: Call<Response = http::Response<String>, Error = std::io::Error>
//! # {
//! let retrying = RetryingCall::builder(call)
//!     .max_attempts(5)
//!     .policy(Http429Policy::new())
//!     .scheduler(Arc::new(TokioScheduler::new(tokio::runtime::Handle::current())))
//!     .build()
//!     .expect("valid retry configuration");
//!
//! match retrying.execute().await {
//!     Ok(response) => println!("status {}", response.status()),
//!     Err(err) => eprintln!("gave up: {err}"),
//! }
//! # }
//! ```

pub mod backoff;
pub mod call;
pub mod clock;
pub mod config;
pub mod error;
pub mod http429;
pub mod layer;
pub mod outcome;
pub mod policy;
pub mod prelude;
pub mod retrying_call;
pub mod scheduler;
pub mod telemetry;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use call::{Call, CallOutcome, Callback};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{PolicyConfig, RetryConfig};
pub use error::{BuildError, CallError};
pub use http429::{parse_retry_after, Http429Policy};
pub use layer::RetryCallLayer;
pub use outcome::Outcome;
pub use policy::{
    policy_fn, BackoffPolicy, Decision, FixedDelay, NeverRetry, OrElse, PolicyFn, RetryPolicy,
};
pub use retrying_call::{RetryParams, RetryingCall, RetryingCallBuilder, DEFAULT_MAX_ATTEMPTS};
pub use scheduler::{DelayScheduler, ManualScheduler, ScheduledTask, TokioScheduler};
