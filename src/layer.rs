//! Decorating calls with a `tower_layer::Layer`.
//!
//! A [`RetryCallLayer`] carries shared [`RetryParams`] and a scheduler prototype. Each call it
//! wraps gets its own chain with a fresh scheduler (via [`DelayScheduler::fresh`]), so calls
//! decorated by the same layer never share pending delays.
//!
//! ```rust
//! use secondwind::{Http429Policy, ManualScheduler, RetryCallLayer, RetryParams};
//! use std::sync::Arc;
//!
//! let params: RetryParams<String, http::Response<String>, std::io::Error> =
//!     RetryParams::new(10, Http429Policy::new()).unwrap();
//! let layer = RetryCallLayer::new(params, Arc::new(ManualScheduler::new()));
//! assert_eq!(layer.params().max_attempts(), 10);
//! ```

use crate::call::Call;
use crate::retrying_call::{RetryParams, RetryingCall};
use crate::scheduler::DelayScheduler;
use crate::telemetry::{NullSink, TelemetrySink};
use std::fmt;
use std::sync::Arc;
use tower_layer::Layer;

/// Wraps calls in [`RetryingCall`].
pub struct RetryCallLayer<Req, Resp, E> {
    params: RetryParams<Req, Resp, E>,
    scheduler: Arc<dyn DelayScheduler>,
    sink: Arc<dyn TelemetrySink>,
}

impl<Req, Resp, E> RetryCallLayer<Req, Resp, E> {
    pub fn new(params: RetryParams<Req, Resp, E>, scheduler: Arc<dyn DelayScheduler>) -> Self {
        Self { params, scheduler, sink: Arc::new(NullSink) }
    }

    /// Report retry events of every decorated call to `sink`.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink + 'static,
    {
        self.sink = Arc::new(sink);
        self
    }

    pub fn params(&self) -> &RetryParams<Req, Resp, E> {
        &self.params
    }
}

impl<Req, Resp, E> Clone for RetryCallLayer<Req, Resp, E> {
    fn clone(&self) -> Self {
        Self {
            params: self.params.clone(),
            scheduler: Arc::clone(&self.scheduler),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<Req, Resp, E> fmt::Debug for RetryCallLayer<Req, Resp, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryCallLayer")
            .field("params", &self.params)
            .field("scheduler", &self.scheduler)
            .field("sink", &self.sink)
            .finish()
    }
}

impl<C: Call> Layer<C> for RetryCallLayer<C::Request, C::Response, C::Error> {
    type Service = RetryingCall<C>;

    fn layer(&self, call: C) -> Self::Service {
        RetryingCall::with_sink(
            call,
            self.params.clone(),
            self.scheduler.fresh(),
            Arc::clone(&self.sink),
        )
    }
}
