//! The retry orchestrator.
//!
//! [`RetryingCall`] decorates any [`Call`]. Every completed attempt is handed to a
//! [`RetryPolicy`]; a `Retry(delay)` decision schedules a *clone* of the underlying call on the
//! [`DelayScheduler`], a `Stop` decision (or an exhausted budget) delivers the outcome to the
//! caller. Because the decorator implements [`Call`] itself, it is a drop-in substitute for the
//! call it wraps.
//!
//! Per chain, at any instant, at most one of {an underlying attempt in flight, a delay pending}
//! holds. Cancelling the chain aborts whichever it is; the caller then always observes
//! [`CallError::Canceled`], even when a completion for the cancelled attempt races the cancel.
//!
//! ```rust
//! # async fn demo<C>(call: C) -> Result<(), secondwind::BuildError>
//! # where C: secondwind::Call<Response = http::Response<String>>
//! # {
//! use secondwind::{Call, Http429Policy, RetryingCall, TokioScheduler};
//! use std::sync::Arc;
//!
//! let call = RetryingCall::builder(call)
//!     .max_attempts(5)
//!     .policy(Http429Policy::new())
//!     .scheduler(Arc::new(TokioScheduler::new(tokio::runtime::Handle::current())))
//!     .build()?;
//! let result = call.execute().await;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

use crate::call::{Call, CallOutcome, Callback};
use crate::error::{BuildError, CallError};
use crate::outcome::Outcome;
use crate::policy::{Decision, RetryPolicy};
use crate::scheduler::DelayScheduler;
use crate::telemetry::{NullSink, RetryEvent, TelemetrySink};
use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Retry budget used when none is configured.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Immutable retry configuration shared by every attempt of a chain.
///
/// `max_attempts` is the number of retries allowed after the initial call; it must be > 0.
pub struct RetryParams<Req, Resp, E> {
    max_attempts: usize,
    policy: Arc<dyn RetryPolicy<Req, Resp, E>>,
}

impl<Req, Resp, E> RetryParams<Req, Resp, E> {
    pub fn new<P>(max_attempts: usize, policy: P) -> Result<Self, BuildError>
    where
        P: RetryPolicy<Req, Resp, E> + 'static,
    {
        Self::from_shared(max_attempts, Arc::new(policy))
    }

    /// Like [`RetryParams::new`] for a policy that is already shared.
    pub fn from_shared(
        max_attempts: usize,
        policy: Arc<dyn RetryPolicy<Req, Resp, E>>,
    ) -> Result<Self, BuildError> {
        if max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        Ok(Self { max_attempts, policy })
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn policy(&self) -> &Arc<dyn RetryPolicy<Req, Resp, E>> {
        &self.policy
    }
}

impl<Req, Resp, E> Clone for RetryParams<Req, Resp, E> {
    fn clone(&self) -> Self {
        Self { max_attempts: self.max_attempts, policy: Arc::clone(&self.policy) }
    }
}

impl<Req, Resp, E> fmt::Debug for RetryParams<Req, Resp, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryParams")
            .field("max_attempts", &self.max_attempts)
            .field("policy", &self.policy)
            .finish()
    }
}

type ParamsOf<C> = RetryParams<<C as Call>::Request, <C as Call>::Response, <C as Call>::Error>;

/// State of one logical request chain.
struct Chain<C: Call> {
    params: ParamsOf<C>,
    scheduler: Arc<dyn DelayScheduler>,
    sink: Arc<dyn TelemetrySink>,
    request: C::Request,
    /// Underlying call of the current (or most recent) attempt.
    current: Mutex<Arc<C>>,
    /// Retries accepted so far; never exceeds `params.max_attempts`.
    retries: AtomicUsize,
    /// Attempts handed to the transport.
    started: AtomicUsize,
    canceled: AtomicBool,
    executed: AtomicBool,
    /// Caller's completion handler; taken exactly once.
    callback: Mutex<Option<Callback<C::Response, C::Error>>>,
}

impl<C: Call> Chain<C> {
    fn new(
        call: C,
        params: ParamsOf<C>,
        scheduler: Arc<dyn DelayScheduler>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            params,
            scheduler,
            sink,
            request: call.request().clone(),
            current: Mutex::new(Arc::new(call)),
            retries: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            canceled: AtomicBool::new(false),
            executed: AtomicBool::new(false),
            callback: Mutex::new(None),
        }
    }

    fn start(self: &Arc<Self>, callback: Callback<C::Response, C::Error>) {
        if self.executed.swap(true, Ordering::SeqCst) {
            callback(Outcome::Failure(CallError::AlreadyExecuted));
            return;
        }
        *lock(&self.callback) = Some(callback);
        if self.canceled.load(Ordering::SeqCst) {
            self.finish(Outcome::Failure(CallError::Canceled));
            return;
        }
        let call = Arc::clone(&*lock(&self.current));
        self.started.fetch_add(1, Ordering::SeqCst);
        call.enqueue(self.handler());
    }

    fn handler(self: &Arc<Self>) -> Callback<C::Response, C::Error> {
        let chain = Arc::clone(self);
        Box::new(move |outcome| chain.on_complete(outcome))
    }

    fn on_complete(self: &Arc<Self>, outcome: CallOutcome<C::Response, C::Error>) {
        if self.canceled.load(Ordering::SeqCst) {
            tracing::debug!("attempt completed after cancellation");
            self.finish(Outcome::Failure(CallError::Canceled));
            return;
        }

        let retries = self.retries.load(Ordering::SeqCst);
        let max_attempts = self.params.max_attempts;
        let attempts = self.started.load(Ordering::SeqCst);
        if outcome.is_failure() {
            tracing::debug!(attempt = attempts, "attempt failed");
        }
        // At the ceiling the policy only classifies the outcome; nothing is scheduled.
        let attempt = retries.saturating_add(1);
        let decided = panic::catch_unwind(AssertUnwindSafe(|| {
            self.params.policy.decide(&self.request, &outcome, attempt, max_attempts)
        }));
        let delay = match decided {
            Ok(Decision::Retry(_)) if retries >= max_attempts => {
                tracing::info!(attempts, max_attempts, "no retries left");
                self.sink.emit(&RetryEvent::Exhausted { attempts });
                self.finish(outcome);
                return;
            }
            Ok(Decision::Retry(delay)) => delay,
            Ok(Decision::Stop) => {
                tracing::debug!(attempts, "policy declined to retry");
                self.sink.emit(&RetryEvent::Stopped { attempts });
                self.finish(outcome);
                return;
            }
            Err(_) => {
                tracing::warn!(attempt, "retry policy panicked; not retrying");
                self.sink.emit(&RetryEvent::PolicyPanicked { attempt });
                self.finish(outcome);
                return;
            }
        };

        self.retries.store(attempt, Ordering::SeqCst);
        tracing::info!(
            attempt,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retrying"
        );
        self.sink.emit(&RetryEvent::Retrying { attempt, delay });
        let chain = Arc::clone(self);
        self.scheduler.schedule(delay, Box::new(move || chain.retry()));

        // A cancel that landed between the check above and `schedule` saw no pending delay.
        if self.canceled.load(Ordering::SeqCst) {
            self.scheduler.cancel();
            self.finish(Outcome::Failure(CallError::Canceled));
        }
    }

    fn retry(self: &Arc<Self>) {
        let next = {
            let mut current = lock(&self.current);
            if self.canceled.load(Ordering::SeqCst) {
                drop(current);
                self.finish(Outcome::Failure(CallError::Canceled));
                return;
            }
            let next = Arc::new(current.clone_call());
            *current = Arc::clone(&next);
            next
        };
        self.started.fetch_add(1, Ordering::SeqCst);
        next.enqueue(self.handler());
    }

    fn cancel(&self) {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.scheduler.cancel() {
            tracing::debug!("cancelled pending retry delay");
        }
        let call = Arc::clone(&*lock(&self.current));
        call.cancel();
        self.sink.emit(&RetryEvent::Canceled { attempts: self.started.load(Ordering::SeqCst) });
        self.finish(Outcome::Failure(CallError::Canceled));
    }

    fn finish(&self, outcome: CallOutcome<C::Response, C::Error>) {
        let callback = lock(&self.callback).take();
        if let Some(callback) = callback {
            callback(outcome);
        }
    }
}

/// A [`Call`] that retries its underlying call according to a [`RetryPolicy`].
///
/// Cloning via [`Call::clone_call`] yields an independent chain: a clone of the underlying call,
/// the same [`RetryParams`], a fresh attempt counter and a fresh scheduler.
pub struct RetryingCall<C: Call> {
    chain: Arc<Chain<C>>,
}

impl<C: Call> RetryingCall<C> {
    /// Decorate `call` with events discarded.
    pub fn new(call: C, params: ParamsOf<C>, scheduler: Arc<dyn DelayScheduler>) -> Self {
        Self::with_sink(call, params, scheduler, Arc::new(NullSink))
    }

    /// Decorate `call`, reporting retry events to `sink`.
    pub fn with_sink(
        call: C,
        params: ParamsOf<C>,
        scheduler: Arc<dyn DelayScheduler>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self { chain: Arc::new(Chain::new(call, params, scheduler, sink)) }
    }

    pub fn builder(call: C) -> RetryingCallBuilder<C> {
        RetryingCallBuilder::new(call)
    }

    pub fn params(&self) -> &ParamsOf<C> {
        &self.chain.params
    }

    /// Retries accepted so far.
    pub fn retries(&self) -> usize {
        self.chain.retries.load(Ordering::SeqCst)
    }

    /// Attempts handed to the transport so far, including the initial one.
    pub fn attempts(&self) -> usize {
        self.chain.started.load(Ordering::SeqCst)
    }

    /// Whether a retry is waiting for its delay to elapse.
    pub fn is_delay_pending(&self) -> bool {
        self.chain.scheduler.is_pending()
    }
}

impl<C: Call> fmt::Debug for RetryingCall<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingCall")
            .field("params", &self.chain.params)
            .field("attempts", &self.attempts())
            .field("canceled", &self.chain.canceled.load(Ordering::SeqCst))
            .finish()
    }
}

impl<C: Call> Call for RetryingCall<C> {
    type Request = C::Request;
    type Response = C::Response;
    type Error = C::Error;

    fn request(&self) -> &Self::Request {
        &self.chain.request
    }

    fn execute(&self) -> BoxFuture<'static, Result<Self::Response, CallError<Self::Error>>> {
        let (tx, rx) = oneshot::channel();
        self.chain.start(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));
        async move {
            match rx.await {
                Ok(outcome) => outcome.into_result(),
                Err(_) => Err(CallError::Canceled),
            }
        }
        .boxed()
    }

    fn enqueue(&self, callback: Callback<Self::Response, Self::Error>) {
        self.chain.start(callback);
    }

    fn cancel(&self) {
        self.chain.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.chain.canceled.load(Ordering::SeqCst) || lock(&self.chain.current).is_canceled()
    }

    fn is_executed(&self) -> bool {
        self.chain.executed.load(Ordering::SeqCst)
    }

    fn clone_call(&self) -> Self {
        let call = lock(&self.chain.current).clone_call();
        Self::with_sink(
            call,
            self.chain.params.clone(),
            self.chain.scheduler.fresh(),
            Arc::clone(&self.chain.sink),
        )
    }
}

/// Builder for [`RetryingCall`].
pub struct RetryingCallBuilder<C: Call> {
    call: C,
    max_attempts: usize,
    policy: Option<Arc<dyn RetryPolicy<C::Request, C::Response, C::Error>>>,
    scheduler: Option<Arc<dyn DelayScheduler>>,
    sink: Arc<dyn TelemetrySink>,
}

impl<C: Call> RetryingCallBuilder<C> {
    pub fn new(call: C) -> Self {
        Self {
            call,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            policy: None,
            scheduler: None,
            sink: Arc::new(NullSink),
        }
    }

    /// Retries allowed after the initial call. Must be > 0.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn policy<P>(mut self, policy: P) -> Self
    where
        P: RetryPolicy<C::Request, C::Response, C::Error> + 'static,
    {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Take both the budget and the policy from existing params.
    pub fn params(mut self, params: ParamsOf<C>) -> Self {
        self.max_attempts = params.max_attempts;
        self.policy = Some(params.policy);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn DelayScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn sink<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink + 'static,
    {
        self.sink = Arc::new(sink);
        self
    }

    pub fn build(self) -> Result<RetryingCall<C>, BuildError> {
        let policy = self.policy.ok_or(BuildError::MissingPolicy)?;
        let params = RetryParams::from_shared(self.max_attempts, policy)?;
        let scheduler = self.scheduler.ok_or(BuildError::MissingScheduler)?;
        Ok(RetryingCall::with_sink(self.call, params, scheduler, self.sink))
    }
}
