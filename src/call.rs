//! The call contract shared by transports and the retry decorator.
//!
//! A [`Call`] is a single-use handle for one outbound request. It can be started once, either
//! by awaiting [`Call::execute`] or by handing a completion callback to [`Call::enqueue`]; a
//! second start reports [`CallError::AlreadyExecuted`]. [`Call::clone_call`] produces a fresh,
//! not-yet-started call for the same request, which is how retries avoid reusing a transport
//! handle that already consumed a connection or part of a body.
//!
//! [`RetryingCall`](crate::RetryingCall) implements the same trait, so it can stand in wherever
//! the underlying call type is expected.

use crate::error::CallError;
use crate::outcome::Outcome;
use futures::future::BoxFuture;

/// Outcome of one attempt as seen by callers and policies.
pub type CallOutcome<R, E> = Outcome<R, CallError<E>>;

/// Completion handler passed to [`Call::enqueue`]. Invoked exactly once.
pub type Callback<R, E> = Box<dyn FnOnce(CallOutcome<R, E>) + Send + 'static>;

/// A single-use, cancellable request/response call.
pub trait Call: Send + Sync + 'static {
    /// Immutable description of the outbound request.
    type Request: Clone + Send + Sync + 'static;
    /// Response delivered by the transport.
    type Response: Send + 'static;
    /// Transport error type.
    type Error: Send + 'static;

    /// The request this call sends.
    fn request(&self) -> &Self::Request;

    /// Start the call and resolve with its result.
    fn execute(&self) -> BoxFuture<'static, Result<Self::Response, CallError<Self::Error>>>;

    /// Start the call asynchronously; `callback` receives the outcome.
    fn enqueue(&self, callback: Callback<Self::Response, Self::Error>);

    /// Cancel the call. Idempotent; an in-flight attempt completes with
    /// [`CallError::Canceled`] on a best-effort basis.
    fn cancel(&self);

    /// Whether [`Call::cancel`] has been invoked.
    fn is_canceled(&self) -> bool;

    /// Whether the call has been started.
    fn is_executed(&self) -> bool;

    /// A new, independent, not-yet-started call for the same request.
    fn clone_call(&self) -> Self
    where
        Self: Sized;
}
