//! Retry lifecycle events and the sinks that consume them.
//!
//! A [`RetryingCall`](crate::RetryingCall) emits one [`RetryEvent`] for every decision it
//! takes: a scheduled retry, a policy stop, an exhausted attempt budget, a cancellation, or a
//! policy that panicked. Events are delivered synchronously to a [`TelemetrySink`] from whatever
//! thread made the decision, so sinks must be cheap and must not block.
//!
//! ```rust
//! use secondwind::telemetry::{MemorySink, RetryEvent, TelemetrySink};
//! use std::time::Duration;
//!
//! let sink = MemorySink::new();
//! sink.emit(&RetryEvent::Retrying { attempt: 1, delay: Duration::from_millis(100) });
//! assert_eq!(sink.len(), 1);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Events emitted by a retrying call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// A retry was scheduled.
    Retrying {
        /// 1-based retry number
        attempt: usize,
        /// Delay before the retry starts
        delay: Duration,
    },
    /// The policy declined to retry; the outcome goes to the caller.
    Stopped {
        /// Attempts that reached the transport
        attempts: usize,
    },
    /// The retry budget ran out; the last outcome goes to the caller.
    Exhausted {
        /// Attempts that reached the transport
        attempts: usize,
    },
    /// The caller cancelled the chain.
    Canceled {
        /// Attempts that reached the transport
        attempts: usize,
    },
    /// The policy panicked while deciding; treated as a stop.
    PolicyPanicked {
        /// Retry number the policy was asked about
        attempt: usize,
    },
}

impl RetryEvent {
    /// Whether this event ends the chain.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RetryEvent::Retrying { .. })
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Retrying { attempt, delay } => {
                write!(f, "Retrying(#{}, delay={:?})", attempt, delay)
            }
            RetryEvent::Stopped { attempts } => write!(f, "Stopped(attempts={})", attempts),
            RetryEvent::Exhausted { attempts } => write!(f, "Exhausted(attempts={})", attempts),
            RetryEvent::Canceled { attempts } => write!(f, "Canceled(attempts={})", attempts),
            RetryEvent::PolicyPanicked { attempt } => write!(f, "PolicyPanicked(#{})", attempt),
        }
    }
}

/// Consumes retry events.
///
/// # Implementing a Custom Sink
///
/// ```rust
/// use secondwind::telemetry::{RetryEvent, TelemetrySink};
///
/// #[derive(Debug)]
/// struct PrintSink;
///
/// impl TelemetrySink for PrintSink {
///     fn emit(&self, event: &RetryEvent) {
///         println!("retry event: {}", event);
///     }
/// }
/// ```
pub trait TelemetrySink: Send + Sync + fmt::Debug {
    fn emit(&self, event: &RetryEvent);
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for Arc<S> {
    fn emit(&self, event: &RetryEvent) {
        (**self).emit(event)
    }
}

/// Discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _event: &RetryEvent) {}
}

/// Logs events using the `tracing` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn emit(&self, event: &RetryEvent) {
        match event {
            RetryEvent::PolicyPanicked { .. } => tracing::warn!(event = %event, "retry_event"),
            _ => tracing::info!(event = %event, "retry_event"),
        }
    }
}

/// Stores events in memory, evicting the oldest once `capacity` is reached.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<RetryEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RetryEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<RetryEvent> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&self, event: &RetryEvent) {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(*event);
    }
}

/// Sends every event to both sinks, `a` first.
#[derive(Clone, Debug)]
pub struct MulticastSink<A, B> {
    a: A,
    b: B,
}

impl<A, B> MulticastSink<A, B> {
    pub fn new(a: A, b: B) -> Self {
        Self { a, b }
    }
}

impl<A: TelemetrySink, B: TelemetrySink> TelemetrySink for MulticastSink<A, B> {
    fn emit(&self, event: &RetryEvent) {
        self.a.emit(event);
        self.b.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retrying(attempt: usize) -> RetryEvent {
        RetryEvent::Retrying { attempt, delay: Duration::from_millis(100) }
    }

    #[test]
    fn null_sink_accepts_everything() {
        NullSink.emit(&retrying(1));
        NullSink.emit(&RetryEvent::Canceled { attempts: 2 });
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.emit(&retrying(1));
        sink.emit(&RetryEvent::Stopped { attempts: 2 });
        assert_eq!(sink.events(), vec![retrying(1), RetryEvent::Stopped { attempts: 2 }]);
        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn memory_sink_evicts_oldest() {
        let sink = MemorySink::with_capacity(2);
        for attempt in 1..=3 {
            sink.emit(&retrying(attempt));
        }
        assert_eq!(sink.events(), vec![retrying(2), retrying(3)]);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(MemorySink::with_capacity(0).capacity(), 1);
    }

    #[test]
    fn multicast_reaches_both_sinks() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let sink = MulticastSink::new(a.clone(), b.clone());
        sink.emit(&RetryEvent::Exhausted { attempts: 6 });
        assert_eq!(a.len(), 1);
        assert_eq!(b.events(), vec![RetryEvent::Exhausted { attempts: 6 }]);
    }

    #[test]
    fn display_and_terminal() {
        assert_eq!(retrying(3).to_string(), "Retrying(#3, delay=100ms)");
        assert_eq!(RetryEvent::Exhausted { attempts: 6 }.to_string(), "Exhausted(attempts=6)");
        assert!(!retrying(1).is_terminal());
        assert!(RetryEvent::PolicyPanicked { attempt: 1 }.is_terminal());
    }

    #[test]
    fn log_sink_does_not_panic_without_subscriber() {
        LogSink.emit(&retrying(1));
        LogSink.emit(&RetryEvent::PolicyPanicked { attempt: 2 });
    }
}
