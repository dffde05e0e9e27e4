//! Scripted in-process transport used by the integration tests.
#![allow(dead_code)]

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt};
use secondwind::{Call, CallError, Callback, Outcome};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub type Response = http::Response<String>;

#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: &'static str,
    pub path: String,
}

#[derive(Debug, Clone)]
enum Reply {
    Respond { status: u16, headers: Vec<(&'static str, String)> },
    Fail { kind: io::ErrorKind, message: String },
}

#[derive(Debug, Default)]
struct ServerState {
    /// Replies in order; the last one repeats once the script runs out.
    script: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Reply>>,
    requests: AtomicUsize,
    arrivals: Mutex<Vec<Instant>>,
    latency: Mutex<Duration>,
}

/// Fake HTTP server answering from a script.
#[derive(Debug, Clone, Default)]
pub struct MockServer {
    state: Arc<ServerState>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, reply: Reply) -> &Self {
        self.state.script.lock().unwrap().push_back(reply);
        self
    }

    pub fn respond(&self, status: u16) -> &Self {
        self.push(Reply::Respond { status, headers: Vec::new() })
    }

    pub fn respond_with_header(&self, status: u16, name: &'static str, value: &str) -> &Self {
        self.push(Reply::Respond { status, headers: vec![(name, value.to_string())] })
    }

    pub fn fail(&self, message: &str) -> &Self {
        self.push(Reply::Fail {
            kind: io::ErrorKind::ConnectionRefused,
            message: message.to_string(),
        })
    }

    pub fn set_latency(&self, latency: Duration) -> &Self {
        *self.state.latency.lock().unwrap() = latency;
        self
    }

    /// Requests that reached the server.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Arrival time of each request.
    pub fn arrivals(&self) -> Vec<Instant> {
        self.state.arrivals.lock().unwrap().clone()
    }

    pub fn call(&self, path: &str) -> MockCall {
        MockCall::new(self.clone(), MockRequest { method: "GET", path: path.to_string() })
    }

    fn accept(&self) -> (Reply, Duration) {
        self.state.requests.fetch_add(1, Ordering::SeqCst);
        self.state.arrivals.lock().unwrap().push(Instant::now());
        let next = self.state.script.lock().unwrap().pop_front();
        let reply = match next {
            Some(reply) => {
                *self.state.last.lock().unwrap() = Some(reply.clone());
                reply
            }
            None => self.state.last.lock().unwrap().clone().expect("server has no script"),
        };
        (reply, *self.state.latency.lock().unwrap())
    }
}

fn build(reply: Reply) -> Result<Response, io::Error> {
    match reply {
        Reply::Respond { status, headers } => {
            let mut builder = http::Response::builder().status(status);
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
            Ok(builder.body(format!("status {status}")).unwrap())
        }
        Reply::Fail { kind, message } => Err(io::Error::new(kind, message)),
    }
}

/// Single-use call against a [`MockServer`], completed on a tokio task.
#[derive(Debug)]
pub struct MockCall {
    server: MockServer,
    request: MockRequest,
    canceled: Arc<AtomicBool>,
    cancel_signal: Arc<Notify>,
    executed: AtomicBool,
}

impl MockCall {
    fn new(server: MockServer, request: MockRequest) -> Self {
        Self {
            server,
            request,
            canceled: Arc::new(AtomicBool::new(false)),
            cancel_signal: Arc::new(Notify::new()),
            executed: AtomicBool::new(false),
        }
    }
}

impl Call for MockCall {
    type Request = MockRequest;
    type Response = Response;
    type Error = io::Error;

    fn request(&self) -> &MockRequest {
        &self.request
    }

    fn execute(&self) -> BoxFuture<'static, Result<Response, CallError<io::Error>>> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Box::new(move |outcome| {
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

    fn enqueue(&self, callback: Callback<Response, io::Error>) {
        if self.executed.swap(true, Ordering::SeqCst) {
            return callback(Outcome::Failure(CallError::AlreadyExecuted));
        }
        if self.canceled.load(Ordering::SeqCst) {
            return callback(Outcome::Failure(CallError::Canceled));
        }
        let (reply, latency) = self.server.accept();
        let canceled = self.canceled.clone();
        let cancel_signal = self.cancel_signal.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = cancel_signal.notified() => {}
            }
            if canceled.load(Ordering::SeqCst) {
                callback(Outcome::Failure(CallError::Canceled));
            } else {
                callback(build(reply).map_err(CallError::Transport).into());
            }
        });
    }

    fn cancel(&self) {
        if !self.canceled.swap(true, Ordering::SeqCst) {
            self.cancel_signal.notify_one();
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn is_executed(&self) -> bool {
        self.executed.load(Ordering::SeqCst)
    }

    fn clone_call(&self) -> Self {
        MockCall::new(self.server.clone(), self.request.clone())
    }
}

/// Wait (in virtual time) until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
