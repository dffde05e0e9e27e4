//! Retrying a rate-limited endpoint that answers `429` with `Retry-After`.
use futures::future::{BoxFuture, FutureExt};
use secondwind::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pretend endpoint: the first two hits are throttled.
#[derive(Clone, Default)]
struct Endpoint {
    hits: Arc<AtomicUsize>,
}

struct DemoCall {
    endpoint: Endpoint,
    path: String,
    canceled: AtomicBool,
    executed: AtomicBool,
}

impl DemoCall {
    fn new(endpoint: Endpoint, path: &str) -> Self {
        Self {
            endpoint,
            path: path.to_string(),
            canceled: AtomicBool::new(false),
            executed: AtomicBool::new(false),
        }
    }
}

impl Call for DemoCall {
    type Request = String;
    type Response = http::Response<String>;
    type Error = std::io::Error;

    fn request(&self) -> &String {
        &self.path
    }

    fn execute(&self) -> BoxFuture<'static, Result<Self::Response, CallError<Self::Error>>> {
        let (tx, rx) = futures::channel::oneshot::channel();
        self.enqueue(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));
        async move { rx.await.unwrap_or(Outcome::Failure(CallError::Canceled)).into_result() }
            .boxed()
    }

    fn enqueue(&self, callback: Callback<Self::Response, Self::Error>) {
        if self.executed.swap(true, Ordering::SeqCst) {
            return callback(Outcome::Failure(CallError::AlreadyExecuted));
        }
        if self.canceled.load(Ordering::SeqCst) {
            return callback(Outcome::Failure(CallError::Canceled));
        }
        let hit = self.endpoint.hits.fetch_add(1, Ordering::SeqCst) + 1;
        println!("GET {} (hit #{hit})", self.path);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let response = if hit <= 2 {
                http::Response::builder().status(429).header("Retry-After", "1").body(String::new())
            } else {
                http::Response::builder().status(200).body("fresh data".to_string())
            };
            match response {
                Ok(response) => callback(Outcome::Success(response)),
                Err(err) => callback(Outcome::Failure(CallError::Transport(
                    std::io::Error::new(std::io::ErrorKind::InvalidData, err),
                ))),
            }
        });
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn is_executed(&self) -> bool {
        self.executed.load(Ordering::SeqCst)
    }

    fn clone_call(&self) -> Self {
        DemoCall::new(self.endpoint.clone(), &self.path)
    }
}

#[tokio::main]
async fn main() -> Result<(), CallError<std::io::Error>> {
    tracing_subscriber::fmt::init();

    let config = RetryConfig::default();
    let layer = config
        .layer::<String, String, std::io::Error>(Arc::new(TokioScheduler::new(
            tokio::runtime::Handle::current(),
        )))
        .expect("valid retry configuration")
        .with_sink(LogSink);

    let call = tower_layer::Layer::layer(&layer, DemoCall::new(Endpoint::default(), "/quota"));
    let response = call.execute().await?;

    println!("{} after {} attempts: {}", response.status(), call.attempts(), response.body());
    Ok(())
}
