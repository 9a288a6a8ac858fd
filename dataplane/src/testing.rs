//! Fixtures for testing data planes against a control plane.
//!
//! Enabled in this crate's own tests and, for dependents, with the `testing` feature.

use anyhow::Error;
use async_std::{
    net::TcpStream,
    sync::{Arc, Mutex},
    task::{sleep, spawn, JoinHandle},
};
use portpicker::pick_unused_port;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tide::{Request, Response};

/// A request received by a [`StubControlPlane`].
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub path: String,
    pub body: Value,
}

#[derive(Clone)]
struct StubState {
    status: Arc<AtomicU16>,
    delay_ms: Arc<AtomicU64>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// A control plane which records every POST it receives and answers with a fixed status.
pub struct StubControlPlane {
    port: u16,
    state: StubState,
    server: JoinHandle<()>,
}

impl StubControlPlane {
    /// Start a stub control plane answering every request with `status`.
    pub async fn start(status: u16) -> Result<Self, Error> {
        let port = pick_unused_port().ok_or_else(|| Error::msg("no free port"))?;
        let state = StubState {
            status: Arc::new(AtomicU16::new(status)),
            delay_ms: Default::default(),
            requests: Default::default(),
        };

        let mut app = tide::with_state(state.clone());
        app.at("/*path").post(record);
        let server = spawn(async move {
            if let Err(err) = app.listen(format!("127.0.0.1:{port}")).await {
                tracing::error!("stub control plane exited: {err}");
            }
        });
        wait_for_server(port).await?;

        Ok(Self {
            port,
            state,
            server,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Change the status returned for subsequent requests.
    pub fn set_status(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    /// Hold every subsequent reply for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// All requests received so far, in order.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().await.clone()
    }

    /// Requests received so far at exactly `path`.
    pub async fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .await
            .into_iter()
            .filter(|req| req.path == path)
            .collect()
    }

    pub async fn stop(self) {
        self.server.cancel().await;
    }
}

async fn record(mut req: Request<StubState>) -> tide::Result {
    let body = req.body_json::<Value>().await.unwrap_or(Value::Null);
    let path = req.url().path().to_string();
    tracing::info!(%path, %body, "stub control plane request");

    let state = req.state();
    state.requests.lock().await.push(RecordedRequest { path, body });
    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        sleep(Duration::from_millis(delay)).await;
    }
    Ok(Response::new(state.status.load(Ordering::SeqCst)))
}

/// A URL on localhost where nothing is listening.
pub fn unreachable_url() -> String {
    let port = pick_unused_port().unwrap_or(9);
    format!("http://127.0.0.1:{port}")
}

/// Wait until a server accepts connections on `port`.
pub async fn wait_for_server(port: u16) -> Result<(), Error> {
    const MAX_CONNECT_RETRIES: usize = 100;

    for _ in 0..MAX_CONNECT_RETRIES {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(_) => return Ok(()),
            Err(err) => {
                tracing::debug!("waiting for server on port {port}: {err}");
                sleep(Duration::from_millis(50)).await;
            }
        }
    }

    Err(Error::msg(format!("timed out waiting for server on port {port}")))
}

/// Retry `check` until it succeeds or `timeout` elapses, returning the last failure.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        match check().await {
            Ok(()) => return Ok(()),
            Err(err) if Instant::now() >= deadline => return Err(err),
            Err(_) => sleep(Duration::from_millis(100)).await,
        }
    }
}
