//! Helpers for testing the pipeline services against real HTTP endpoints.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner. All logs emitted with [`sketchrelay_log`] will show up for test
//!    failures or when run with `--nocapture`.
//!  - Use [`MockUpstream`] to stand in for scrape targets, the control plane and shard ingest
//!    endpoints. It records every request it receives.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() {
//! sketchrelay_test::setup();
//!
//! let upstream = sketchrelay_test::MockUpstream::builder()
//!     .metrics_body("up{machineid=\"machine_1\"} 1\n")
//!     .start()
//!     .await;
//!
//! assert_eq!(upstream.metrics_requests(), 0);
//! # }
//! ```

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Setup the test environment.
///
///  - Initializes logs: The logger captures logs from all sketchrelay crates and mutes all other
///    logs.
pub fn setup() {
    sketchrelay_log::__init_test("sketchrelay");
}

/// A request body received on an ingest endpoint.
#[derive(Clone, Debug)]
pub struct Ingest {
    /// The port that received the request.
    pub port: u16,
    /// The JSON body of the request.
    pub payload: Value,
}

impl Ingest {
    /// Returns the `Timestamp` of the payload.
    pub fn timestamp(&self) -> i64 {
        self.payload["Timestamp"].as_i64().expect("missing timestamp")
    }

    /// Returns the number of samples in the payload.
    pub fn len(&self) -> usize {
        self.payload["Metrics"].as_array().map_or(0, Vec::len)
    }

    /// Returns `true` if the payload carries no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the values of the given label across all samples of the payload.
    pub fn label_values(&self, label: &str) -> Vec<String> {
        self.payload["Metrics"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|m| m["Labels"][label].as_str())
            .map(str::to_owned)
            .collect()
    }
}

/// Responses of a [`MockUpstream`].
#[derive(Clone, Debug)]
struct Behavior {
    ingest_status: StatusCode,
    ingest_delay: Duration,
    register_status: StatusCode,
    register_delay: Duration,
    metrics_status: StatusCode,
    metrics_delay: Duration,
    metrics_body: String,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            ingest_status: StatusCode::OK,
            ingest_delay: Duration::ZERO,
            register_status: StatusCode::OK,
            register_delay: Duration::ZERO,
            metrics_status: StatusCode::OK,
            metrics_delay: Duration::ZERO,
            metrics_body: String::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Captured {
    behavior: Mutex<Behavior>,
    ingests: Mutex<Vec<Ingest>>,
    ingest_attempts: AtomicUsize,
    port_attempts: Mutex<BTreeMap<u16, usize>>,
    port_delays: Mutex<BTreeMap<u16, Duration>>,
    registrations: Mutex<Vec<Value>>,
    metrics_requests: AtomicUsize,
}

#[derive(Clone, Debug)]
struct Endpoint {
    port: u16,
    captured: Arc<Captured>,
}

/// Configures and starts a [`MockUpstream`].
#[derive(Debug, Default)]
pub struct MockUpstreamBuilder {
    behavior: Behavior,
}

impl MockUpstreamBuilder {
    /// Status returned by `POST /ingest`.
    pub fn ingest_status(mut self, status: u16) -> Self {
        self.behavior.ingest_status = status_code(status);
        self
    }

    /// Delay before `POST /ingest` responds.
    pub fn ingest_delay(mut self, delay: Duration) -> Self {
        self.behavior.ingest_delay = delay;
        self
    }

    /// Status returned by `POST /register_config`.
    pub fn register_status(mut self, status: u16) -> Self {
        self.behavior.register_status = status_code(status);
        self
    }

    /// Delay before `POST /register_config` responds.
    pub fn register_delay(mut self, delay: Duration) -> Self {
        self.behavior.register_delay = delay;
        self
    }

    /// Status returned by `GET /metrics`.
    pub fn metrics_status(mut self, status: u16) -> Self {
        self.behavior.metrics_status = status_code(status);
        self
    }

    /// Delay before `GET /metrics` responds.
    pub fn metrics_delay(mut self, delay: Duration) -> Self {
        self.behavior.metrics_delay = delay;
        self
    }

    /// Exposition text served by `GET /metrics`.
    pub fn metrics_body(mut self, body: impl Into<String>) -> Self {
        self.behavior.metrics_body = body.into();
        self
    }

    /// Starts the server on an ephemeral port.
    pub async fn start(self) -> MockUpstream {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("failed to bind mock upstream");

        MockUpstream::serve(vec![listener], self.behavior)
    }

    /// Starts the server on `count` adjacent ports.
    ///
    /// All ports share the same behavior and record into the same captures.
    pub async fn start_range(self, count: u16) -> MockUpstream {
        for _ in 0..50 {
            if let Some(listeners) = bind_range(count).await {
                return MockUpstream::serve(listeners, self.behavior);
            }
        }

        panic!("could not find {count} adjacent free ports");
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).expect("invalid status code")
}

async fn bind_range(count: u16) -> Option<Vec<TcpListener>> {
    let first = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.ok()?;
    let base = first.local_addr().ok()?.port();
    if base.checked_add(count)?.checked_sub(1).is_none() {
        return None;
    }

    let mut listeners = vec![first];
    for offset in 1..count {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, base + offset))
            .await
            .ok()?;
        listeners.push(listener);
    }

    Some(listeners)
}

/// An HTTP server standing in for scrape targets, the control plane and shards.
///
/// Serves:
///  - `GET /metrics`: the configured exposition text.
///  - `POST /register_config`: records the JSON body.
///  - `POST /ingest`: records the JSON body along with the receiving port.
///
/// The server stops when this handle is dropped.
pub struct MockUpstream {
    addrs: Vec<SocketAddr>,
    captured: Arc<Captured>,
    handles: Vec<JoinHandle<()>>,
}

impl MockUpstream {
    /// Returns a builder for a new mock upstream.
    pub fn builder() -> MockUpstreamBuilder {
        MockUpstreamBuilder::default()
    }

    fn serve(listeners: Vec<TcpListener>, behavior: Behavior) -> Self {
        let captured = Arc::new(Captured {
            behavior: Mutex::new(behavior),
            ..Default::default()
        });

        let mut addrs = Vec::new();
        let mut handles = Vec::new();

        for listener in listeners {
            let addr = listener.local_addr().expect("listener without address");
            let endpoint = Endpoint {
                port: addr.port(),
                captured: captured.clone(),
            };

            let router = Router::new()
                .route("/metrics", get(handle_metrics))
                .route("/register_config", post(handle_register))
                .route("/ingest", post(handle_ingest))
                .with_state(endpoint);

            handles.push(tokio::spawn(async move {
                axum::serve(listener, router).await.ok();
            }));
            addrs.push(addr);
        }

        Self {
            addrs,
            captured,
            handles,
        }
    }

    /// Returns the first port of this upstream.
    pub fn port(&self) -> u16 {
        self.addrs[0].port()
    }

    /// Returns all ports of this upstream in ascending order.
    pub fn ports(&self) -> Vec<u16> {
        self.addrs.iter().map(SocketAddr::port).collect()
    }

    /// Returns the `host:port` of the first port, usable as a scrape target.
    pub fn target(&self) -> String {
        format!("127.0.0.1:{}", self.port())
    }

    /// Returns the base URL of the first port.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port())
    }

    /// Changes the status returned by `POST /ingest`.
    pub fn set_ingest_status(&self, status: u16) {
        self.captured.behavior.lock().ingest_status = status_code(status);
    }

    /// Delays `POST /ingest` on one port only, overriding the shared ingest delay.
    pub fn set_port_ingest_delay(&self, port: u16, delay: Duration) {
        self.captured.port_delays.lock().insert(port, delay);
    }

    /// Changes the exposition text served by `GET /metrics`.
    pub fn set_metrics_body(&self, body: impl Into<String>) {
        self.captured.behavior.lock().metrics_body = body.into();
    }

    /// Returns all ingest bodies that were received, in order of arrival.
    ///
    /// Requests that did not complete before their client gave up are not included.
    pub fn ingests(&self) -> Vec<Ingest> {
        self.captured.ingests.lock().clone()
    }

    /// Returns the number of ingest requests that reached the server.
    pub fn ingest_attempts(&self) -> usize {
        self.captured.ingest_attempts.load(Ordering::SeqCst)
    }

    /// Returns the number of ingest requests that reached the given port.
    pub fn ingest_attempts_on(&self, port: u16) -> usize {
        self.captured
            .port_attempts
            .lock()
            .get(&port)
            .copied()
            .unwrap_or(0)
    }

    /// Returns all capacity registrations that were received.
    pub fn registrations(&self) -> Vec<Value> {
        self.captured.registrations.lock().clone()
    }

    /// Returns the number of scrapes that reached the server.
    pub fn metrics_requests(&self) -> usize {
        self.captured.metrics_requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn handle_metrics(State(endpoint): State<Endpoint>) -> (StatusCode, String) {
    endpoint
        .captured
        .metrics_requests
        .fetch_add(1, Ordering::SeqCst);

    let behavior = endpoint.captured.behavior.lock().clone();
    tokio::time::sleep(behavior.metrics_delay).await;
    (behavior.metrics_status, behavior.metrics_body)
}

async fn handle_register(State(endpoint): State<Endpoint>, body: Bytes) -> StatusCode {
    let behavior = endpoint.captured.behavior.lock().clone();
    tokio::time::sleep(behavior.register_delay).await;

    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    endpoint.captured.registrations.lock().push(value);
    behavior.register_status
}

async fn handle_ingest(State(endpoint): State<Endpoint>, body: Bytes) -> (StatusCode, String) {
    endpoint
        .captured
        .ingest_attempts
        .fetch_add(1, Ordering::SeqCst);
    *endpoint
        .captured
        .port_attempts
        .lock()
        .entry(endpoint.port)
        .or_default() += 1;

    let behavior = endpoint.captured.behavior.lock().clone();
    let delay = endpoint
        .captured
        .port_delays
        .lock()
        .get(&endpoint.port)
        .copied()
        .unwrap_or(behavior.ingest_delay);
    tokio::time::sleep(delay).await;

    let payload = serde_json::from_slice(&body).unwrap_or(Value::Null);
    endpoint.captured.ingests.lock().push(Ingest {
        port: endpoint.port,
        payload,
    });

    let message = match behavior.ingest_status.is_success() {
        true => "ok",
        false => "shard rejected the batch",
    };
    (behavior.ingest_status, message.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_range_is_adjacent() {
        let upstream = MockUpstream::builder().start_range(3).await;
        let ports = upstream.ports();
        assert_eq!(ports.len(), 3);
        assert_eq!(ports[1], ports[0] + 1);
        assert_eq!(ports[2], ports[0] + 2);
    }

    #[test]
    fn test_ingest_accessors() {
        let ingest = Ingest {
            port: 7100,
            payload: serde_json::json!({
                "Timestamp": 12,
                "Metrics": [
                    {"Name": "up", "Labels": {"machineid": "machine_1"}, "Value": 1.0},
                    {"Name": "up", "Labels": {}, "Value": 0.0},
                ],
            }),
        };

        assert_eq!(ingest.timestamp(), 12);
        assert_eq!(ingest.len(), 2);
        assert_eq!(ingest.label_values("machineid"), vec!["machine_1"]);
    }
}
