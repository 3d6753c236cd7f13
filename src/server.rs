/// Sensor HTTP endpoint
/// Publishes the latest display state plus update/notification counters for
/// dashboards and monitoring systems.

use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ClockError;
use crate::notify::NotifyOutcome;
use crate::sensor::DisplayState;

/// Timeout for reading HTTP request (prevents slow-loris attacks)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Point-in-time copy of the sensor counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub updates_ok: u64,
    pub updates_failed: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    /// Unix epoch seconds of the last update attempt, 0 before the first
    pub last_update_time: u64,
    pub last_update_ok: bool,
}

/// Counters updated by the update loop
#[derive(Debug)]
pub struct SensorMetrics {
    updates_ok: AtomicU64,
    updates_failed: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    last_update_time: AtomicU64,
    last_update_ok: AtomicBool,
}

impl Default for SensorMetrics {
    fn default() -> Self {
        Self {
            updates_ok: AtomicU64::new(0),
            updates_failed: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            last_update_time: AtomicU64::new(0),
            last_update_ok: AtomicBool::new(true),
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl SensorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of one update cycle
    pub fn record_update(&self, result: &Result<DisplayState, ClockError>) {
        match result {
            Ok(display) => {
                self.updates_ok.fetch_add(1, Ordering::Relaxed);
                match display.notification {
                    NotifyOutcome::Sent => {
                        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    NotifyOutcome::Failed => {
                        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
            }
            Err(_) => {
                self.updates_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.last_update_time.store(unix_now(), Ordering::Relaxed);
        self.last_update_ok.store(result.is_ok(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            updates_ok: self.updates_ok.load(Ordering::Relaxed),
            updates_failed: self.updates_failed.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            last_update_time: self.last_update_time.load(Ordering::Relaxed),
            last_update_ok: self.last_update_ok.load(Ordering::Relaxed),
        }
    }
}

/// Where the update loop hands its results
pub struct Publisher {
    state: watch::Sender<Option<DisplayState>>,
    metrics: Arc<SensorMetrics>,
}

impl Publisher {
    pub fn new(metrics: Arc<SensorMetrics>) -> Self {
        let (state, _) = watch::channel(None);
        Self { state, metrics }
    }

    /// Count the result and, if it succeeded, make it the current sensor value.
    /// A failed update leaves the previous value published.
    pub fn publish(&self, result: &Result<DisplayState, ClockError>) {
        self.metrics.record_update(result);
        if let Ok(display) = result {
            self.state.send_replace(Some(display.clone()));
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DisplayState>> {
        self.state.subscribe()
    }

    pub fn current(&self) -> Option<DisplayState> {
        self.state.borrow().clone()
    }

    pub fn metrics(&self) -> &Arc<SensorMetrics> {
        &self.metrics
    }
}

/// Bind and run the sensor HTTP endpoint until cancelled
pub async fn run_sensor_server(
    port: u16,
    published: watch::Receiver<Option<DisplayState>>,
    metrics: Arc<SensorMetrics>,
    cancel_token: CancellationToken,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind sensor server on port {}: {}", port, e);
            return;
        }
    };

    info!("Sensor server listening on http://0.0.0.0:{}/state", port);
    serve(listener, published, metrics, cancel_token).await;
}

/// Accept loop over an already-bound listener
pub async fn serve(
    listener: TcpListener,
    published: watch::Receiver<Option<DisplayState>>,
    metrics: Arc<SensorMetrics>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((mut socket, peer_addr)) => {
                        let metrics = metrics.clone();
                        let published = published.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_request(&mut socket, &published, &metrics).await {
                                debug!("Error handling request from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Sensor server shutting down");
                break;
            }
        }
    }
}

async fn handle_request(
    socket: &mut tokio::net::TcpStream,
    published: &watch::Receiver<Option<DisplayState>>,
    metrics: &SensorMetrics,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];

    let n = match timeout(REQUEST_TIMEOUT, socket.read(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => {
            debug!("Request timeout after {:?}", REQUEST_TIMEOUT);
            return Ok(());
        }
    };

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..n]);

    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let response = match path {
        "/state" | "/state/" => {
            let current = published.borrow().clone();
            build_state_response(current.as_ref())
        }
        "/health" | "/healthz" | "/health/" => build_health_response(&metrics.snapshot()),
        "/metrics" => build_metrics_response(&metrics.snapshot()),
        _ => build_not_found_response(),
    };

    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;

    Ok(())
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

fn build_state_response(current: Option<&DisplayState>) -> String {
    match current.map(serde_json::to_string) {
        Some(Ok(body)) => http_response("200 OK", "application/json", &body),
        Some(Err(e)) => {
            error!("Failed to serialize sensor state: {}", e);
            http_response(
                "500 Internal Server Error",
                "application/json",
                r#"{"error":"Internal Server Error"}"#,
            )
        }
        None => http_response(
            "503 Service Unavailable",
            "application/json",
            r#"{"state":null}"#,
        ),
    }
}

fn build_health_response(snapshot: &MetricsSnapshot) -> String {
    let body = serde_json::json!({
        "status": if snapshot.last_update_ok { "healthy" } else { "degraded" },
        "updates_ok": snapshot.updates_ok,
        "updates_failed": snapshot.updates_failed,
        "notifications_sent": snapshot.notifications_sent,
        "notifications_failed": snapshot.notifications_failed,
        "last_update_time": snapshot.last_update_time,
        "last_update_ok": snapshot.last_update_ok,
    });
    http_response("200 OK", "application/json", &body.to_string())
}

fn build_metrics_response(snapshot: &MetricsSnapshot) -> String {
    // Prometheus-compatible metrics format
    let body = format!(
        "# HELP worldclock_updates_total Total number of update cycles\n\
         # TYPE worldclock_updates_total counter\n\
         worldclock_updates_total{{result=\"success\"}} {}\n\
         worldclock_updates_total{{result=\"failure\"}} {}\n\
         # HELP worldclock_notifications_total Reminder emails attempted\n\
         # TYPE worldclock_notifications_total counter\n\
         worldclock_notifications_total{{result=\"sent\"}} {}\n\
         worldclock_notifications_total{{result=\"failed\"}} {}\n\
         # HELP worldclock_last_update_timestamp Unix timestamp of last update\n\
         # TYPE worldclock_last_update_timestamp gauge\n\
         worldclock_last_update_timestamp {}\n\
         # HELP worldclock_last_update_ok Whether the last update succeeded (1) or failed (0)\n\
         # TYPE worldclock_last_update_ok gauge\n\
         worldclock_last_update_ok {}\n",
        snapshot.updates_ok,
        snapshot.updates_failed,
        snapshot.notifications_sent,
        snapshot.notifications_failed,
        snapshot.last_update_time,
        if snapshot.last_update_ok { 1 } else { 0 }
    );
    http_response("200 OK", "text/plain; version=0.0.4", &body)
}

fn build_not_found_response() -> String {
    http_response("404 Not Found", "application/json", r#"{"error":"Not Found"}"#)
}
