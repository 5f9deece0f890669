//! Health check HTTP endpoint
//!
//! Liveness and readiness probes for the connector process. Returns JSON
//! with the connector status and message counters.

use crate::error::ConnectorStatus;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Health of one connector process
#[derive(Debug, Clone)]
pub struct HealthState {
    pub status: ConnectorStatus,
    /// Consumer holds a live subscription
    pub broker_connected: bool,
    /// Last heartbeat reached the control API
    pub api_reachable: bool,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub last_error: Option<String>,
    pub started_at: Option<std::time::Instant>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            status: ConnectorStatus::Starting,
            broker_connected: false,
            api_reachable: true,
            messages_processed: 0,
            messages_failed: 0,
            last_error: None,
            started_at: Some(std::time::Instant::now()),
        }
    }
}

impl HealthState {
    /// Running and the control API answers
    pub fn is_healthy(&self) -> bool {
        self.api_reachable
            && matches!(
                self.status,
                ConnectorStatus::Running | ConnectorStatus::Starting
            )
    }

    /// Running with a live subscription
    pub fn is_ready(&self) -> bool {
        self.status == ConnectorStatus::Running && self.broker_connected
    }

    /// Record a terminated work item
    pub fn record_outcome(&mut self, error: Option<String>) {
        match error {
            None => self.messages_processed += 1,
            Some(e) => {
                self.messages_failed += 1;
                self.last_error = Some(e);
            }
        }
    }
}

/// Shared health state
pub type SharedHealthState = Arc<RwLock<HealthState>>;

/// Start the health check HTTP server on `port`
pub async fn start_health_server(port: u16, state: SharedHealthState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Health check endpoint listening on http://{}/health", addr);
    serve(listener, state).await
}

/// Serve health requests on an already bound listener
pub async fn serve(listener: TcpListener, state: SharedHealthState) -> std::io::Result<()> {
    loop {
        let (mut socket, peer) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];

            match socket.read(&mut buf).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let Some(request_line) = request.lines().next() else {
                        return;
                    };

                    let mut parts = request_line.split_whitespace();
                    let (Some(method), Some(req_path)) = (parts.next(), parts.next()) else {
                        return;
                    };

                    debug!(
                        "Health check request: {} {} from {}",
                        method, req_path, peer
                    );

                    let response = match (method, req_path) {
                        ("GET", "/health") => build_health_response(&state).await,
                        ("GET", "/ready") => build_ready_response(&state).await,
                        ("GET", "/live") => build_live_response(),
                        _ => build_404_response(),
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        warn!("Failed to send health response: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Health check socket error: {}", e);
                }
            }
        });
    }
}

fn http_response(ok: bool, body: &serde_json::Value) -> String {
    let (code, reason) = if ok {
        (200, "OK")
    } else {
        (503, "Service Unavailable")
    };
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{}",
        code,
        reason,
        serde_json::to_string(body).unwrap_or_default()
    )
}

async fn build_health_response(state: &SharedHealthState) -> String {
    let state = state.read().await;
    let is_healthy = state.is_healthy();

    let body = serde_json::json!({
        "status": if is_healthy { "healthy" } else { "unhealthy" },
        "connector_status": state.status.to_string(),
        "broker_connected": state.broker_connected,
        "api_reachable": state.api_reachable,
        "messages_processed": state.messages_processed,
        "messages_failed": state.messages_failed,
        "last_error": state.last_error,
        "uptime_secs": state.started_at.map(|t| t.elapsed().as_secs()),
    });

    http_response(is_healthy, &body)
}

async fn build_ready_response(state: &SharedHealthState) -> String {
    let is_ready = state.read().await.is_ready();
    http_response(is_ready, &serde_json::json!({ "ready": is_ready }))
}

fn build_live_response() -> String {
    http_response(true, &serde_json::json!({ "alive": true }))
}

fn build_404_response() -> String {
    "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nNot Found"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[test]
    fn test_health_state_healthy() {
        let state = HealthState {
            status: ConnectorStatus::Running,
            broker_connected: true,
            ..Default::default()
        };
        assert!(state.is_healthy());
        assert!(state.is_ready());
    }

    #[test]
    fn test_api_unreachable_is_unhealthy() {
        let state = HealthState {
            status: ConnectorStatus::Running,
            broker_connected: true,
            api_reachable: false,
            ..Default::default()
        };
        assert!(!state.is_healthy());
        assert!(state.is_ready());
    }

    #[test]
    fn test_not_ready_without_broker() {
        let state = HealthState {
            status: ConnectorStatus::Running,
            ..Default::default()
        };
        assert!(!state.is_ready());
    }

    #[test]
    fn test_record_outcome() {
        let mut state = HealthState::default();
        state.record_outcome(None);
        state.record_outcome(Some("boom".to_string()));
        assert_eq!(state.messages_processed, 1);
        assert_eq!(state.messages_failed, 1);
        assert_eq!(state.last_error.as_deref(), Some("boom"));
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_endpoints() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state: SharedHealthState = Arc::new(RwLock::new(HealthState::default()));
        tokio::spawn(serve(listener, state.clone()));

        assert!(get(addr, "/live").await.starts_with("HTTP/1.1 200"));
        assert!(get(addr, "/ready").await.starts_with("HTTP/1.1 503"));
        assert!(get(addr, "/nope").await.starts_with("HTTP/1.1 404"));

        {
            let mut s = state.write().await;
            s.status = ConnectorStatus::Running;
            s.broker_connected = true;
        }
        assert!(get(addr, "/ready").await.starts_with("HTTP/1.1 200"));
        let health = get(addr, "/health").await;
        assert!(health.contains("\"connector_status\":\"running\""));
    }
}
