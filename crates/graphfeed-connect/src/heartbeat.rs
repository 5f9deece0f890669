//! Heartbeat loop
//!
//! Pings the control API at a fixed interval with the local connector state
//! and adopts the state it answers with. The remote copy always wins, which
//! is how operators reset a connector from the platform.

use crate::control::{decode_state, ControlApi};
use crate::error::ConnectError;
use crate::health::SharedHealthState;
use crate::state::StateStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Result of one heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Local and remote state agree
    InSync,
    /// Local state was replaced by the remote one
    Reset,
    /// Control API unreachable or answer unreadable
    Failed,
}

/// Periodic state reconciliation with the control API
pub struct HeartbeatMonitor {
    connector_id: String,
    control: Arc<dyn ControlApi>,
    state: StateStore,
    interval: Duration,
    in_error: AtomicBool,
    health: Option<SharedHealthState>,
}

impl HeartbeatMonitor {
    pub fn new(
        connector_id: impl Into<String>,
        control: Arc<dyn ControlApi>,
        state: StateStore,
        interval: Duration,
    ) -> Self {
        Self {
            connector_id: connector_id.into(),
            control,
            state,
            interval,
            in_error: AtomicBool::new(false),
            health: None,
        }
    }

    /// Mirror API reachability into `health` (builder pattern)
    pub fn with_health(mut self, health: SharedHealthState) -> Self {
        self.health = Some(health);
        self
    }

    /// Whether the last heartbeat failed
    pub fn in_error(&self) -> bool {
        self.in_error.load(Ordering::SeqCst)
    }

    /// Beat until shutdown. The first heartbeat is sent immediately.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            connector_id = %self.connector_id,
            "Starting heartbeat every {:?}", self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!(connector_id = %self.connector_id, "Heartbeat stopped");
    }

    /// One reconciliation round
    pub async fn tick(&self) -> HeartbeatOutcome {
        let local = self.state.get();

        let response = match self.control.ping(&self.connector_id, local.as_ref()).await {
            Ok(response) => response,
            Err(e) => {
                self.mark_failed(ConnectError::HeartbeatFailure(e.to_string()))
                    .await;
                return HeartbeatOutcome::Failed;
            }
        };

        let remote = match decode_state(response.connector_state.as_deref()) {
            Ok(remote) => remote,
            Err(e) => {
                self.mark_failed(ConnectError::HeartbeatFailure(format!(
                    "unreadable connector state: {}",
                    e
                )))
                .await;
                return HeartbeatOutcome::Failed;
            }
        };

        self.mark_recovered().await;

        if self.state.reconcile_from(local.as_ref(), remote.clone()) {
            info!(
                connector_id = %self.connector_id,
                state = ?remote,
                "Connector state has been reset by the platform"
            );
            HeartbeatOutcome::Reset
        } else {
            debug!(connector_id = %self.connector_id, "Heartbeat in sync");
            HeartbeatOutcome::InSync
        }
    }

    async fn mark_failed(&self, err: ConnectError) {
        error!(connector_id = %self.connector_id, "{}", err);
        self.in_error.store(true, Ordering::SeqCst);
        if let Some(health) = &self.health {
            let mut health = health.write().await;
            health.api_reachable = false;
            health.last_error = Some(err.to_string());
        }
    }

    async fn mark_recovered(&self) {
        if self.in_error.swap(false, Ordering::SeqCst) {
            info!(
                connector_id = %self.connector_id,
                "Control API is reachable again, back to normal"
            );
        }
        if let Some(health) = &self.health {
            health.write().await.api_reachable = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ConnectorRegistration, JobStatus, PingResponse, RegisteredConnector};
    use crate::error::Result;
    use crate::health::HealthState;
    use crate::memory::MemoryControlApi;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::RwLock;

    /// Control API that echoes the pinged state after the connector has
    /// moved its own state forward
    struct EchoWhileUpdating {
        state: StateStore,
        update: Value,
    }

    #[async_trait]
    impl ControlApi for EchoWhileUpdating {
        async fn register(&self, _: &ConnectorRegistration) -> Result<RegisteredConnector> {
            Err(ConnectError::control("not used"))
        }

        async fn initiate_job(&self, _: &str) -> Result<String> {
            Err(ConnectError::control("not used"))
        }

        async fn update_job(&self, _: Option<&str>, _: JobStatus, _: &[String]) -> Result<()> {
            Ok(())
        }

        async fn ping(&self, _: &str, state: Option<&Value>) -> Result<PingResponse> {
            self.state.set(Some(self.update.clone()));
            Ok(PingResponse {
                connector_state: state.map(Value::to_string),
            })
        }
    }

    fn monitor(api: &Arc<MemoryControlApi>, state: &StateStore) -> HeartbeatMonitor {
        HeartbeatMonitor::new("c1", api.clone(), state.clone(), Duration::from_secs(40))
    }

    #[tokio::test]
    async fn test_remote_state_wins() {
        let api = Arc::new(MemoryControlApi::new());
        let state = StateStore::new(Some(json!({"a": 1})));
        let monitor = monitor(&api, &state);

        assert_eq!(monitor.tick().await, HeartbeatOutcome::InSync);
        api.reset_state(Some(r#"{"a":2}"#));
        assert_eq!(monitor.tick().await, HeartbeatOutcome::Reset);
        assert_eq!(state.get(), Some(json!({"a": 2})));
        assert_eq!(api.pings()[1], Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_update_during_ping_survives_echo() {
        let state = StateStore::new(Some(json!({"cursor": 1})));
        let api = Arc::new(EchoWhileUpdating {
            state: state.clone(),
            update: json!({"cursor": 2}),
        });
        let monitor = HeartbeatMonitor::new("c1", api, state.clone(), Duration::from_secs(40));

        assert_eq!(monitor.tick().await, HeartbeatOutcome::InSync);
        assert_eq!(state.get(), Some(json!({"cursor": 2})));
    }

    #[tokio::test]
    async fn test_empty_remote_state_clears_local() {
        let api = Arc::new(MemoryControlApi::new());
        let state = StateStore::new(Some(json!({"cursor": 10})));
        api.reset_state(Some(""));
        assert_eq!(monitor(&api, &state).tick().await, HeartbeatOutcome::Reset);
        assert_eq!(state.get(), None);
    }

    #[tokio::test]
    async fn test_failure_and_recovery() {
        let api = Arc::new(MemoryControlApi::new());
        let state = StateStore::new(Some(json!({"a": 1})));
        let health = Arc::new(RwLock::new(HealthState::default()));
        let monitor = monitor(&api, &state).with_health(health.clone());

        api.set_ping_failure(true);
        assert_eq!(monitor.tick().await, HeartbeatOutcome::Failed);
        assert!(monitor.in_error());
        assert!(!health.read().await.api_reachable);
        assert_eq!(state.get(), Some(json!({"a": 1})));

        api.set_ping_failure(false);
        assert_eq!(monitor.tick().await, HeartbeatOutcome::InSync);
        assert!(!monitor.in_error());
        assert!(health.read().await.api_reachable);
    }

    #[tokio::test]
    async fn test_unreadable_state_is_a_failure() {
        let api = Arc::new(MemoryControlApi::new());
        let state = StateStore::new(Some(json!({"a": 1})));
        api.reset_state(Some("{not json"));
        let monitor = monitor(&api, &state);
        assert_eq!(monitor.tick().await, HeartbeatOutcome::Failed);
        assert_eq!(state.get(), Some(json!({"a": 1})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_beats_until_shutdown() {
        let api = Arc::new(MemoryControlApi::new());
        let state = StateStore::default();
        let monitor = Arc::new(monitor(&api, &state));
        let (tx, rx) = broadcast::channel(1);

        let task = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.run(rx).await }
        });
        tokio::time::sleep(Duration::from_secs(85)).await;
        tx.send(()).unwrap();
        task.await.unwrap();

        assert_eq!(api.pings().len(), 3);
    }
}
