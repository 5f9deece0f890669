//! Connector startup and handle
//!
//! [`Connector::start`] registers with the control API, seeds the local
//! state from the registration answer and starts the heartbeat. The
//! returned handle is what connector code works with:
//!
//! ```rust,ignore
//! let connector = Connector::start(settings, control_api, broker).await?;
//! let consumer = connector.listen(handler_fn(|item| async move { enrich(item).await }));
//! connector.send_bundle(&bundle, &SendOptions::default()).await?;
//! ```

use crate::broker::BrokerConnector;
use crate::config::ConnectorSettings;
use crate::consumer::{ConsumerPolicy, MessageHandler, WorkConsumer};
use crate::control::{decode_state, ConnectorRegistration, ControlApi, QueueSettings};
use crate::error::{ConnectError, ConnectorStatus, Result};
use crate::health::{start_health_server, HealthState, SharedHealthState};
use crate::heartbeat::HeartbeatMonitor;
use crate::producer::{SendOptions, WorkProducer};
use crate::retry::RetryPolicy;
use crate::state::{CurrentWork, StateStore};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Current UTC time, second precision, RFC 3339 with a `+00:00` offset
pub fn date_now() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S+00:00")
        .to_string()
}

/// A registered, running connector
pub struct Connector {
    settings: ConnectorSettings,
    queues: QueueSettings,
    broker: Arc<dyn BrokerConnector>,
    control: Arc<dyn ControlApi>,
    state: StateStore,
    current_work: CurrentWork,
    health: SharedHealthState,
    producer: WorkProducer,
    listening: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connector {
    /// Register with the control API and start the heartbeat
    pub async fn start(
        settings: ConnectorSettings,
        control: Arc<dyn ControlApi>,
        broker: Arc<dyn BrokerConnector>,
    ) -> Result<Self> {
        let registration = ConnectorRegistration {
            id: settings.id.clone(),
            name: settings.name.clone(),
            connector_type: settings.connector_type,
            scope: settings.scope.clone(),
        };
        let registered = control.register(&registration).await?;
        info!(
            connector_id = %settings.id,
            connector_type = %settings.connector_type,
            listen = %registered.config.listen_queue,
            "Connector registered"
        );

        let initial_state = match decode_state(registered.connector_state.as_deref()) {
            Ok(state) => state,
            Err(e) => {
                warn!("Stored connector state is unreadable, starting empty: {}", e);
                None
            }
        };
        let state = StateStore::new(initial_state);
        let current_work = CurrentWork::default();
        let health: SharedHealthState = Arc::new(RwLock::new(HealthState::default()));
        let (shutdown_tx, _) = broadcast::channel(4);

        let heartbeat = HeartbeatMonitor::new(
            settings.id.clone(),
            control.clone(),
            state.clone(),
            settings.runtime.heartbeat_interval,
        )
        .with_health(health.clone());
        let heartbeat_shutdown = shutdown_tx.subscribe();
        let heartbeat_task = tokio::spawn(async move {
            heartbeat.run(heartbeat_shutdown).await;
        });

        let health_task = settings.runtime.health_port.map(|port| {
            let health = health.clone();
            tokio::spawn(async move {
                if let Err(e) = start_health_server(port, health).await {
                    error!("Health endpoint failed: {}", e);
                }
            })
        });

        let producer = WorkProducer::new(
            settings.id.clone(),
            registered.config.push_exchange.clone(),
            settings.opencti_token.clone(),
            broker.clone(),
            control.clone(),
            current_work.clone(),
        )
        .with_retry_policy(
            RetryPolicy::forever(settings.runtime.publish_retry_delay)
                .with_max_attempts(settings.runtime.max_publish_attempts),
        );

        Ok(Self {
            settings,
            queues: registered.config,
            broker,
            control,
            state,
            current_work,
            health,
            producer,
            listening: AtomicBool::new(false),
            shutdown_tx,
            heartbeat_task: Mutex::new(Some(heartbeat_task)),
            health_task: Mutex::new(health_task),
        })
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    /// Queue coordinates received at registration
    pub fn queues(&self) -> &QueueSettings {
        &self.queues
    }

    /// Consume the listen queue with `handler` until shutdown.
    ///
    /// A connector has a single current work id, so it runs one consumer.
    /// Any further call returns a task that fails with a configuration error.
    pub fn listen(&self, handler: impl MessageHandler) -> JoinHandle<Result<()>> {
        if self.listening.swap(true, Ordering::SeqCst) {
            warn!(connector_id = %self.settings.id, "Connector is already listening");
            return tokio::spawn(async {
                Err(ConnectError::config("connector is already listening"))
            });
        }
        let runtime = &self.settings.runtime;
        let consumer = WorkConsumer::new(
            self.queues.listen_queue.clone(),
            self.broker.clone(),
            self.control.clone(),
            Arc::new(handler),
            self.current_work.clone(),
        )
        .with_policy(ConsumerPolicy {
            reconnect: RetryPolicy::forever(runtime.reconnect_delay)
                .with_max_attempts(runtime.max_reconnect_attempts),
            handler_timeout: runtime.handler_timeout,
            ..Default::default()
        })
        .with_health(self.health.clone());

        let shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move { consumer.run(shutdown).await })
    }

    /// Partition and publish a bundle, see [`WorkProducer::send_bundle`]
    pub async fn send_bundle(&self, bundle: &str, options: &SendOptions) -> Result<Vec<String>> {
        self.producer.send_bundle(bundle, options).await
    }

    /// Send options honouring `update_existing_data`
    pub fn default_send_options(&self) -> SendOptions {
        SendOptions::default().with_update(self.settings.update_existing_data)
    }

    pub fn get_state(&self) -> Option<Value> {
        self.state.get()
    }

    /// Replace the local state. The next heartbeat sends it to the platform.
    pub fn set_state(&self, state: Option<Value>) {
        self.state.set(state);
    }

    /// Work id of the item being processed, if any
    pub fn current_work_id(&self) -> Option<String> {
        self.current_work.get()
    }

    pub fn health(&self) -> SharedHealthState {
        self.health.clone()
    }

    /// Stop the heartbeat and signal every consumer started by
    /// [`listen`](Self::listen). Consumers finish their in-flight work item
    /// before stopping; await their handles to wait for that.
    pub async fn shutdown(&self) {
        info!(connector_id = %self.settings.id, "Shutting down connector");
        let _ = self.shutdown_tx.send(());

        let heartbeat = self.heartbeat_task.lock().take();
        if let Some(task) = heartbeat {
            if let Err(e) = task.await {
                warn!("Heartbeat task ended abnormally: {}", e);
            }
        }
        if let Some(task) = self.health_task.lock().take() {
            task.abort();
        }
        self.health.write().await.status = ConnectorStatus::Stopped;
    }
}
