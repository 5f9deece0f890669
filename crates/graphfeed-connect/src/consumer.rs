//! Work consumer
//!
//! Consumes work items from the connector's listen queue. Every delivery
//! goes through the same lifecycle:
//!
//! ```text
//! received ─▶ parsed ─▶ "progress" ─▶ handler task ─▶ "complete" | "error" ─▶ ack
//! ```
//!
//! The handler runs on its own tokio task so a panic stays contained, and
//! the delivery is acknowledged only once that task has terminated. One
//! delivery is in flight at a time.

use crate::broker::{BrokerConnector, Delivery, Subscription};
use crate::control::{ControlApi, JobStatus};
use crate::error::{ConnectError, ConnectorStatus, Result};
use crate::health::SharedHealthState;
use crate::retry::RetryPolicy;
use crate::state::CurrentWork;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Progress message reported before the handler starts
pub const STARTING_MESSAGE: &str = "Starting process";

/// A parsed inbound work item
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub job_id: Option<String>,
    pub work_id: String,
    /// Full message payload
    pub payload: Value,
}

/// Caller-supplied work item processing
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one work item. `Ok` carries the completion messages.
    async fn handle(&self, item: WorkItem) -> anyhow::Result<Vec<String>>;
}

/// [`MessageHandler`] backed by an async closure
pub struct FnHandler<F>(F);

/// Wrap an async closure into a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<String>>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<String>>> + Send + 'static,
{
    async fn handle(&self, item: WorkItem) -> anyhow::Result<Vec<String>> {
        (self.0)(item).await
    }
}

/// What to do with a delivery that is not JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPayloadPolicy {
    /// Negative acknowledgment without requeue
    #[default]
    Reject,
    /// Acknowledge and drop
    Acknowledge,
}

/// Consumer loop tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerPolicy {
    /// Delay and give-up point of the reconnect loop
    pub reconnect: RetryPolicy,
    /// Abort handlers running longer than this
    pub handler_timeout: Option<Duration>,
    pub malformed: MalformedPayloadPolicy,
}

impl Default for ConsumerPolicy {
    fn default() -> Self {
        Self {
            reconnect: RetryPolicy::forever(Duration::from_secs(10)),
            handler_timeout: None,
            malformed: MalformedPayloadPolicy::default(),
        }
    }
}

/// Consumes the listen queue and drives the handler
pub struct WorkConsumer {
    queue: String,
    broker: Arc<dyn BrokerConnector>,
    control: Arc<dyn ControlApi>,
    handler: Arc<dyn MessageHandler>,
    current_work: CurrentWork,
    policy: ConsumerPolicy,
    health: Option<SharedHealthState>,
}

impl WorkConsumer {
    pub fn new(
        queue: impl Into<String>,
        broker: Arc<dyn BrokerConnector>,
        control: Arc<dyn ControlApi>,
        handler: Arc<dyn MessageHandler>,
        current_work: CurrentWork,
    ) -> Self {
        Self {
            queue: queue.into(),
            broker,
            control,
            handler,
            current_work,
            policy: ConsumerPolicy::default(),
            health: None,
        }
    }

    /// Set the consumer policy (builder pattern)
    pub fn with_policy(mut self, policy: ConsumerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Mirror connection and outcome counters into `health` (builder pattern)
    pub fn with_health(mut self, health: SharedHealthState) -> Self {
        self.health = Some(health);
        self
    }

    /// Consume until shutdown.
    ///
    /// Connection losses are survived by resubscribing after the reconnect
    /// delay. Returns an error only when the reconnect policy gives up.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(queue = %self.queue, "Starting work consumer");
        let mut failures = 0u32;

        loop {
            let subscribed = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                subscribed = self.broker.subscribe(&self.queue) => subscribed,
            };

            let err = match subscribed {
                Ok(mut subscription) => {
                    info!(queue = %self.queue, "Subscribed to listen queue");
                    self.set_connected(true).await;
                    match self
                        .consume(subscription.as_mut(), &mut shutdown, &mut failures)
                        .await
                    {
                        Ok(()) => break,
                        Err(e) => e,
                    }
                }
                Err(e) => ConnectError::connection(e.to_string()),
            };

            self.set_connected(false).await;
            if !self.policy.reconnect.record_failure(&mut failures) {
                error!(
                    queue = %self.queue,
                    failures,
                    "Giving up on the listen queue: {}",
                    err
                );
                self.set_status(ConnectorStatus::Failed, Some(err.to_string()))
                    .await;
                return Err(err);
            }
            warn!(
                queue = %self.queue,
                failures,
                "Connection lost ({}), reconnecting in {:?}",
                err,
                self.policy.reconnect.delay
            );

            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = self.policy.reconnect.wait() => {}
            }
        }

        info!(queue = %self.queue, "Work consumer stopped");
        self.set_connected(false).await;
        self.set_status(ConnectorStatus::Stopped, None).await;
        Ok(())
    }

    async fn consume(
        &self,
        subscription: &mut dyn Subscription,
        shutdown: &mut broadcast::Receiver<()>,
        failures: &mut u32,
    ) -> Result<()> {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.recv() => return Ok(()),
                next = subscription.next_delivery() => next,
            };

            let delivery = next
                .map_err(|e| ConnectError::connection(e.to_string()))?
                .ok_or_else(|| ConnectError::connection("subscription closed by broker"))?;

            self.process_delivery(subscription, delivery).await?;
            *failures = 0;
        }
    }

    /// Run one delivery through the whole lifecycle and settle it.
    ///
    /// Fails only when the delivery could not be settled with the broker.
    pub async fn process_delivery(
        &self,
        subscription: &mut dyn Subscription,
        delivery: Delivery,
    ) -> Result<()> {
        let tag = delivery.delivery_tag;
        debug!(delivery_tag = tag, "Work item received");

        let payload: Value = match serde_json::from_slice(&delivery.body) {
            Ok(payload) => payload,
            Err(e) => {
                error!(delivery_tag = tag, "Malformed work item payload: {}", e);
                let settled = match self.policy.malformed {
                    MalformedPayloadPolicy::Reject => subscription.reject(tag).await,
                    MalformedPayloadPolicy::Acknowledge => subscription.ack(tag).await,
                };
                settled.map_err(|e| ConnectError::connection(e.to_string()))?;
                self.record_outcome(Some(format!("malformed payload: {}", e)))
                    .await;
                return Ok(());
            }
        };

        let outcome = self.run_work_item(payload).await;

        subscription
            .ack(tag)
            .await
            .map_err(|e| ConnectError::connection(e.to_string()))?;
        debug!(delivery_tag = tag, "Work item acknowledged");
        self.record_outcome(outcome).await;
        Ok(())
    }

    /// Returns the failure description, if any
    async fn run_work_item(&self, payload: Value) -> Option<String> {
        let job_id = payload
            .get("job_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let Some(work_id) = payload
            .get("work_id")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            let reason = "work item has no work_id".to_string();
            error!(job_id = ?job_id, "{}", reason);
            self.report_error(job_id.as_deref(), &reason).await;
            return Some(reason);
        };

        self.current_work.set(Some(work_id.clone()));
        let item = WorkItem {
            job_id: job_id.clone(),
            work_id,
            payload,
        };
        let outcome = self.execute(item, job_id.as_deref()).await;
        self.current_work.set(None);
        outcome
    }

    async fn execute(&self, item: WorkItem, job_id: Option<&str>) -> Option<String> {
        let work_id = item.work_id.clone();

        if let Err(e) = self
            .control
            .update_job(job_id, JobStatus::Progress, &[STARTING_MESSAGE.to_string()])
            .await
        {
            let reason = format!("failed to report progress: {}", e);
            error!(work_id = %work_id, "{}", reason);
            self.report_error(job_id, &reason).await;
            return Some(reason);
        }

        let handler = self.handler.clone();
        let mut task = tokio::spawn(async move { handler.handle(item).await });

        let joined = match self.policy.handler_timeout {
            None => (&mut task).await,
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    let _ = task.await;
                    let reason = format!("handler timed out after {:?}", limit);
                    error!(work_id = %work_id, "{}", reason);
                    self.report_error(job_id, &reason).await;
                    return Some(reason);
                }
            },
        };

        let reason = match joined {
            Ok(Ok(messages)) => match self
                .control
                .update_job(job_id, JobStatus::Complete, &messages)
                .await
            {
                Ok(()) => {
                    info!(work_id = %work_id, "Work item complete");
                    return None;
                }
                Err(e) => format!("failed to report completion: {}", e),
            },
            Ok(Err(e)) => format!("{:#}", e),
            Err(join_err) if join_err.is_panic() => {
                format!("handler panicked: {}", panic_message(join_err.into_panic()))
            }
            Err(join_err) => format!("handler task failed: {}", join_err),
        };

        error!(work_id = %work_id, "Work item failed: {}", reason);
        self.report_error(job_id, &reason).await;
        Some(reason)
    }

    async fn report_error(&self, job_id: Option<&str>, reason: &str) {
        if let Err(e) = self
            .control
            .update_job(job_id, JobStatus::Error, &[reason.to_string()])
            .await
        {
            error!(job_id = ?job_id, "Failed to report job error: {}", e);
        }
    }

    async fn set_connected(&self, connected: bool) {
        if let Some(health) = &self.health {
            let mut health = health.write().await;
            health.broker_connected = connected;
            if health.status != ConnectorStatus::Failed {
                health.status = if connected {
                    ConnectorStatus::Running
                } else {
                    ConnectorStatus::Unhealthy
                };
            }
        }
    }

    async fn set_status(&self, status: ConnectorStatus, last_error: Option<String>) {
        if let Some(health) = &self.health {
            let mut health = health.write().await;
            health.status = status;
            if last_error.is_some() {
                health.last_error = last_error;
            }
        }
    }

    async fn record_outcome(&self, error: Option<String>) {
        if let Some(health) = &self.health {
            health.write().await.record_outcome(error);
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
