//! Work producer
//!
//! Turns a bundle into queue messages for the ingestion workers:
//!
//! ```text
//! bundle JSON ──▶ BundlePartitioner ──▶ [initiate_job] ──▶ WorkMessage ──▶ push exchange
//! ```
//!
//! Each `send_bundle` call opens its own publisher session, separate from
//! the consumer's subscription, and closes it when done.

use crate::broker::{
    push_routing_key, BrokerConnector, DeliveryMode, OutboundMessage, PublishError, Publisher,
};
use crate::control::ControlApi;
use crate::error::{ConnectError, Result};
use crate::retry::RetryPolicy;
use crate::state::CurrentWork;
use crate::types::SensitiveString;
use base64::Engine;
use bytes::Bytes;
use graphfeed_bundle::BundlePartitioner;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options of one `send_bundle` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    /// Entity types the ingestion workers should keep
    pub entities_types: Vec<String>,
    /// Whether existing objects may be updated
    pub update: bool,
    /// Partition the bundle before sending
    pub split: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            entities_types: Vec::new(),
            update: false,
            split: true,
        }
    }
}

impl SendOptions {
    /// Restrict ingestion to the given entity types (builder pattern)
    pub fn with_entities_types(mut self, types: Vec<String>) -> Self {
        self.entities_types = types;
        self
    }

    /// Allow updates of existing objects (builder pattern)
    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    /// Send the bundle as a single message (builder pattern)
    pub fn without_split(mut self) -> Self {
        self.split = false;
        self
    }
}

/// Message body pushed to the ingestion workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMessage {
    pub job_id: Option<String>,
    pub entities_types: Vec<String>,
    pub update: bool,
    pub token: String,
    /// Base64 of the bundle JSON
    pub content: String,
}

impl WorkMessage {
    /// Decode `content` back into the bundle JSON
    pub fn decode_content(&self) -> Result<String> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(&self.content)
            .map_err(|e| ConnectError::Serialization(format!("invalid base64 content: {}", e)))?;
        String::from_utf8(raw)
            .map_err(|e| ConnectError::Serialization(format!("content is not UTF-8: {}", e)))
    }
}

/// Publishes bundles to the push exchange
pub struct WorkProducer {
    connector_id: String,
    push_exchange: String,
    token: SensitiveString,
    broker: Arc<dyn BrokerConnector>,
    control: Arc<dyn ControlApi>,
    current_work: CurrentWork,
    retry: RetryPolicy,
    partitioner: BundlePartitioner,
}

impl WorkProducer {
    pub fn new(
        connector_id: impl Into<String>,
        push_exchange: impl Into<String>,
        token: SensitiveString,
        broker: Arc<dyn BrokerConnector>,
        control: Arc<dyn ControlApi>,
        current_work: CurrentWork,
    ) -> Self {
        Self {
            connector_id: connector_id.into(),
            push_exchange: push_exchange.into(),
            token,
            broker,
            control,
            current_work,
            retry: RetryPolicy::default(),
            partitioner: BundlePartitioner::new(),
        }
    }

    /// Set the unroutable retry policy (builder pattern)
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Partition `bundle` (unless disabled) and publish every partition.
    ///
    /// Returns the bundles that were sent. An empty bundle fails before any
    /// broker session is opened.
    pub async fn send_bundle(&self, bundle: &str, options: &SendOptions) -> Result<Vec<String>> {
        let bundles = if options.split {
            self.partitioner
                .partition_slice(bundle.as_bytes())?
                .iter()
                .map(|partition| partition.to_json())
                .collect::<graphfeed_bundle::Result<Vec<_>>>()?
        } else {
            vec![bundle.to_string()]
        };

        let mut publisher = self
            .broker
            .open_publisher()
            .await
            .map_err(|e| ConnectError::connection(e.to_string()))?;

        let result = self.publish_all(publisher.as_mut(), &bundles, options).await;

        if let Err(e) = publisher.close().await {
            warn!("Failed to close publisher session: {}", e);
        }

        result?;
        info!(
            connector_id = %self.connector_id,
            bundles = bundles.len(),
            "Bundle sent"
        );
        Ok(bundles)
    }

    async fn publish_all(
        &self,
        publisher: &mut dyn Publisher,
        bundles: &[String],
        options: &SendOptions,
    ) -> Result<()> {
        for bundle in bundles {
            let job_id = match self.current_work.get() {
                Some(work_id) => Some(self.control.initiate_job(&work_id).await?),
                None => None,
            };
            let message = self.build_message(bundle, job_id, options)?;
            self.publish_with_retry(publisher, message).await?;
        }
        Ok(())
    }

    fn build_message(
        &self,
        bundle: &str,
        job_id: Option<String>,
        options: &SendOptions,
    ) -> Result<OutboundMessage> {
        let body = WorkMessage {
            job_id,
            entities_types: options.entities_types.clone(),
            update: options.update,
            token: self.token.expose_secret().to_string(),
            content: base64::engine::general_purpose::STANDARD.encode(bundle.as_bytes()),
        };
        Ok(OutboundMessage {
            exchange: self.push_exchange.clone(),
            routing_key: push_routing_key(&self.connector_id),
            body: Bytes::from(serde_json::to_vec(&body)?),
            delivery_mode: DeliveryMode::Persistent,
        })
    }

    async fn publish_with_retry(
        &self,
        publisher: &mut dyn Publisher,
        message: OutboundMessage,
    ) -> Result<()> {
        let mut failures = 0u32;
        loop {
            match publisher.publish(message.clone()).await {
                Ok(()) => {
                    debug!(failures, routing_key = %message.routing_key, "Message published");
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    if !self.retry.record_failure(&mut failures) {
                        return Err(ConnectError::PublishUnroutable {
                            message: e.to_string(),
                            attempts: failures,
                        });
                    }
                    warn!(failures, "Publish failed ({}), retrying", e);
                    self.retry.wait().await;
                }
                Err(PublishError::ConnectionLost(msg)) => {
                    return Err(ConnectError::ConnectionLost(msg));
                }
                Err(e) => return Err(ConnectError::Publish(e.to_string())),
            }
        }
    }
}
