//! Broker seam
//!
//! The wire client talking to the queue broker lives outside this crate.
//! The runtime only needs three capabilities, expressed as traits:
//!
//! - open a publish-only session ([`Publisher`])
//! - subscribe to a queue ([`Subscription`])
//! - acknowledge or reject a delivery
//!
//! Publisher sessions and subscriptions are always distinct objects, so the
//! producer never shares a channel with the consumer.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Message persistence requested from the broker. Work messages are
/// always written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    #[default]
    Persistent,
}

/// A message ready to publish
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Bytes,
    pub delivery_mode: DeliveryMode,
}

/// A message received from a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker tag used to acknowledge this delivery
    pub delivery_tag: u64,
    pub body: Bytes,
}

/// Publish failures, classified the way the retry logic needs them
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PublishError {
    /// No queue bound for the routing key
    #[error("message unroutable: {0}")]
    Unroutable(String),

    /// Broker negatively acknowledged the message
    #[error("message nacked by broker: {0}")]
    Nacked(String),

    /// Session dropped
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl PublishError {
    /// Whether the same message should be published again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unroutable(_) | Self::Nacked(_))
    }
}

/// Broker failures outside of publishing
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BrokerError {
    #[error("connection error: {0}")]
    Connection(String),
}

/// Publish-only broker session
#[async_trait]
pub trait Publisher: Send {
    /// Publish one message and wait for the broker's confirmation
    async fn publish(&mut self, message: OutboundMessage) -> Result<(), PublishError>;

    /// Close the session
    async fn close(self: Box<Self>) -> Result<(), BrokerError>;
}

/// Long-lived consuming session on one queue
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `Ok(None)` means the broker closed the
    /// subscription cleanly.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError>;

    /// Acknowledge a delivery
    async fn ack(&mut self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Negatively acknowledge a delivery without requeueing it
    async fn reject(&mut self, delivery_tag: u64) -> Result<(), BrokerError>;
}

/// Factory for broker sessions
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a new publish-only session
    async fn open_publisher(&self) -> Result<Box<dyn Publisher>, BrokerError>;

    /// Subscribe to `queue` with a prefetch of one message
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// Routing key the ingestion workers bind for a connector
pub fn push_routing_key(connector_id: &str) -> String {
    format!("push_routing_{}", connector_id)
}
