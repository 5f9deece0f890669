//! graphfeed-connect - connector runtime for graph ingestion
//!
//! Connectors feed a threat-intelligence graph platform through a durable
//! work queue. This crate is the runtime they share: it partitions bundles
//! and pushes them to the queue, consumes inbound work items, reports job
//! status and keeps the connector state in sync with the platform.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────┐  register / job status / ping  ┌─────────────┐
//!              │  Connector   │◀──────────────────────────────▶│ Control API │
//!              └──────┬───────┘                                └─────────────┘
//!        send_bundle  │  listen
//!    ┌────────────────┴───────────────┐
//!    ▼                                ▼
//! ┌──────────────┐  push exchange  ┌──────────────┐
//! │ WorkProducer │───────────────▶ │    Broker    │ ──▶ ingestion workers
//! └──────────────┘                 └──────┬───────┘
//!                                         │ listen queue
//!                                         ▼
//!                                  ┌──────────────┐
//!                                  │ WorkConsumer │──▶ MessageHandler
//!                                  └──────────────┘
//! ```
//!
//! The broker wire client and the control API transport are external; they
//! plug in through the [`broker`] and [`control`] traits. The [`memory`]
//! module implements both in process.

pub mod broker;
pub mod config;
pub mod connector;
pub mod consumer;
pub mod control;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod logging;
pub mod memory;
pub mod producer;
pub mod retry;
pub mod state;
pub mod types;

pub use broker::{
    BrokerConnector, Delivery, OutboundMessage, PublishError, Publisher, Subscription,
};
pub use config::{ConfigFile, ConfigResolver, ConnectorSettings, ConnectorType, RuntimeSettings};
pub use connector::{date_now, Connector};
pub use consumer::{
    handler_fn, ConsumerPolicy, MalformedPayloadPolicy, MessageHandler, WorkConsumer, WorkItem,
};
pub use control::{ControlApi, JobStatus};
pub use error::{ConnectError, ConnectorStatus, Result};
pub use heartbeat::{HeartbeatMonitor, HeartbeatOutcome};
pub use memory::{MemoryBroker, MemoryControlApi};
pub use producer::{SendOptions, WorkMessage, WorkProducer};
pub use retry::RetryPolicy;
pub use state::{CurrentWork, StateStore};
pub use types::SensitiveString;
