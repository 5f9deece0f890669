//! Control API seam
//!
//! Registration, job-status reporting and heartbeats go to the platform's
//! control API. The transport is an external collaborator; the runtime talks
//! to it through [`ControlApi`].

use crate::config::ConnectorType;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Job status transitions reported for a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Progress,
    Complete,
    Error,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progress => write!(f, "progress"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Identity a connector registers under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorRegistration {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub connector_type: ConnectorType,
    pub scope: Vec<String>,
}

/// Queue coordinates handed out at registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Broker URI
    pub uri: String,
    /// Queue this connector consumes work items from
    #[serde(rename = "listen")]
    pub listen_queue: String,
    /// Exchange partitions are pushed to
    pub push_exchange: String,
}

/// Registration answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredConnector {
    pub id: String,
    /// Serialized connector state, empty or absent when none is stored
    #[serde(default)]
    pub connector_state: Option<String>,
    pub config: QueueSettings,
}

/// Heartbeat answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    /// Authoritative serialized state, empty or absent when none is stored
    #[serde(default)]
    pub connector_state: Option<String>,
}

/// Platform control API
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Register the connector and fetch its queue coordinates
    async fn register(&self, registration: &ConnectorRegistration) -> Result<RegisteredConnector>;

    /// Create a job for `work_id`, returning its id
    async fn initiate_job(&self, work_id: &str) -> Result<String>;

    /// Report a job transition
    async fn update_job(
        &self,
        job_id: Option<&str>,
        status: JobStatus,
        messages: &[String],
    ) -> Result<()>;

    /// Send the local state, receive the authoritative one
    async fn ping(&self, connector_id: &str, state: Option<&Value>) -> Result<PingResponse>;
}

/// Decode a serialized connector state. Empty means no state.
pub fn decode_state(raw: Option<&str>) -> std::result::Result<Option<Value>, serde_json::Error> {
    match raw {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => serde_json::from_str(s).map(Some),
    }
}
