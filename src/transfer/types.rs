//! Agent transfer records and their state machine.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    /// Legal edges. `InProgress -> Pending` parks a transfer queued for an offline target.
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Pending)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Pending, Cancelled)
                | (InProgress, Cancelled)
        )
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TransferStatus::Pending),
            "in_progress" => Ok(TransferStatus::InProgress),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            "cancelled" => Ok(TransferStatus::Cancelled),
            _ => Err(format!("Unknown transfer status: {}", s)),
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::InProgress => "in_progress",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Relocation of an agent's runtime state between two devices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTransfer {
    pub transfer_id: String,
    pub agent_id: String,
    pub source_device_id: String,
    pub target_device_id: String,
    pub status: TransferStatus,
    pub start_time: DateTime<Utc>,
    /// Set exactly when `status` is terminal.
    pub completion_time: Option<DateTime<Utc>>,
    pub agent_state: Value,
    #[serde(default)]
    pub transfer_metadata: HashMap<String, Value>,
}

impl AgentTransfer {
    pub(crate) fn new(request: TransferRequest) -> Self {
        Self {
            transfer_id: uuid::Uuid::new_v4().to_string(),
            agent_id: request.agent_id,
            source_device_id: request.source_device_id,
            target_device_id: request.target_device_id,
            status: TransferStatus::Pending,
            start_time: Utc::now(),
            completion_time: None,
            agent_state: request.agent_state,
            transfer_metadata: request.metadata,
        }
    }

    /// Move to `next` if the edge is legal. Terminal records never change.
    pub(crate) fn transition(&mut self, next: TransferStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.completion_time = Some(Utc::now());
        }
        true
    }

    pub fn involves(&self, device_id: &str) -> bool {
        self.source_device_id == device_id || self.target_device_id == device_id
    }
}

/// Caller-supplied fields for a new transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub agent_id: String,
    pub source_device_id: String,
    pub target_device_id: String,
    pub agent_state: Value,
    pub metadata: HashMap<String, Value>,
}

impl TransferRequest {
    pub fn new(
        agent_id: impl Into<String>,
        source_device_id: impl Into<String>,
        target_device_id: impl Into<String>,
        agent_state: Value,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            source_device_id: source_device_id.into(),
            target_device_id: target_device_id.into(),
            agent_state,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferFilter {
    pub agent_id: Option<String>,
    /// Matches either end of the transfer.
    pub device_id: Option<String>,
    pub status: Option<TransferStatus>,
}

impl TransferFilter {
    pub fn matches(&self, transfer: &AgentTransfer) -> bool {
        self.agent_id.as_ref().map_or(true, |id| &transfer.agent_id == id)
            && self.device_id.as_ref().map_or(true, |id| transfer.involves(id))
            && self.status.map_or(true, |status| transfer.status == status)
    }
}
