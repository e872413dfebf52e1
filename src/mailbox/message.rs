//! Queued messages awaiting an offline device.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delivery priority. Declaration order is delivery order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Lower rank is delivered first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineMessage {
    pub message_id: String,
    pub target_device_id: String,
    pub message: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub delivery_attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    /// Insertion order, breaks ties between equal timestamps.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl OfflineMessage {
    pub(crate) fn new(
        target_device_id: impl Into<String>,
        message: Value,
        priority: Priority,
        ttl: Option<Duration>,
        seq: u64,
    ) -> Self {
        let now = Utc::now();
        // A TTL too large to represent means the message never expires.
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));
        Self {
            message_id: ulid::Ulid::new().to_string(),
            target_device_id: target_device_id.into(),
            message,
            created_at: now,
            expires_at,
            priority,
            delivery_attempts: 0,
            last_attempt: None,
            seq,
        }
    }

    /// Expired once the clock reaches `expires_at`; a zero TTL is expired on arrival.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub(crate) fn record_failed_attempt(&mut self) {
        self.delivery_attempts += 1;
        self.last_attempt = Some(Utc::now());
    }

    /// Priority rank, then age, then insertion order.
    pub fn delivery_order(a: &OfflineMessage, b: &OfflineMessage) -> Ordering {
        a.priority
            .rank()
            .cmp(&b.priority.rank())
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.seq.cmp(&b.seq))
    }
}
