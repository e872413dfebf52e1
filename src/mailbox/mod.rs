//! Offline mailbox: priority/TTL buffer for devices that cannot be reached.
//!
//! Records are indexed by message id and by target device. A flush hands the
//! device's records to its channel in priority order, removing what was
//! delivered and keeping the rest for the next attempt.

pub mod message;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::{ChannelRegistry, DeliveryReport};
use crate::device::DeviceRegistry;
use crate::error::{Error, Result};
use crate::optimizer::{MessageOptimizer, Strategy};

pub use message::{OfflineMessage, Priority};

#[derive(Debug, Default)]
struct MailboxState {
    messages: HashMap<String, OfflineMessage>,
    by_device: HashMap<String, HashSet<String>>,
    next_seq: u64,
}

impl MailboxState {
    fn insert(&mut self, message: OfflineMessage) {
        self.by_device
            .entry(message.target_device_id.clone())
            .or_default()
            .insert(message.message_id.clone());
        self.messages.insert(message.message_id.clone(), message);
    }

    fn remove(&mut self, message_id: &str) -> Option<OfflineMessage> {
        let message = self.messages.remove(message_id)?;
        if let Some(ids) = self.by_device.get_mut(&message.target_device_id) {
            ids.remove(message_id);
            if ids.is_empty() {
                self.by_device.remove(&message.target_device_id);
            }
        }
        Some(message)
    }

    fn for_device(&self, device_id: &str) -> Vec<OfflineMessage> {
        self.by_device
            .get(device_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.messages.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A queued record that reached its device.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub message_id: String,
    /// The record as queued, before shaping.
    pub message: Value,
    /// How the optimizer shaped what was actually sent.
    pub strategy: Strategy,
    pub original_size: usize,
    pub max_size: usize,
    pub report: DeliveryReport,
}

impl Delivered {
    /// Whether the device received the queued message in full.
    pub fn is_intact(&self) -> bool {
        matches!(self.strategy, Strategy::Unchanged | Strategy::Compressed)
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default)]
pub struct DeliverySummary {
    pub delivered: Vec<Delivered>,
    pub failed: Vec<String>,
    pub expired: usize,
}

impl DeliverySummary {
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "delivered": self.delivered.len(),
            "failed": self.failed.len(),
            "expired": self.expired,
        })
    }
}

/// Per-device mailbox statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MailboxStats {
    pub device_id: String,
    pub queued: usize,
    pub expired: usize,
    pub max_attempts: u32,
}

/// Removes the device from the in-flight set when a flush ends.
struct FlushGuard<'a> {
    flushing: &'a Mutex<HashSet<String>>,
    device_id: String,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flushing.lock().remove(&self.device_id);
    }
}

#[derive(Debug)]
pub struct OfflineMailbox {
    state: Mutex<MailboxState>,
    flushing: Mutex<HashSet<String>>,
    registry: Arc<DeviceRegistry>,
    channels: Arc<ChannelRegistry>,
    optimizer: Arc<MessageOptimizer>,
}

impl OfflineMailbox {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        channels: Arc<ChannelRegistry>,
        optimizer: Arc<MessageOptimizer>,
    ) -> Self {
        Self {
            state: Mutex::new(MailboxState::default()),
            flushing: Mutex::new(HashSet::new()),
            registry,
            channels,
            optimizer,
        }
    }

    pub fn store_offline_message(
        &self,
        target_device_id: &str,
        message: Value,
        priority: Priority,
        ttl: Option<Duration>,
    ) -> OfflineMessage {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let record = OfflineMessage::new(target_device_id, message, priority, ttl, seq);
        state.insert(record.clone());
        drop(state);

        tracing::debug!(
            "Queued offline message {} for {} ({})",
            record.message_id,
            target_device_id,
            priority
        );
        record
    }

    /// Flush a device's queue through its channel.
    ///
    /// Fails with `DeviceOffline` while the device is still offline. A second
    /// flush for a device that is already being flushed returns an empty summary.
    pub async fn deliver_offline_messages(&self, device_id: &str) -> Result<DeliverySummary> {
        let profile = self.registry.get_device_profile(device_id)?;
        if !profile.is_online() {
            return Err(Error::DeviceOffline(device_id.to_string()));
        }

        if !self.flushing.lock().insert(device_id.to_string()) {
            tracing::debug!("Flush already in progress for {}", device_id);
            return Ok(DeliverySummary::default());
        }
        let _guard = FlushGuard {
            flushing: &self.flushing,
            device_id: device_id.to_string(),
        };

        let mut summary = DeliverySummary::default();
        let now = Utc::now();
        let mut pending = {
            let mut state = self.state.lock();
            let mut pending = Vec::new();
            for record in state.for_device(device_id) {
                if record.is_expired_at(now) {
                    state.remove(&record.message_id);
                    summary.expired += 1;
                } else {
                    pending.push(record);
                }
            }
            pending
        };
        pending.sort_by(OfflineMessage::delivery_order);

        if summary.expired > 0 {
            tracing::debug!("Dropped {} expired messages for {}", summary.expired, device_id);
        }

        for record in pending {
            let shaped = self.optimizer.optimize(Some(&profile), &record.message);
            let outcome = self
                .channels
                .dispatch(device_id, &shaped.message)
                .await
                .map_err(|e| e.to_string())
                .and_then(DeliveryReport::into_result);

            let mut state = self.state.lock();
            match outcome {
                Ok(report) => {
                    state.remove(&record.message_id);
                    summary.delivered.push(Delivered {
                        message_id: record.message_id,
                        message: record.message,
                        strategy: shaped.strategy,
                        original_size: shaped.original_size,
                        max_size: profile.max_message_size,
                        report,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Offline delivery of {} to {} failed: {}",
                        record.message_id,
                        device_id,
                        e
                    );
                    if let Some(stored) = state.messages.get_mut(&record.message_id) {
                        stored.record_failed_attempt();
                    }
                    summary.failed.push(record.message_id);
                }
            }
        }

        tracing::info!(
            "Flushed mailbox for {}: {} delivered, {} failed, {} expired",
            device_id,
            summary.delivered.len(),
            summary.failed.len(),
            summary.expired
        );
        Ok(summary)
    }

    /// Snapshot in delivery order, optionally scoped to one device.
    pub fn get_offline_messages(
        &self,
        device_id: Option<&str>,
        include_expired: bool,
    ) -> Vec<OfflineMessage> {
        let now = Utc::now();
        let state = self.state.lock();
        let mut messages: Vec<OfflineMessage> = match device_id {
            Some(id) => state.for_device(id),
            None => state.messages.values().cloned().collect(),
        };
        drop(state);

        messages.retain(|m| include_expired || !m.is_expired_at(now));
        messages.sort_by(|a, b| {
            a.target_device_id
                .cmp(&b.target_device_id)
                .then_with(|| OfflineMessage::delivery_order(a, b))
        });
        messages
    }

    /// Sweep expired records for every device. Returns how many were removed.
    pub fn clear_expired_messages(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .messages
            .values()
            .filter(|m| m.is_expired_at(now))
            .map(|m| m.message_id.clone())
            .collect();
        for id in &expired {
            state.remove(id);
        }
        drop(state);

        if !expired.is_empty() {
            tracing::debug!("Cleared {} expired offline messages", expired.len());
        }
        expired.len()
    }

    pub fn remove(&self, message_id: &str) -> Option<OfflineMessage> {
        self.state.lock().remove(message_id)
    }

    pub fn stats(&self) -> Vec<MailboxStats> {
        let now = Utc::now();
        let state = self.state.lock();
        let mut stats: BTreeMap<&str, MailboxStats> = BTreeMap::new();
        for message in state.messages.values() {
            let entry = stats
                .entry(message.target_device_id.as_str())
                .or_insert_with(|| MailboxStats {
                    device_id: message.target_device_id.clone(),
                    queued: 0,
                    expired: 0,
                    max_attempts: 0,
                });
            entry.queued += 1;
            if message.is_expired_at(now) {
                entry.expired += 1;
            }
            entry.max_attempts = entry.max_attempts.max(message.delivery_attempts);
        }
        stats.into_values().collect()
    }
}
