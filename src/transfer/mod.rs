//! Agent transfer orchestration.
//!
//! A transfer is created PENDING and returned to the caller immediately. A
//! supervised task then moves it to IN_PROGRESS and either parks it in the
//! target's offline mailbox, hands the agent state to the target's channel, or
//! applies the unrouted policy when the target has no channel.

pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelError, ChannelRegistry, DeliveryReport};
use crate::device::DeviceRegistry;
use crate::error::{Error, Result};
use crate::mailbox::{OfflineMailbox, Priority};
use crate::supervisor::Supervisor;

pub use types::{AgentTransfer, TransferFilter, TransferRequest, TransferStatus};

pub const TRANSFER_MESSAGE_TYPE: &str = "agent_transfer";

pub const META_QUEUED: &str = "queued_for_offline_delivery";
pub const META_OFFLINE_MESSAGE_ID: &str = "offline_message_id";
pub const META_RESULT: &str = "result";
pub const META_ERROR: &str = "error";
pub const META_UNCONFIRMED: &str = "delivery_unconfirmed";

/// What to do with a transfer whose online target has no delivery channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnroutedTransferPolicy {
    /// Mark COMPLETED without confirmation, flagged `delivery_unconfirmed`.
    #[default]
    AssumeDelivered,
    /// Mark FAILED.
    Fail,
    /// Park in the offline mailbox until a flush reaches the device.
    Queue,
}

#[derive(Debug)]
struct TransferSlot {
    record: AgentTransfer,
    cancel: CancellationToken,
}

#[derive(Debug)]
pub struct TransferOrchestrator {
    transfers: Mutex<HashMap<String, TransferSlot>>,
    registry: Arc<DeviceRegistry>,
    mailbox: Arc<OfflineMailbox>,
    channels: Arc<ChannelRegistry>,
    supervisor: Supervisor,
    policy: UnroutedTransferPolicy,
}

impl TransferOrchestrator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        mailbox: Arc<OfflineMailbox>,
        channels: Arc<ChannelRegistry>,
        supervisor: Supervisor,
        policy: UnroutedTransferPolicy,
    ) -> Self {
        Self {
            transfers: Mutex::new(HashMap::new()),
            registry,
            mailbox,
            channels,
            supervisor,
            policy,
        }
    }

    /// Validate both ends, record the transfer and schedule its processing.
    pub fn initiate_agent_transfer(self: &Arc<Self>, request: TransferRequest) -> Result<AgentTransfer> {
        for device_id in [&request.source_device_id, &request.target_device_id] {
            if !self.registry.contains(device_id) {
                return Err(Error::DeviceNotFound(device_id.clone()));
            }
        }

        let record = AgentTransfer::new(request);
        let cancel = self.supervisor.child_token();
        self.transfers.lock().insert(
            record.transfer_id.clone(),
            TransferSlot {
                record: record.clone(),
                cancel: cancel.clone(),
            },
        );
        tracing::info!(
            "Transfer {} created: agent {} {} -> {}",
            record.transfer_id,
            record.agent_id,
            record.source_device_id,
            record.target_device_id
        );

        let this = Arc::clone(self);
        let transfer_id = record.transfer_id.clone();
        self.supervisor.spawn("agent_transfer", async move {
            this.process(&transfer_id, cancel).await;
        });

        Ok(record)
    }

    async fn process(&self, transfer_id: &str, cancel: CancellationToken) {
        let Some(snapshot) = self.advance(transfer_id, TransferStatus::InProgress, |_| {}) else {
            tracing::debug!("Transfer {} no longer pending, skipping", transfer_id);
            return;
        };
        let payload = transfer_payload(&snapshot);
        let target_id = snapshot.target_device_id.as_str();

        let target = match self.registry.get_device_profile(target_id) {
            Ok(profile) => profile,
            Err(e) => {
                self.fail(transfer_id, e);
                return;
            }
        };

        if !target.is_online() {
            self.park_in_mailbox(transfer_id, target_id, payload);
            return;
        }

        let Some(channel) = self.channels.get(target_id) else {
            self.handle_unrouted(transfer_id, target_id, payload);
            return;
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Transfer {} cancelled while delivering", transfer_id);
                return;
            }
            outcome = self.channels.invoke(channel.as_ref(), target_id, &payload) => outcome,
        };

        match outcome
            .map_err(|e| e.to_string())
            .and_then(DeliveryReport::into_result)
        {
            Ok(report) => self.complete(transfer_id, report),
            Err(e) => self.fail(transfer_id, Error::Callback(e)),
        }
    }

    /// Park the transfer as PENDING before its payload becomes visible in the
    /// mailbox, so a flush racing with this call always finds it parked.
    fn park_in_mailbox(&self, transfer_id: &str, target_id: &str, payload: Value) {
        let parked = self.advance(transfer_id, TransferStatus::Pending, |record| {
            record.transfer_metadata.insert(META_QUEUED.to_string(), Value::Bool(true));
        });
        if parked.is_none() {
            return;
        }

        let queued = self
            .mailbox
            .store_offline_message(target_id, payload, Priority::High, None);

        let mut transfers = self.transfers.lock();
        let Some(slot) = transfers.get_mut(transfer_id) else {
            return;
        };
        let status = slot.record.status;
        match status {
            TransferStatus::Pending => {
                slot.record.transfer_metadata.insert(
                    META_OFFLINE_MESSAGE_ID.to_string(),
                    Value::from(queued.message_id.clone()),
                );
                drop(transfers);
                tracing::info!("Transfer {} queued for offline device {}", transfer_id, target_id);
            }
            TransferStatus::Cancelled => {
                drop(transfers);
                self.mailbox.remove(&queued.message_id);
                tracing::debug!("Transfer {} cancelled while queueing", transfer_id);
            }
            // A flush already delivered or rejected it.
            _ => {}
        }
    }

    fn handle_unrouted(&self, transfer_id: &str, target_id: &str, payload: Value) {
        match self.policy {
            UnroutedTransferPolicy::AssumeDelivered => {
                tracing::warn!(
                    "No channel for {}; marking transfer {} completed without confirmation",
                    target_id,
                    transfer_id
                );
                self.advance(transfer_id, TransferStatus::Completed, |record| {
                    record
                        .transfer_metadata
                        .insert(META_UNCONFIRMED.to_string(), Value::Bool(true));
                });
            }
            UnroutedTransferPolicy::Fail => {
                let missing = ChannelError::NotRegistered(target_id.to_string());
                self.fail(transfer_id, Error::Callback(missing.to_string()));
            }
            UnroutedTransferPolicy::Queue => self.park_in_mailbox(transfer_id, target_id, payload),
        }
    }

    fn complete(&self, transfer_id: &str, report: DeliveryReport) {
        let result = serde_json::to_value(&report).unwrap_or(Value::Null);
        if self
            .advance(transfer_id, TransferStatus::Completed, |record| {
                record.transfer_metadata.insert(META_RESULT.to_string(), result);
            })
            .is_some()
        {
            tracing::info!("Transfer {} completed", transfer_id);
        }
    }

    fn fail(&self, transfer_id: &str, error: Error) {
        tracing::warn!("Transfer {} failed: {}", transfer_id, error);
        self.advance(transfer_id, TransferStatus::Failed, |record| {
            record
                .transfer_metadata
                .insert(META_ERROR.to_string(), Value::String(error.to_string()));
        });
    }

    /// Apply a transition and its metadata edit atomically. Returns the updated
    /// record, or `None` if the edge is illegal from the current state.
    fn advance<F>(&self, transfer_id: &str, next: TransferStatus, edit: F) -> Option<AgentTransfer>
    where
        F: FnOnce(&mut AgentTransfer),
    {
        let mut transfers = self.transfers.lock();
        let slot = transfers.get_mut(transfer_id)?;
        let from = slot.record.status;
        if !slot.record.transition(next) {
            tracing::debug!("Transfer {} ignored {} -> {}", transfer_id, from, next);
            return None;
        }
        edit(&mut slot.record);
        tracing::debug!("Transfer {} {} -> {}", transfer_id, from, next);
        Some(slot.record.clone())
    }

    /// Finish a parked transfer whose queued payload reached the device.
    pub fn complete_from_mailbox(&self, transfer_id: &str, report: DeliveryReport) -> bool {
        if !self.resume_parked(transfer_id) {
            return false;
        }
        let result = serde_json::to_value(&report).unwrap_or(Value::Null);
        self.advance(transfer_id, TransferStatus::Completed, |record| {
            record.transfer_metadata.insert(META_RESULT.to_string(), result);
            record.transfer_metadata.remove(META_OFFLINE_MESSAGE_ID);
        })
        .is_some()
    }

    /// Fail a parked transfer whose queued payload could not reach the device intact.
    pub fn fail_from_mailbox(&self, transfer_id: &str, error: Error) -> bool {
        if !self.resume_parked(transfer_id) {
            return false;
        }
        tracing::warn!("Transfer {} failed in mailbox: {}", transfer_id, error);
        self.advance(transfer_id, TransferStatus::Failed, |record| {
            record
                .transfer_metadata
                .insert(META_ERROR.to_string(), Value::String(error.to_string()));
            record.transfer_metadata.remove(META_OFFLINE_MESSAGE_ID);
        })
        .is_some()
    }

    fn resume_parked(&self, transfer_id: &str) -> bool {
        self.advance(transfer_id, TransferStatus::InProgress, |_| {})
            .is_some()
    }

    /// Cancel a PENDING or IN_PROGRESS transfer. Returns `false` for terminal ones.
    pub fn cancel_agent_transfer(&self, transfer_id: &str) -> Result<bool> {
        let mut transfers = self.transfers.lock();
        let slot = transfers
            .get_mut(transfer_id)
            .ok_or_else(|| Error::TransferNotFound(transfer_id.to_string()))?;
        if !slot.record.transition(TransferStatus::Cancelled) {
            return Ok(false);
        }
        slot.cancel.cancel();
        let queued = slot
            .record
            .transfer_metadata
            .get(META_OFFLINE_MESSAGE_ID)
            .and_then(Value::as_str)
            .map(str::to_string);
        drop(transfers);

        if let Some(message_id) = queued {
            self.mailbox.remove(&message_id);
        }
        tracing::info!("Transfer {} cancelled", transfer_id);
        Ok(true)
    }

    pub fn get_agent_transfer(&self, transfer_id: &str) -> Result<AgentTransfer> {
        self.transfers
            .lock()
            .get(transfer_id)
            .map(|slot| slot.record.clone())
            .ok_or_else(|| Error::TransferNotFound(transfer_id.to_string()))
    }

    /// Snapshot ordered by start time.
    pub fn list_agent_transfers(&self, filter: &TransferFilter) -> Vec<AgentTransfer> {
        let mut transfers: Vec<AgentTransfer> = self
            .transfers
            .lock()
            .values()
            .map(|slot| &slot.record)
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        transfers.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.transfer_id.cmp(&b.transfer_id))
        });
        transfers
    }

    pub fn status_counts(&self) -> HashMap<TransferStatus, usize> {
        let mut counts = HashMap::new();
        for slot in self.transfers.lock().values() {
            *counts.entry(slot.record.status).or_insert(0) += 1;
        }
        counts
    }
}

/// Payload handed to the target device (or its mailbox).
pub fn transfer_payload(transfer: &AgentTransfer) -> Value {
    json!({
        "message_type": TRANSFER_MESSAGE_TYPE,
        "transfer_id": transfer.transfer_id,
        "agent_id": transfer.agent_id,
        "agent_state": transfer.agent_state,
        "source_device_id": transfer.source_device_id,
        "metadata": transfer.transfer_metadata,
    })
}

/// The transfer id carried by a queued agent-transfer payload, if any.
pub fn queued_transfer_id(message: &Value) -> Option<&str> {
    if message.get("message_type").and_then(Value::as_str) != Some(TRANSFER_MESSAGE_TYPE) {
        return None;
    }
    message.get("transfer_id").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{channel_fn, ChannelError};
    use crate::device::{CapabilityLevel, ConnectionType, DeviceRegistration};
    use crate::optimizer::MessageOptimizer;
    use std::time::Duration;

    struct Harness {
        mailbox: Arc<OfflineMailbox>,
        channels: Arc<ChannelRegistry>,
        supervisor: Supervisor,
        orchestrator: Arc<TransferOrchestrator>,
    }

    fn harness(policy: UnroutedTransferPolicy) -> Harness {
        let registry = Arc::new(DeviceRegistry::new());
        let channels = Arc::new(ChannelRegistry::new(Duration::from_millis(200)));
        let mailbox = Arc::new(OfflineMailbox::new(
            registry.clone(),
            channels.clone(),
            Arc::new(MessageOptimizer::default()),
        ));
        let supervisor = Supervisor::new();
        let orchestrator = Arc::new(TransferOrchestrator::new(
            registry.clone(),
            mailbox.clone(),
            channels.clone(),
            supervisor.clone(),
            policy,
        ));

        registry.register_device(DeviceRegistration::new(
            "A",
            CapabilityLevel::Full,
            ConnectionType::Wifi,
            1 << 20,
        ));
        registry.register_device(DeviceRegistration::new(
            "B",
            CapabilityLevel::Low,
            ConnectionType::Offline,
            256,
        ));
        registry.register_device(DeviceRegistration::new(
            "C",
            CapabilityLevel::High,
            ConnectionType::Wired,
            1 << 16,
        ));

        Harness {
            mailbox,
            channels,
            supervisor,
            orchestrator,
        }
    }

    fn request(target: &str) -> TransferRequest {
        TransferRequest::new("a1", "A", target, json!({"memory": [1, 2, 3]}))
    }

    #[tokio::test]
    async fn test_unknown_device_creates_nothing() {
        let h = harness(UnroutedTransferPolicy::AssumeDelivered);
        let err = h
            .orchestrator
            .initiate_agent_transfer(request("Z"))
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(id) if id == "Z"));
        assert!(h.orchestrator.list_agent_transfers(&TransferFilter::default()).is_empty());
    }

    #[tokio::test]
    async fn test_offline_target_parks_transfer() {
        let h = harness(UnroutedTransferPolicy::AssumeDelivered);
        let created = h.orchestrator.initiate_agent_transfer(request("B")).unwrap();
        assert_eq!(created.status, TransferStatus::Pending);

        h.supervisor.drain().await;

        let transfer = h.orchestrator.get_agent_transfer(&created.transfer_id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Pending);
        assert_eq!(transfer.transfer_metadata[META_QUEUED], true);

        let queued = h.mailbox.get_offline_messages(Some("B"), false);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].priority, Priority::High);
        assert_eq!(queued[0].message["message_type"], TRANSFER_MESSAGE_TYPE);
        assert_eq!(queued_transfer_id(&queued[0].message), Some(created.transfer_id.as_str()));
    }

    #[tokio::test]
    async fn test_channel_success_completes() {
        let h = harness(UnroutedTransferPolicy::AssumeDelivered);
        h.channels.register(
            "C",
            channel_fn(|_, payload| async move {
                Ok::<_, ChannelError>(
                    DeliveryReport::delivered().with_detail(json!({"agent": payload["agent_id"]})),
                )
            }),
        );

        let created = h.orchestrator.initiate_agent_transfer(request("C")).unwrap();
        h.supervisor.drain().await;

        let transfer = h.orchestrator.get_agent_transfer(&created.transfer_id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Completed);
        assert!(transfer.completion_time.is_some());
        assert_eq!(transfer.transfer_metadata[META_RESULT]["detail"]["agent"], "a1");
    }

    #[tokio::test]
    async fn test_channel_rejection_fails() {
        let h = harness(UnroutedTransferPolicy::AssumeDelivered);
        h.channels.register(
            "C",
            channel_fn(|_, _| async { Ok::<_, ChannelError>(DeliveryReport::rejected("no space")) }),
        );

        let created = h.orchestrator.initiate_agent_transfer(request("C")).unwrap();
        h.supervisor.drain().await;

        let transfer = h.orchestrator.get_agent_transfer(&created.transfer_id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Failed);
        assert_eq!(transfer.transfer_metadata[META_ERROR], "Callback error: no space");
    }

    #[tokio::test]
    async fn test_channel_error_and_timeout_fail() {
        let h = harness(UnroutedTransferPolicy::AssumeDelivered);
        h.channels.register(
            "C",
            channel_fn(|_, _| async {
                Err::<DeliveryReport, _>(ChannelError::transport("socket closed"))
            }),
        );
        h.channels.register(
            "A",
            channel_fn(|_, _| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, ChannelError>(DeliveryReport::delivered())
            }),
        );

        let broken = h.orchestrator.initiate_agent_transfer(request("C")).unwrap();
        let slow = h
            .orchestrator
            .initiate_agent_transfer(TransferRequest::new("a2", "C", "A", json!({})))
            .unwrap();
        h.supervisor.drain().await;

        let broken = h.orchestrator.get_agent_transfer(&broken.transfer_id).unwrap();
        assert_eq!(broken.status, TransferStatus::Failed);
        assert_eq!(broken.transfer_metadata[META_ERROR], "Callback error: socket closed");

        let slow = h.orchestrator.get_agent_transfer(&slow.transfer_id).unwrap();
        assert_eq!(slow.status, TransferStatus::Failed);
        assert_eq!(
            slow.transfer_metadata[META_ERROR],
            "Callback error: Delivery timed out after 200ms"
        );
    }

    #[tokio::test]
    async fn test_unrouted_policies() {
        let h = harness(UnroutedTransferPolicy::AssumeDelivered);
        let t = h.orchestrator.initiate_agent_transfer(request("C")).unwrap();
        h.supervisor.drain().await;
        let t = h.orchestrator.get_agent_transfer(&t.transfer_id).unwrap();
        assert_eq!(t.status, TransferStatus::Completed);
        assert_eq!(t.transfer_metadata[META_UNCONFIRMED], true);

        let h = harness(UnroutedTransferPolicy::Fail);
        let t = h.orchestrator.initiate_agent_transfer(request("C")).unwrap();
        h.supervisor.drain().await;
        let t = h.orchestrator.get_agent_transfer(&t.transfer_id).unwrap();
        assert_eq!(t.status, TransferStatus::Failed);
        assert_eq!(
            t.transfer_metadata[META_ERROR],
            "Callback error: No delivery channel registered for device C"
        );

        let h = harness(UnroutedTransferPolicy::Queue);
        let t = h.orchestrator.initiate_agent_transfer(request("C")).unwrap();
        h.supervisor.drain().await;
        let t = h.orchestrator.get_agent_transfer(&t.transfer_id).unwrap();
        assert_eq!(t.status, TransferStatus::Pending);
        assert_eq!(h.mailbox.get_offline_messages(Some("C"), false).len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_and_completed() {
        let h = harness(UnroutedTransferPolicy::AssumeDelivered);
        let parked = h.orchestrator.initiate_agent_transfer(request("B")).unwrap();
        h.supervisor.drain().await;

        assert!(h.orchestrator.cancel_agent_transfer(&parked.transfer_id).unwrap());
        let parked = h.orchestrator.get_agent_transfer(&parked.transfer_id).unwrap();
        assert_eq!(parked.status, TransferStatus::Cancelled);
        assert!(parked.completion_time.is_some());
        assert!(h.mailbox.get_offline_messages(Some("B"), true).is_empty());

        let done = h.orchestrator.initiate_agent_transfer(request("C")).unwrap();
        h.supervisor.drain().await;
        let before = h.orchestrator.get_agent_transfer(&done.transfer_id).unwrap();
        assert_eq!(before.status, TransferStatus::Completed);
        assert!(!h.orchestrator.cancel_agent_transfer(&done.transfer_id).unwrap());
        assert_eq!(h.orchestrator.get_agent_transfer(&done.transfer_id).unwrap(), before);

        assert!(matches!(
            h.orchestrator.cancel_agent_transfer("nope"),
            Err(Error::TransferNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_inflight_delivery() {
        let h = harness(UnroutedTransferPolicy::AssumeDelivered);
        h.channels.register(
            "C",
            channel_fn(|_, _| async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok::<_, ChannelError>(DeliveryReport::delivered())
            }),
        );

        let created = h.orchestrator.initiate_agent_transfer(request("C")).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            h.orchestrator.get_agent_transfer(&created.transfer_id).unwrap().status,
            TransferStatus::InProgress
        );

        assert!(h.orchestrator.cancel_agent_transfer(&created.transfer_id).unwrap());
        h.supervisor.drain().await;
        let transfer = h.orchestrator.get_agent_transfer(&created.transfer_id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Cancelled);
        assert!(transfer.transfer_metadata.get(META_RESULT).is_none());
    }

    #[tokio::test]
    async fn test_complete_from_mailbox() {
        let h = harness(UnroutedTransferPolicy::AssumeDelivered);
        let parked = h.orchestrator.initiate_agent_transfer(request("B")).unwrap();
        h.supervisor.drain().await;

        assert!(h
            .orchestrator
            .complete_from_mailbox(&parked.transfer_id, DeliveryReport::delivered()));
        let transfer = h.orchestrator.get_agent_transfer(&parked.transfer_id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Completed);
        assert_eq!(transfer.transfer_metadata[META_QUEUED], true);
        assert!(!h
            .orchestrator
            .complete_from_mailbox(&parked.transfer_id, DeliveryReport::delivered()));

        let counts = h.orchestrator.status_counts();
        assert_eq!(counts[&TransferStatus::Completed], 1);
    }

    #[tokio::test]
    async fn test_parked_transfer_records_its_mailbox_entry() {
        let h = harness(UnroutedTransferPolicy::AssumeDelivered);
        let parked = h.orchestrator.initiate_agent_transfer(request("B")).unwrap();
        h.supervisor.drain().await;

        let transfer = h.orchestrator.get_agent_transfer(&parked.transfer_id).unwrap();
        let queued = h.mailbox.get_offline_messages(Some("B"), false);
        assert_eq!(queued.len(), 1);
        assert_eq!(
            transfer.transfer_metadata[META_OFFLINE_MESSAGE_ID],
            queued[0].message_id.as_str()
        );
        assert_eq!(queued_transfer_id(&queued[0].message), Some(parked.transfer_id.as_str()));
    }

    #[tokio::test]
    async fn test_fail_from_mailbox() {
        let h = harness(UnroutedTransferPolicy::AssumeDelivered);
        let parked = h.orchestrator.initiate_agent_transfer(request("B")).unwrap();
        h.supervisor.drain().await;

        assert!(h.orchestrator.fail_from_mailbox(
            &parked.transfer_id,
            Error::MessageTooLarge { size: 900, max: 256 }
        ));
        let transfer = h.orchestrator.get_agent_transfer(&parked.transfer_id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Failed);
        assert!(transfer.completion_time.is_some());
        assert_eq!(
            transfer.transfer_metadata[META_ERROR],
            "Message too large for device: 900 bytes exceeds 256 bytes"
        );
        assert!(!transfer.transfer_metadata.contains_key(META_OFFLINE_MESSAGE_ID));

        // Terminal records are left alone.
        assert!(!h
            .orchestrator
            .complete_from_mailbox(&parked.transfer_id, DeliveryReport::delivered()));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let h = harness(UnroutedTransferPolicy::AssumeDelivered);
        h.orchestrator.initiate_agent_transfer(request("B")).unwrap();
        h.orchestrator.initiate_agent_transfer(request("C")).unwrap();
        h.orchestrator
            .initiate_agent_transfer(TransferRequest::new("a2", "C", "A", json!({})))
            .unwrap();
        h.supervisor.drain().await;

        let all = h.orchestrator.list_agent_transfers(&TransferFilter::default());
        assert_eq!(all.len(), 3);

        let a1 = h.orchestrator.list_agent_transfers(&TransferFilter {
            agent_id: Some("a1".into()),
            ..Default::default()
        });
        assert_eq!(a1.len(), 2);

        let touching_c = h.orchestrator.list_agent_transfers(&TransferFilter {
            device_id: Some("C".into()),
            ..Default::default()
        });
        assert_eq!(touching_c.len(), 2);

        let pending = h.orchestrator.list_agent_transfers(&TransferFilter {
            status: Some(TransferStatus::Pending),
            ..Default::default()
        });
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].target_device_id, "B");
    }
}
