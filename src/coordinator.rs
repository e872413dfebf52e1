//! The coordinator wires the registry, channels, optimizer, mailbox and
//! transfer orchestrator together and owns their background work.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::{ChannelError, ChannelRegistry, DeliveryReport, DeviceChannel};
use crate::config::Settings;
use crate::device::{ConnectionType, DeviceFilter, DeviceProfile, DeviceRegistration, DeviceRegistry};
use crate::error::{Error, Result};
use crate::mailbox::{DeliverySummary, MailboxStats, OfflineMailbox, OfflineMessage, Priority};
use crate::optimizer::{MessageOptimizer, Optimized, Strategy};
use crate::supervisor::Supervisor;
use crate::transfer::{
    queued_transfer_id, AgentTransfer, TransferFilter, TransferOrchestrator, TransferRequest,
};

/// A direct message for one device.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub device_id: String,
    pub message: Value,
    pub optimize: bool,
    pub priority: Priority,
    pub ttl: Option<Duration>,
}

impl SendRequest {
    pub fn new(device_id: impl Into<String>, message: Value) -> Self {
        Self {
            device_id: device_id.into(),
            message,
            optimize: true,
            priority: Priority::Normal,
            ttl: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Delivered {
        strategy: Strategy,
        size: usize,
        report: DeliveryReport,
    },
    Queued {
        message_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub devices_total: usize,
    pub devices_online: usize,
    pub transfers: BTreeMap<String, usize>,
    pub mailboxes: Vec<MailboxStats>,
}

#[derive(Debug)]
pub struct Coordinator {
    settings: Settings,
    registry: Arc<DeviceRegistry>,
    channels: Arc<ChannelRegistry>,
    optimizer: Arc<MessageOptimizer>,
    mailbox: Arc<OfflineMailbox>,
    transfers: Arc<TransferOrchestrator>,
    supervisor: Supervisor,
}

impl Coordinator {
    pub fn new(settings: Settings) -> Arc<Self> {
        let registry = Arc::new(DeviceRegistry::new());
        let channels = Arc::new(ChannelRegistry::new(settings.callback_timeout()));
        let optimizer = Arc::new(MessageOptimizer::default());
        let mailbox = Arc::new(OfflineMailbox::new(
            registry.clone(),
            channels.clone(),
            optimizer.clone(),
        ));
        let supervisor = Supervisor::new();
        let transfers = Arc::new(TransferOrchestrator::new(
            registry.clone(),
            mailbox.clone(),
            channels.clone(),
            supervisor.clone(),
            settings.unrouted_transfer_policy,
        ));

        Arc::new(Self {
            settings,
            registry,
            channels,
            optimizer,
            mailbox,
            transfers,
            supervisor,
        })
    }

    /// Start long-running services. Must be called inside a tokio runtime.
    pub fn start(&self) {
        if let Some(interval) = self.settings.sweep_interval() {
            let mailbox = self.mailbox.clone();
            self.supervisor
                .spawn_periodic("expiry_sweep", interval, move || {
                    let cleared = mailbox.clear_expired_messages();
                    if cleared > 0 {
                        tracing::info!("Expiry sweep removed {} messages", cleared);
                    }
                });
            tracing::info!("Expiry sweep every {}s", interval.as_secs());
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // -- devices --

    pub fn register_device(&self, registration: DeviceRegistration) -> DeviceProfile {
        self.registry.register_device(registration)
    }

    /// Update a device; an update to an online connection type schedules a mailbox flush.
    pub fn update_device_status(
        self: &Arc<Self>,
        device_id: &str,
        connection_type: Option<ConnectionType>,
        metadata_updates: Option<HashMap<String, Value>>,
    ) -> Result<DeviceProfile> {
        let change = self
            .registry
            .update_device_status(device_id, connection_type, metadata_updates)?;

        if connection_type.is_some_and(ConnectionType::is_online) {
            if change.previous != change.profile.connection_type {
                tracing::info!("Device {} is back online, flushing mailbox", device_id);
            }
            self.schedule_flush(device_id);
        }
        Ok(change.profile)
    }

    pub fn get_device_profile(&self, device_id: &str) -> Result<DeviceProfile> {
        self.registry.get_device_profile(device_id)
    }

    pub fn list_devices(&self, filter: &DeviceFilter) -> Vec<DeviceProfile> {
        self.registry.list_devices(filter)
    }

    pub fn register_device_callback(&self, device_id: &str, channel: Arc<dyn DeviceChannel>) {
        self.channels.register(device_id, channel);
    }

    // -- messages --

    pub fn optimize_message_for_device(&self, device_id: &str, message: &Value) -> Optimized {
        self.optimizer
            .optimize_message_for_device(&self.registry, device_id, message)
    }

    pub fn store_offline_message(
        &self,
        target_device_id: &str,
        message: Value,
        priority: Priority,
        ttl: Option<Duration>,
    ) -> OfflineMessage {
        self.mailbox
            .store_offline_message(target_device_id, message, priority, ttl)
    }

    /// Deliver now when the device is reachable, otherwise queue it.
    pub async fn send_message_to_device(&self, request: SendRequest) -> Result<SendOutcome> {
        let profile = self.registry.get_device_profile(&request.device_id)?;
        if !profile.is_online() {
            return Ok(self.queue(request, "device_offline".to_string()));
        }

        let shaped = if request.optimize {
            self.optimizer.optimize(Some(&profile), &request.message)
        } else {
            let size = crate::optimizer::encoded_size(&request.message);
            Optimized {
                message: request.message.clone(),
                strategy: Strategy::Unchanged,
                original_size: size,
                size,
            }
        };

        match self.channels.dispatch(&request.device_id, &shaped.message).await {
            Ok(report) if report.success => Ok(SendOutcome::Delivered {
                strategy: shaped.strategy,
                size: shaped.size,
                report,
            }),
            Ok(report) => {
                let reason = report
                    .error
                    .unwrap_or_else(|| "device reported delivery failure".to_string());
                Ok(self.queue(request, reason))
            }
            Err(ChannelError::NotRegistered(_)) => Ok(self.queue(request, "no_channel".to_string())),
            Err(e) => Ok(self.queue(request, e.to_string())),
        }
    }

    fn queue(&self, request: SendRequest, reason: String) -> SendOutcome {
        let ttl = request.ttl.or_else(|| self.settings.default_message_ttl());
        let stored = self.mailbox.store_offline_message(
            &request.device_id,
            request.message,
            request.priority,
            ttl,
        );
        tracing::debug!(
            "Message {} for {} queued: {}",
            stored.message_id,
            request.device_id,
            reason
        );
        SendOutcome::Queued {
            message_id: stored.message_id,
            reason,
        }
    }

    /// Flush a device's mailbox and settle the transfers it carried.
    ///
    /// A transfer completes only when its payload reached the device in full.
    /// A degraded or replaced payload fails it.
    pub async fn deliver_offline_messages(&self, device_id: &str) -> Result<DeliverySummary> {
        let summary = self.mailbox.deliver_offline_messages(device_id).await?;
        for delivered in &summary.delivered {
            let Some(transfer_id) = queued_transfer_id(&delivered.message) else {
                continue;
            };
            if delivered.is_intact() {
                if self
                    .transfers
                    .complete_from_mailbox(transfer_id, delivered.report.clone())
                {
                    tracing::info!("Transfer {} delivered from mailbox", transfer_id);
                }
            } else {
                let error = Error::MessageTooLarge {
                    size: delivered.original_size,
                    max: delivered.max_size,
                };
                self.transfers.fail_from_mailbox(transfer_id, error);
            }
        }
        Ok(summary)
    }

    fn schedule_flush(self: &Arc<Self>, device_id: &str) {
        let this = Arc::clone(self);
        let device_id = device_id.to_string();
        self.supervisor.spawn("offline_flush", async move {
            if let Err(e) = this.deliver_offline_messages(&device_id).await {
                tracing::warn!("Mailbox flush for {} skipped: {}", device_id, e);
            }
        });
    }

    pub fn get_offline_messages(
        &self,
        device_id: Option<&str>,
        include_expired: bool,
    ) -> Vec<OfflineMessage> {
        self.mailbox.get_offline_messages(device_id, include_expired)
    }

    pub fn clear_expired_messages(&self) -> usize {
        self.mailbox.clear_expired_messages()
    }

    // -- transfers --

    pub fn initiate_agent_transfer(&self, request: TransferRequest) -> Result<AgentTransfer> {
        self.transfers.initiate_agent_transfer(request)
    }

    pub fn cancel_agent_transfer(&self, transfer_id: &str) -> Result<bool> {
        self.transfers.cancel_agent_transfer(transfer_id)
    }

    pub fn get_agent_transfer(&self, transfer_id: &str) -> Result<AgentTransfer> {
        self.transfers.get_agent_transfer(transfer_id)
    }

    pub fn list_agent_transfers(&self, filter: &TransferFilter) -> Vec<AgentTransfer> {
        self.transfers.list_agent_transfers(filter)
    }

    // -- lifecycle --

    pub fn stats(&self) -> CoordinatorStats {
        let (devices_total, devices_online) = self.registry.counts();
        let transfers = self
            .transfers
            .status_counts()
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect();
        CoordinatorStats {
            devices_total,
            devices_online,
            transfers,
            mailboxes: self.mailbox.stats(),
        }
    }

    /// Wait for in-flight transfers and flushes to settle.
    pub async fn drain(&self) {
        self.supervisor.drain().await;
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
