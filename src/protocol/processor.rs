//! Decodes inbound envelopes and dispatches them to the coordinator.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use super::envelope::{CommandMessage, InboundMessage, Params, QueryMessage, ResponseMessage};
use crate::coordinator::{Coordinator, SendRequest};
use crate::device::{CapabilityLevel, ConnectionType, Constraints, DeviceFilter, DeviceRegistration};
use crate::error::{Error, Result};
use crate::mailbox::Priority;
use crate::transfer::{TransferFilter, TransferRequest, TransferStatus};

pub const INVALID_MESSAGE: &str = "invalid_message";

/// Typed access to an envelope's `params`.
struct Args<'a>(&'a Params);

impl<'a> Args<'a> {
    fn has(&self, field: &str) -> bool {
        self.0.get(field).is_some_and(|v| !v.is_null())
    }

    fn value(&self, field: &str) -> Option<&'a Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    fn require(&self, field: &str) -> Result<&'a Value> {
        self.value(field).ok_or_else(|| Error::missing(field))
    }

    fn require_str(&self, field: &str) -> Result<&'a str> {
        let value = self.require(field)?;
        value.as_str().ok_or_else(|| Error::invalid(field, value))
    }

    fn opt_str(&self, field: &str) -> Result<Option<&'a str>> {
        match self.value(field) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| Error::invalid(field, value)),
        }
    }

    fn opt_bool(&self, field: &str) -> Result<Option<bool>> {
        match self.value(field) {
            None => Ok(None),
            Some(value) => value
                .as_bool()
                .map(Some)
                .ok_or_else(|| Error::invalid(field, value)),
        }
    }

    fn opt_u64(&self, field: &str) -> Result<Option<u64>> {
        match self.value(field) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| Error::invalid(field, value)),
        }
    }

    fn opt_parse<T: FromStr<Err = String>>(&self, field: &str) -> Result<Option<T>> {
        self.opt_str(field)?
            .map(|s| s.parse::<T>().map_err(Error::InvalidParameter))
            .transpose()
    }

    fn opt_map(&self, field: &str) -> Result<Option<HashMap<String, Value>>> {
        match self.value(field) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )),
            Some(value) => Err(Error::invalid(field, value)),
        }
    }
}

/// Turns envelopes into coordinator calls. Never fails past its boundary:
/// every input yields exactly one response.
#[derive(Debug, Clone)]
pub struct ProtocolProcessor {
    coordinator: Arc<Coordinator>,
}

impl ProtocolProcessor {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Process one line of wire text.
    pub async fn process_str(&self, raw: &str) -> ResponseMessage {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.process(&value).await,
            Err(e) => {
                tracing::debug!("Unparseable envelope: {}", e);
                self.reply(ResponseMessage::failed(INVALID_MESSAGE), None, None)
            }
        }
    }

    pub async fn process(&self, raw: &Value) -> ResponseMessage {
        let inbound = match InboundMessage::decode(raw) {
            Ok(inbound) => inbound,
            Err(salvaged) => {
                return self.reply(
                    ResponseMessage::failed(INVALID_MESSAGE),
                    salvaged.message_id,
                    salvaged.sender_id,
                );
            }
        };

        let message_id = inbound.message_id().map(String::from);
        let sender_id = inbound.sender_id().map(String::from);

        let outcome = match &inbound {
            InboundMessage::Command(command) => self.handle_command(command).await,
            InboundMessage::Query(query) => self.handle_query(query),
        };

        let response = match outcome {
            Ok(payload) => ResponseMessage::success(payload),
            Err(e) => {
                tracing::debug!("Request {:?} failed: {}", message_id, e);
                ResponseMessage::failed(e.to_string())
            }
        };
        self.reply(response, message_id, sender_id)
    }

    fn reply(
        &self,
        response: ResponseMessage,
        correlation_id: Option<String>,
        receiver_id: Option<String>,
    ) -> ResponseMessage {
        response
            .correlated(correlation_id)
            .from_sender(self.coordinator.settings().coordinator_id.clone())
            .to_receiver(receiver_id)
    }

    async fn handle_command(&self, command: &CommandMessage) -> Result<Value> {
        let args = Args(&command.params);
        tracing::debug!("Command {}", command.command);

        match command.command.as_str() {
            "register_device" => self.register_device(&args),
            "update_device_status" => {
                let device_id = args.require_str("device_id")?;
                let connection_type = args.opt_parse::<ConnectionType>("connection_type")?;
                let metadata_updates = args.opt_map("metadata_updates")?;
                let profile = self.coordinator.update_device_status(
                    device_id,
                    connection_type,
                    metadata_updates,
                )?;
                to_payload(&profile)
            }
            "initiate_agent_transfer" => {
                let required = ["agent_id", "source_device_id", "target_device_id", "agent_state"];
                if !required.iter().all(|f| args.has(f)) {
                    return Err(Error::missing_required());
                }
                let request = TransferRequest::new(
                    args.require_str("agent_id")?,
                    args.require_str("source_device_id")?,
                    args.require_str("target_device_id")?,
                    args.require("agent_state")?.clone(),
                )
                .with_metadata(args.opt_map("metadata")?.unwrap_or_default());
                let transfer = self.coordinator.initiate_agent_transfer(request)?;
                to_payload(&transfer)
            }
            "cancel_agent_transfer" => {
                let transfer_id = args.require_str("transfer_id")?;
                let cancelled = self.coordinator.cancel_agent_transfer(transfer_id)?;
                Ok(json!({ "transfer_id": transfer_id, "cancelled": cancelled }))
            }
            "send_message_to_device" => {
                let device_id = args.require_str("device_id")?;
                let message = args.require("message")?.clone();
                let mut request = SendRequest::new(device_id, message);
                request.optimize = args.opt_bool("optimize")?.unwrap_or(true);
                request.priority = args.opt_parse::<Priority>("priority")?.unwrap_or_default();
                request.ttl = args.opt_u64("ttl")?.map(Duration::from_secs);
                let outcome = self.coordinator.send_message_to_device(request).await?;
                to_payload(&outcome)
            }
            "clear_expired_messages" => {
                let cleared = self.coordinator.clear_expired_messages();
                Ok(json!({ "cleared": cleared }))
            }
            "deliver_offline_messages" => {
                let device_id = args.require_str("device_id")?;
                let summary = self.coordinator.deliver_offline_messages(device_id).await?;
                Ok(summary.to_json())
            }
            other => Err(Error::UnsupportedCommand(other.to_string())),
        }
    }

    fn register_device(&self, args: &Args<'_>) -> Result<Value> {
        let required = [
            "capability_level",
            "connection_type",
            "max_message_size",
            "supports_compression",
            "supports_encryption",
        ];
        if !required.iter().all(|f| args.has(f)) {
            return Err(Error::missing_required());
        }

        let capability_level = args
            .opt_parse::<CapabilityLevel>("capability_level")?
            .ok_or_else(|| Error::missing("capability_level"))?;
        let connection_type = args
            .opt_parse::<ConnectionType>("connection_type")?
            .ok_or_else(|| Error::missing("connection_type"))?;
        let max_message_size = args
            .opt_u64("max_message_size")?
            .ok_or_else(|| Error::missing("max_message_size"))?;
        let max_message_size = usize::try_from(max_message_size)
            .map_err(|_| Error::invalid("max_message_size", max_message_size))?;

        let device_id = match args.opt_str("device_id")? {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let constraints = Constraints {
            battery_constrained: args.opt_bool("battery_constrained")?.unwrap_or(false),
            cpu_constrained: args.opt_bool("cpu_constrained")?.unwrap_or(false),
            memory_constrained: args.opt_bool("memory_constrained")?.unwrap_or(false),
            storage_constrained: args.opt_bool("storage_constrained")?.unwrap_or(false),
        };

        let mut registration =
            DeviceRegistration::new(device_id, capability_level, connection_type, max_message_size)
                .with_compression(args.opt_bool("supports_compression")?.unwrap_or(false))
                .with_encryption(args.opt_bool("supports_encryption")?.unwrap_or(false))
                .with_constraints(constraints);
        for (key, value) in args.opt_map("metadata")?.unwrap_or_default() {
            registration = registration.with_metadata(key, value);
        }

        let profile = self.coordinator.register_device(registration);
        to_payload(&profile)
    }

    fn handle_query(&self, query: &QueryMessage) -> Result<Value> {
        let args = Args(&query.params);
        tracing::debug!("Query {}", query.query);

        match query.query.as_str() {
            "get_device_profile" => {
                let device_id = args.require_str("device_id")?;
                to_payload(&self.coordinator.get_device_profile(device_id)?)
            }
            "list_devices" => {
                let filter = match args.value("filters") {
                    None => DeviceFilter::default(),
                    Some(raw) => device_filter(raw)?,
                };
                let devices = self.coordinator.list_devices(&filter);
                Ok(json!({ "devices": devices, "count": devices.len() }))
            }
            "get_agent_transfer" => {
                let transfer_id = args.require_str("transfer_id")?;
                to_payload(&self.coordinator.get_agent_transfer(transfer_id)?)
            }
            "list_agent_transfers" => {
                let filter = TransferFilter {
                    agent_id: args.opt_str("agent_id")?.map(String::from),
                    device_id: args.opt_str("device_id")?.map(String::from),
                    status: args.opt_parse::<TransferStatus>("status")?,
                };
                let transfers = self.coordinator.list_agent_transfers(&filter);
                Ok(json!({ "transfers": transfers, "count": transfers.len() }))
            }
            "get_offline_messages" => {
                let device_id = args.opt_str("device_id")?;
                let include_expired = args.opt_bool("include_expired")?.unwrap_or(false);
                let messages = self.coordinator.get_offline_messages(device_id, include_expired);
                Ok(json!({ "messages": messages, "count": messages.len() }))
            }
            "optimize_message_for_device" => {
                let device_id = args.require_str("device_id")?;
                let message = args.require("message")?;
                let optimized = self.coordinator.optimize_message_for_device(device_id, message);
                Ok(json!({
                    "message": optimized.message,
                    "strategy": optimized.strategy,
                    "original_size": optimized.original_size,
                    "size": optimized.size,
                }))
            }
            "get_coordinator_stats" => to_payload(&self.coordinator.stats()),
            other => Err(Error::UnsupportedQuery(other.to_string())),
        }
    }
}

/// Filters accept the same case-insensitive names as the enum params.
fn device_filter(raw: &Value) -> Result<DeviceFilter> {
    let Value::Object(map) = raw else {
        return Err(Error::invalid("filters", raw));
    };
    let args = Args(map);
    Ok(DeviceFilter {
        capability_level: args.opt_parse::<CapabilityLevel>("capability_level")?,
        connection_type: args.opt_parse::<ConnectionType>("connection_type")?,
        online_only: args.opt_bool("online_only")?.unwrap_or(false),
    })
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
