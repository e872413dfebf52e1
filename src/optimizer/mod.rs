//! Shrinks outbound messages to fit a device's declared budget.
//!
//! Strategies are tried in a fixed order:
//! 1. leave the message alone if it already fits (or the device is unknown),
//! 2. compress it when the device supports compression and the wrapper fits,
//! 3. degrade the uncompressed message according to the capability tier,
//! 4. replace it with a small error notice.
//!
//! The optimizer never fails; the caller always gets something to send.

pub mod compressor;

use std::sync::Arc;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::device::{CapabilityLevel, DeviceProfile, DeviceRegistry};

pub use compressor::{Compressor, ZlibCompressor};

/// Payload keys a LOW tier device keeps.
pub const LOW_TIER_PAYLOAD_KEYS: [&str; 4] = ["id", "type", "status", "priority"];

/// Arrays inside a MEDIUM tier payload are cut to this many elements.
pub const MEDIUM_TIER_MAX_ITEMS: usize = 10;

/// Nested payload maps larger than this (serialized) are elided on MEDIUM tier.
pub const MEDIUM_TIER_MAX_NESTED_BYTES: usize = 1000;

pub const ELIDED_VALUE: &str = "...";

pub const TOO_LARGE_ERROR: &str = "Message too large for device";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Unchanged,
    Compressed,
    Degraded,
    Replaced,
}

#[derive(Debug, Clone)]
pub struct Optimized {
    pub message: Value,
    pub strategy: Strategy,
    pub original_size: usize,
    pub size: usize,
}

impl Optimized {
    fn unchanged(message: &Value, size: usize) -> Self {
        Self {
            message: message.clone(),
            strategy: Strategy::Unchanged,
            original_size: size,
            size,
        }
    }
}

pub struct MessageOptimizer {
    compressor: Arc<dyn Compressor>,
}

impl Default for MessageOptimizer {
    fn default() -> Self {
        Self::new(Arc::new(ZlibCompressor::default()))
    }
}

impl std::fmt::Debug for MessageOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageOptimizer")
            .field("algorithm", &self.compressor.algorithm())
            .finish()
    }
}

impl MessageOptimizer {
    pub fn new(compressor: Arc<dyn Compressor>) -> Self {
        Self { compressor }
    }

    /// Look the device up and shape `message` for it.
    pub fn optimize_message_for_device(
        &self,
        registry: &DeviceRegistry,
        device_id: &str,
        message: &Value,
    ) -> Optimized {
        let profile = registry.get_device_profile(device_id).ok();
        self.optimize(profile.as_ref(), message)
    }

    pub fn optimize(&self, profile: Option<&DeviceProfile>, message: &Value) -> Optimized {
        let encoded = encode(message);
        let original_size = encoded.len();

        let Some(profile) = profile else {
            return Optimized::unchanged(message, original_size);
        };
        let max = profile.max_message_size;
        if original_size <= max {
            return Optimized::unchanged(message, original_size);
        }

        if profile.supports_compression {
            if let Some(wrapper) = self.compress(&encoded, max) {
                let size = encoded_size(&wrapper);
                tracing::debug!(
                    "Compressed message for {}: {} -> {} bytes",
                    profile.device_id,
                    original_size,
                    size
                );
                return Optimized {
                    message: wrapper,
                    strategy: Strategy::Compressed,
                    original_size,
                    size,
                };
            }
        }

        let degraded = degrade(profile.capability_level, message);
        let degraded_size = encoded_size(&degraded);
        if degraded_size <= max {
            tracing::debug!(
                "Degraded message for {} ({} tier): {} -> {} bytes",
                profile.device_id,
                profile.capability_level,
                original_size,
                degraded_size
            );
            return Optimized {
                message: degraded,
                strategy: Strategy::Degraded,
                original_size,
                size: degraded_size,
            };
        }

        let notice = too_large_notice(message, original_size, max);
        let notice_size = encoded_size(&notice);
        // A budget below the notice itself cannot be met; send the smaller of the two.
        if notice_size >= degraded_size {
            tracing::warn!(
                "Message for {} still {} bytes after degradation (budget {})",
                profile.device_id,
                degraded_size,
                max
            );
            return Optimized {
                message: degraded,
                strategy: Strategy::Degraded,
                original_size,
                size: degraded_size,
            };
        }

        tracing::warn!(
            "Message for {} replaced: {} bytes exceeds budget of {}",
            profile.device_id,
            original_size,
            max
        );
        Optimized {
            message: notice,
            strategy: Strategy::Replaced,
            original_size,
            size: notice_size,
        }
    }

    fn compress(&self, encoded: &[u8], max: usize) -> Option<Value> {
        let compressed = match self.compressor.compress(encoded) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Compression failed: {}", e);
                return None;
            }
        };
        let wrapper = json!({
            "compressed": true,
            "algorithm": self.compressor.algorithm(),
            "original_size": encoded.len(),
            "data": base64::engine::general_purpose::STANDARD.encode(compressed),
        });
        (encoded_size(&wrapper) <= max).then_some(wrapper)
    }
}

fn encode(message: &Value) -> Vec<u8> {
    // A serde_json::Value always serializes.
    serde_json::to_vec(message).unwrap_or_default()
}

pub fn encoded_size(message: &Value) -> usize {
    encode(message).len()
}

/// Tier-specific degradation of the uncompressed message.
fn degrade(level: CapabilityLevel, message: &Value) -> Value {
    let mut degraded = message.clone();
    let Some(root) = degraded.as_object_mut() else {
        return degraded;
    };

    match level {
        CapabilityLevel::Low => {
            root.remove("metadata");
            if let Some(Value::Object(payload)) = root.get_mut("payload") {
                payload.retain(|key, _| LOW_TIER_PAYLOAD_KEYS.contains(&key.as_str()));
            }
        }
        CapabilityLevel::Medium => {
            if let Some(Value::Object(payload)) = root.get_mut("payload") {
                for value in payload.values_mut() {
                    trim_medium(value);
                }
            }
        }
        CapabilityLevel::High | CapabilityLevel::Full => {}
    }

    degraded
}

fn trim_medium(value: &mut Value) {
    if let Value::Array(items) = value {
        items.truncate(MEDIUM_TIER_MAX_ITEMS);
        return;
    }
    if !value.is_object() || encoded_size(value) <= MEDIUM_TIER_MAX_NESTED_BYTES {
        return;
    }
    let elided: Option<Map<String, Value>> = value.as_object().map(|map| {
        map.keys()
            .map(|key| (key.clone(), Value::from(ELIDED_VALUE)))
            .collect()
    });
    if let Some(elided) = elided {
        *value = Value::Object(elided);
    }
}

fn too_large_notice(message: &Value, original_size: usize, max: usize) -> Value {
    json!({
        "message_type": "error",
        "error": TOO_LARGE_ERROR,
        "original_message_id": message
            .get("message_id")
            .or_else(|| message.get("transfer_id"))
            .cloned()
            .unwrap_or(Value::Null),
        "original_size": original_size,
        "max_size": max,
    })
}
