//! Device capability profiles.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse capability tier driving how aggressively messages are shrunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityLevel {
    Low,
    Medium,
    High,
    Full,
}

impl FromStr for CapabilityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(CapabilityLevel::Low),
            "medium" => Ok(CapabilityLevel::Medium),
            "high" => Ok(CapabilityLevel::High),
            "full" => Ok(CapabilityLevel::Full),
            _ => Err(format!("Unknown capability level: {}", s)),
        }
    }
}

impl fmt::Display for CapabilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityLevel::Low => write!(f, "low"),
            CapabilityLevel::Medium => write!(f, "medium"),
            CapabilityLevel::High => write!(f, "high"),
            CapabilityLevel::Full => write!(f, "full"),
        }
    }
}

/// How a device is currently attached to the mesh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Offline,
    Intermittent,
    Cellular,
    Wifi,
    Wired,
    Satellite,
}

impl ConnectionType {
    /// Anything but `Offline` is reachable, intermittent links included.
    pub fn is_online(self) -> bool {
        !matches!(self, ConnectionType::Offline)
    }
}

impl FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "offline" => Ok(ConnectionType::Offline),
            "intermittent" => Ok(ConnectionType::Intermittent),
            "cellular" => Ok(ConnectionType::Cellular),
            "wifi" => Ok(ConnectionType::Wifi),
            "wired" => Ok(ConnectionType::Wired),
            "satellite" => Ok(ConnectionType::Satellite),
            _ => Err(format!("Unknown connection type: {}", s)),
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionType::Offline => "offline",
            ConnectionType::Intermittent => "intermittent",
            ConnectionType::Cellular => "cellular",
            ConnectionType::Wifi => "wifi",
            ConnectionType::Wired => "wired",
            ConnectionType::Satellite => "satellite",
        };
        f.write_str(name)
    }
}

/// Resource constraints a device declares about itself.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constraints {
    #[serde(default)]
    pub battery_constrained: bool,
    #[serde(default)]
    pub cpu_constrained: bool,
    #[serde(default)]
    pub memory_constrained: bool,
    #[serde(default)]
    pub storage_constrained: bool,
}

/// Capability and liveness descriptor for one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceProfile {
    pub device_id: String,
    pub capability_level: CapabilityLevel,
    pub connection_type: ConnectionType,
    /// Upper bound on a serialized outbound message, in bytes.
    pub max_message_size: usize,
    pub supports_compression: bool,
    pub supports_encryption: bool,
    #[serde(flatten)]
    pub constraints: Constraints,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl DeviceProfile {
    pub fn is_online(&self) -> bool {
        self.connection_type.is_online()
    }
}

/// Fields supplied by a device when it registers.
#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub capability_level: CapabilityLevel,
    pub connection_type: ConnectionType,
    pub max_message_size: usize,
    pub supports_compression: bool,
    pub supports_encryption: bool,
    pub constraints: Constraints,
    pub metadata: HashMap<String, Value>,
}

impl DeviceRegistration {
    pub fn new(
        device_id: impl Into<String>,
        capability_level: CapabilityLevel,
        connection_type: ConnectionType,
        max_message_size: usize,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            capability_level,
            connection_type,
            max_message_size,
            supports_compression: false,
            supports_encryption: false,
            constraints: Constraints::default(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_compression(mut self, supported: bool) -> Self {
        self.supports_compression = supported;
        self
    }

    pub fn with_encryption(mut self, supported: bool) -> Self {
        self.supports_encryption = supported;
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub(crate) fn into_profile(self, now: DateTime<Utc>) -> DeviceProfile {
        DeviceProfile {
            device_id: self.device_id,
            capability_level: self.capability_level,
            connection_type: self.connection_type,
            max_message_size: self.max_message_size,
            supports_compression: self.supports_compression,
            supports_encryption: self.supports_encryption,
            constraints: self.constraints,
            last_seen: now,
            metadata: self.metadata,
        }
    }
}
