//! In-memory registry of device profiles.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::profile::{CapabilityLevel, ConnectionType, DeviceProfile, DeviceRegistration};
use crate::error::{Error, Result};

/// Filters for [`DeviceRegistry::list_devices`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceFilter {
    pub capability_level: Option<CapabilityLevel>,
    pub connection_type: Option<ConnectionType>,
    #[serde(default)]
    pub online_only: bool,
}

impl DeviceFilter {
    fn matches(&self, profile: &DeviceProfile) -> bool {
        if let Some(level) = self.capability_level {
            if profile.capability_level != level {
                return false;
            }
        }
        if let Some(connection) = self.connection_type {
            if profile.connection_type != connection {
                return false;
            }
        }
        !self.online_only || profile.is_online()
    }
}

/// Result of a status update: the new profile and whether the device came back.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub profile: DeviceProfile,
    pub previous: ConnectionType,
}

impl StatusChange {
    pub fn is_online(&self) -> bool {
        self.profile.is_online()
    }
}

/// Authoritative map of device profiles. Entries are never removed.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceProfile>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a profile keyed by its device id.
    pub fn register_device(&self, registration: DeviceRegistration) -> DeviceProfile {
        let profile = registration.into_profile(Utc::now());
        let mut devices = self.devices.lock();
        if let Some(existing) = devices.get(&profile.device_id) {
            tracing::debug!("Re-registering device {}", existing.device_id);
        }
        devices.insert(profile.device_id.clone(), profile.clone());
        drop(devices);

        tracing::info!(
            "Registered device {} ({}, {}, {} bytes)",
            profile.device_id,
            profile.capability_level,
            profile.connection_type,
            profile.max_message_size
        );
        profile
    }

    /// Merge metadata, optionally change the connection type, refresh `last_seen`.
    pub fn update_device_status(
        &self,
        device_id: &str,
        connection_type: Option<ConnectionType>,
        metadata_updates: Option<HashMap<String, Value>>,
    ) -> Result<StatusChange> {
        let mut devices = self.devices.lock();
        let profile = devices
            .get_mut(device_id)
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;

        let previous = profile.connection_type;
        if let Some(connection) = connection_type {
            profile.connection_type = connection;
        }
        if let Some(updates) = metadata_updates {
            profile.metadata.extend(updates);
        }
        // last_seen never moves backwards even if the wall clock does.
        profile.last_seen = profile.last_seen.max(Utc::now());

        if previous != profile.connection_type {
            tracing::debug!(
                "Device {} connection {} -> {}",
                device_id,
                previous,
                profile.connection_type
            );
        }

        Ok(StatusChange {
            profile: profile.clone(),
            previous,
        })
    }

    pub fn get_device_profile(&self, device_id: &str) -> Result<DeviceProfile> {
        self.devices
            .lock()
            .get(device_id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.lock().contains_key(device_id)
    }

    /// Snapshot of every profile passing `filter`, ordered by device id.
    pub fn list_devices(&self, filter: &DeviceFilter) -> Vec<DeviceProfile> {
        let mut devices: Vec<DeviceProfile> = self
            .devices
            .lock()
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// (total, online)
    pub fn counts(&self) -> (usize, usize) {
        let devices = self.devices.lock();
        let online = devices.values().filter(|p| p.is_online()).count();
        (devices.len(), online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_devices() -> DeviceRegistry {
        let registry = DeviceRegistry::new();
        registry.register_device(DeviceRegistration::new(
            "sensor-1",
            CapabilityLevel::Low,
            ConnectionType::Offline,
            256,
        ));
        registry.register_device(DeviceRegistration::new(
            "phone-1",
            CapabilityLevel::Medium,
            ConnectionType::Cellular,
            4096,
        ));
        registry.register_device(DeviceRegistration::new(
            "gateway-1",
            CapabilityLevel::Full,
            ConnectionType::Wired,
            1 << 20,
        ));
        registry
    }

    #[test]
    fn test_register_and_get() {
        let registry = registry_with_devices();
        let profile = registry.get_device_profile("phone-1").unwrap();
        assert_eq!(profile.capability_level, CapabilityLevel::Medium);
        assert_eq!(profile.max_message_size, 4096);
        assert!(matches!(
            registry.get_device_profile("missing"),
            Err(Error::DeviceNotFound(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_register_overwrites() {
        let registry = registry_with_devices();
        registry.register_device(DeviceRegistration::new(
            "phone-1",
            CapabilityLevel::High,
            ConnectionType::Wifi,
            8192,
        ));
        let profile = registry.get_device_profile("phone-1").unwrap();
        assert_eq!(profile.capability_level, CapabilityLevel::High);
        assert_eq!(registry.counts().0, 3);
    }

    #[test]
    fn test_update_merges_metadata_and_keeps_last_seen_monotonic() {
        let registry = DeviceRegistry::new();
        let registered = registry.register_device(
            DeviceRegistration::new("tab", CapabilityLevel::High, ConnectionType::Offline, 2048)
                .with_metadata("os", Value::from("android")),
        );

        let mut updates = HashMap::new();
        updates.insert("battery".to_string(), Value::from(42));
        let change = registry
            .update_device_status("tab", Some(ConnectionType::Wifi), Some(updates))
            .unwrap();

        assert_eq!(change.previous, ConnectionType::Offline);
        assert!(change.is_online());
        assert_eq!(change.profile.metadata["os"], "android");
        assert_eq!(change.profile.metadata["battery"], 42);
        assert!(change.profile.last_seen >= registered.last_seen);

        let again = registry.update_device_status("tab", None, None).unwrap();
        assert!(again.profile.last_seen >= change.profile.last_seen);
        assert_eq!(again.profile.connection_type, ConnectionType::Wifi);
    }

    #[test]
    fn test_update_unknown_device() {
        let registry = DeviceRegistry::new();
        assert!(matches!(
            registry.update_device_status("ghost", None, None),
            Err(Error::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_list_filters() {
        let registry = registry_with_devices();
        assert_eq!(registry.list_devices(&DeviceFilter::default()).len(), 3);

        let online = registry.list_devices(&DeviceFilter {
            online_only: true,
            ..DeviceFilter::default()
        });
        let ids: Vec<_> = online.iter().map(|p| p.device_id.as_str()).collect();
        assert_eq!(ids, vec!["gateway-1", "phone-1"]);

        let low = registry.list_devices(&DeviceFilter {
            capability_level: Some(CapabilityLevel::Low),
            ..DeviceFilter::default()
        });
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].device_id, "sensor-1");

        let wired_low = registry.list_devices(&DeviceFilter {
            capability_level: Some(CapabilityLevel::Low),
            connection_type: Some(ConnectionType::Wired),
            online_only: false,
        });
        assert!(wired_low.is_empty());
    }
}
