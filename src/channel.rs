//! Device channels: the transport-facing delivery callbacks, keyed by device.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("No delivery channel registered for device {0}")]
    NotRegistered(String),

    #[error("Delivery timed out after {0}ms")]
    Timeout(u64),

    #[error("{0}")]
    Transport(String),
}

impl ChannelError {
    pub fn transport(s: impl Into<String>) -> Self {
        ChannelError::Transport(s.into())
    }
}

/// What a device channel reports back after a delivery attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliveryReport {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl DeliveryReport {
    pub fn delivered() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Collapse a negative report into an error string.
    pub fn into_result(self) -> std::result::Result<DeliveryReport, String> {
        if self.success {
            Ok(self)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "device reported delivery failure".to_string()))
        }
    }
}

/// Delivery mechanism supplied by the transport layer.
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    async fn deliver(
        &self,
        device_id: &str,
        payload: &Value,
    ) -> std::result::Result<DeliveryReport, ChannelError>;
}

/// Adapter turning an async closure into a [`DeviceChannel`].
pub struct ChannelFn<F>(F);

#[async_trait]
impl<F, Fut> DeviceChannel for ChannelFn<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<DeliveryReport, ChannelError>> + Send + 'static,
{
    async fn deliver(
        &self,
        device_id: &str,
        payload: &Value,
    ) -> std::result::Result<DeliveryReport, ChannelError> {
        (self.0)(device_id.to_string(), payload.clone()).await
    }
}

/// Wrap an async closure as a shareable channel.
pub fn channel_fn<F, Fut>(f: F) -> Arc<dyn DeviceChannel>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<DeliveryReport, ChannelError>> + Send + 'static,
{
    Arc::new(ChannelFn(f))
}

/// Per-device callback lookup. Last registration wins.
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, Arc<dyn DeviceChannel>>>,
    timeout: Duration,
}

impl ChannelRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn register(&self, device_id: impl Into<String>, channel: Arc<dyn DeviceChannel>) {
        let device_id = device_id.into();
        if self.channels.lock().insert(device_id.clone(), channel).is_some() {
            tracing::debug!("Replaced delivery channel for {}", device_id);
        } else {
            tracing::debug!("Registered delivery channel for {}", device_id);
        }
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<dyn DeviceChannel>> {
        self.channels.lock().get(device_id).cloned()
    }

    /// Look up the device's channel and invoke it under the bounded timeout.
    ///
    /// The registry lock is released before the channel is awaited.
    pub async fn dispatch(
        &self,
        device_id: &str,
        payload: &Value,
    ) -> std::result::Result<DeliveryReport, ChannelError> {
        let channel = self
            .get(device_id)
            .ok_or_else(|| ChannelError::NotRegistered(device_id.to_string()))?;
        self.invoke(channel.as_ref(), device_id, payload).await
    }

    pub async fn invoke(
        &self,
        channel: &dyn DeviceChannel,
        device_id: &str,
        payload: &Value,
    ) -> std::result::Result<DeliveryReport, ChannelError> {
        match tokio::time::timeout(self.timeout, channel.deliver(device_id, payload)).await {
            Ok(result) => result,
            Err(_) => {
                let millis = self.timeout.as_millis() as u64;
                tracing::warn!("Delivery to {} timed out after {}ms", device_id, millis);
                Err(ChannelError::Timeout(millis))
            }
        }
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<String> = self.channels.lock().keys().cloned().collect();
        ids.sort();
        f.debug_struct("ChannelRegistry")
            .field("devices", &ids)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_dispatch_unregistered() {
        let registry = ChannelRegistry::new(Duration::from_millis(100));
        let err = registry.dispatch("nobody", &json!({})).await.unwrap_err();
        assert_eq!(err, ChannelError::NotRegistered("nobody".to_string()));
    }

    #[tokio::test]
    async fn test_dispatch_passes_device_and_payload() {
        let registry = ChannelRegistry::new(Duration::from_millis(500));
        registry.register(
            "phone",
            channel_fn(|device_id, payload| async move {
                Ok::<_, ChannelError>(DeliveryReport::delivered().with_detail(json!({
                    "device": device_id,
                    "echo": payload["n"],
                })))
            }),
        );

        let report = registry.dispatch("phone", &json!({"n": 7})).await.unwrap();
        assert!(report.success);
        assert_eq!(report.detail.unwrap()["echo"], 7);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = ChannelRegistry::new(Duration::from_millis(500));
        registry.register("d", channel_fn(|_, _| async { Ok::<_, ChannelError>(DeliveryReport::rejected("old")) }));
        registry.register("d", channel_fn(|_, _| async { Ok::<_, ChannelError>(DeliveryReport::delivered()) }));

        assert!(registry.dispatch("d", &json!(null)).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_slow_channel_does_not_block_other_devices() {
        let registry = Arc::new(ChannelRegistry::new(Duration::from_secs(5)));
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());

        let (on_start, on_release) = (started.clone(), release.clone());
        registry.register(
            "stuck",
            channel_fn(move |_, _| {
                let (on_start, on_release) = (on_start.clone(), on_release.clone());
                async move {
                    on_start.notify_one();
                    on_release.notified().await;
                    Ok::<_, ChannelError>(DeliveryReport::delivered())
                }
            }),
        );
        registry.register(
            "quick",
            channel_fn(|_, _| async { Ok::<_, ChannelError>(DeliveryReport::delivered()) }),
        );

        let pending = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.dispatch("stuck", &json!({})).await })
        };
        started.notified().await;

        // The stuck callback is mid-flight; other devices and registrations proceed.
        let quick = tokio::time::timeout(
            Duration::from_millis(500),
            registry.dispatch("quick", &json!({})),
        )
        .await
        .expect("dispatch to another device blocked")
        .unwrap();
        assert!(quick.success);
        registry.register(
            "late",
            channel_fn(|_, _| async { Ok::<_, ChannelError>(DeliveryReport::delivered()) }),
        );
        assert!(!pending.is_finished());

        release.notify_one();
        assert!(pending.await.unwrap().unwrap().success);
    }

    #[tokio::test]
    async fn test_slow_channel_times_out() {
        let registry = ChannelRegistry::new(Duration::from_millis(20));
        registry.register(
            "slow",
            channel_fn(|_, _| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ChannelError>(DeliveryReport::delivered())
            }),
        );

        let err = registry.dispatch("slow", &json!({})).await.unwrap_err();
        assert_eq!(err, ChannelError::Timeout(20));
    }

    #[test]
    fn test_report_into_result() {
        assert!(DeliveryReport::delivered().into_result().is_ok());
        assert_eq!(
            DeliveryReport::rejected("disk full").into_result().unwrap_err(),
            "disk full"
        );
        let bare = DeliveryReport {
            success: false,
            ..DeliveryReport::default()
        };
        assert_eq!(bare.into_result().unwrap_err(), "device reported delivery failure");
    }
}
