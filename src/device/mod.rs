//! Device profiles and the registry that owns them.

pub mod profile;
pub mod registry;

pub use profile::{CapabilityLevel, ConnectionType, Constraints, DeviceProfile, DeviceRegistration};
pub use registry::{DeviceFilter, DeviceRegistry, StatusChange};
