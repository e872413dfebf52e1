//! devicemesh library root.

pub mod channel;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod optimizer;
pub mod protocol;
pub mod supervisor;
pub mod transfer;

pub use channel::{channel_fn, ChannelError, ChannelRegistry, DeliveryReport, DeviceChannel};
pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use coordinator::{Coordinator, CoordinatorStats, SendOutcome, SendRequest};
pub use device::{CapabilityLevel, ConnectionType, DeviceProfile, DeviceRegistration, DeviceRegistry};
pub use error::{Error, Result};
pub use mailbox::{OfflineMailbox, OfflineMessage, Priority};
pub use optimizer::MessageOptimizer;
pub use protocol::{ProtocolProcessor, ResponseMessage};
pub use supervisor::Supervisor;
pub use transfer::{AgentTransfer, TransferOrchestrator, TransferStatus};
