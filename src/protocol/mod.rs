//! Wire protocol for the coordinator.
//!
//! Inbound envelopes are either commands (`command` + `params`) or queries
//! (`query` + `params`). Each one produces exactly one response envelope
//! correlated to the inbound `message_id`.

pub mod envelope;
pub mod processor;

pub use envelope::{CommandMessage, InboundMessage, QueryMessage, ResponseMessage, ResponseStatus};
pub use processor::ProtocolProcessor;
