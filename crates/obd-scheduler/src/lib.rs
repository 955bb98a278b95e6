//! OBD-II Command Scheduling
//!
//! Serializes every command for one adapter through a single priority queue
//! with per-attempt timeouts and bounded retry, drives the ELM327 setup
//! sequence through that queue, and polls PIDs as a continuous stream.

mod config;
mod initializer;
mod queue;
mod stream;

pub use config::QueueConfig;
pub use initializer::{AdapterInfo, InitState, ProtocolInitializer};
pub use queue::{CommandId, CommandQueue, CommandResponse, QueuedCommand, ResponseCallback};
pub use stream::DataStreamHandle;
