//! Connection management for WebSocket connections
//!
//! This module provides:
//! - Connection handles and their lifecycle state machine
//! - The recipient -> connections registry used for fan-out
//! - Connection statistics

mod registry;
mod stats;
mod types;

pub use registry::{ConnectionRegistry, DEFAULT_SEND_TIMEOUT};
pub use stats::{ConnectionStats, DeliveryResult};
pub use types::{ConnectionHandle, ConnectionState, ConnectionWriteError};
