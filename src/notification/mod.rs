//! Status notifications: wire types, codec, and delivery to live connections.

pub mod codec;
mod dispatcher;
mod notifier;
mod types;

pub use codec::{CodecError, CodecResult};
pub use dispatcher::{DeliveryDispatcher, DispatcherStats, DispatcherStatsSnapshot};
pub use notifier::Notifier;
pub use types::{ChannelName, Envelope, RecipientId, Severity, StatusMessage};
