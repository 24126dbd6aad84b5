/// Broadcast channels: BroadcastChannel, Topic, Subscription.
pub mod broadcast;
/// Configuration loading (defaults + ZCAST_* environment).
pub mod config;
/// Logging setup (formatting, filters).
pub mod logging;
/// Pub/sub transport contract and the in-process broker.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Broadcast API.
pub use crate::broadcast::{
    BroadcastChannel, ChannelOptions, Messages, Producer, PubSubMode, ServerVersion, Subscriber,
    Subscription, Topic,
};
/// config
pub use crate::config::{Settings, SubscriptionSettings};
/// Logging initialisation.
pub use crate::logging::{init_logging, LogFormat, LoggingConfig};
/// Transport contract and in-process implementation.
pub use crate::transport::{Frame, MemoryBroker, MemoryBrokerConfig, PubSubClient, PubSubHandle};
/// Error types and result alias.
pub use zcast_error::{
    BroadcastChannelError, BroadcastResult, ErrorExt, StatusCode, SubscriptionClosedError,
    SubscriptionMode, TransportError,
};
