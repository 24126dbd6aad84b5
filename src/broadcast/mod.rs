//! Broadcast-каналы поверх pub/sub транспорта.
//!
//! `BroadcastChannel` выдаёт именованные `Topic`; топик публикует
//! сообщения (`Producer`) и создаёт подписки (`Subscriber`). Подписка
//! доставляет сообщения по модели "не более одного раза": медленный
//! потребитель теряет самые старые сообщения, а не тормозит издателей.

pub mod channel;
pub mod mode;
mod queue;
pub mod subscription;
pub mod topic;
pub mod version;

pub use channel::{BroadcastChannel, ChannelOptions};
pub use mode::PubSubMode;
pub use subscription::{Messages, Subscription};
pub use topic::{Producer, Subscriber, Topic};
pub use version::{fetch_server_version, parse_server_version, supports_sharded_pubsub, ServerVersion};
