use std::sync::Arc;

use tracing::debug;
use zcast_error::BroadcastResult;

use super::{
    mode::PubSubMode,
    topic::Topic,
    version::{fetch_server_version, ServerVersion},
};
use crate::{
    config::{Settings, SubscriptionSettings},
    transport::PubSubClient,
};

/// Параметры создания канала.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    /// `Some(true)`/`Some(false)` — явный выбор режима; `None` — по версии
    /// сервера.
    pub use_sharded_pubsub: Option<bool>,
    pub subscription: SubscriptionSettings,
}

/// Broadcast-канал: фабрика топиков поверх общего клиента брокера.
///
/// Режим (обычный или шардированный) выбирается один раз при создании и
/// передаётся всем топикам. Канал не владеет ресурсами и никогда не
/// закрывает клиент.
///
/// ```
/// use std::{sync::Arc, time::Duration};
///
/// use bytes::Bytes;
/// use zcast::{BroadcastChannel, MemoryBroker};
///
/// let channel = BroadcastChannel::regular(Arc::new(MemoryBroker::new()));
/// let topic = channel.topic("news");
///
/// let sub = topic.as_subscriber().subscribe();
/// sub.start().unwrap();
/// topic.as_producer().publish(Bytes::from_static(b"hello")).unwrap();
///
/// let msg = sub.receive(Some(Duration::from_secs(1))).unwrap();
/// assert_eq!(msg, Some(Bytes::from_static(b"hello")));
/// ```
#[derive(Clone)]
pub struct BroadcastChannel {
    client: Arc<dyn PubSubClient>,
    mode: PubSubMode,
    settings: SubscriptionSettings,
    server_version: Option<ServerVersion>,
}

impl ChannelOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            use_sharded_pubsub: settings.use_sharded_pubsub,
            subscription: settings.subscription,
        }
    }
}

impl BroadcastChannel {
    /// Канал на обычных PUBLISH/SUBSCRIBE.
    pub fn regular(client: Arc<dyn PubSubClient>) -> Self {
        Self::new(client, PubSubMode::Regular, None)
    }

    /// Канал на шардированных SPUBLISH/SSUBSCRIBE.
    pub fn sharded(client: Arc<dyn PubSubClient>) -> Self {
        Self::new(client, PubSubMode::Sharded, None)
    }

    /// Один раз запрашивает версию сервера и включает шардированный режим,
    /// если сервер не старше 7.0.0.
    pub fn detect(client: Arc<dyn PubSubClient>) -> Self {
        let version = fetch_server_version(client.as_ref());
        let mode = if version.supports_sharded_pubsub() {
            PubSubMode::Sharded
        } else {
            PubSubMode::Regular
        };
        debug!(%version, %mode, "detected pub/sub mode");
        Self::new(client, mode, Some(version))
    }

    /// Канал с явными параметрами. Версия сервера запрашивается, только
    /// если режим не задан.
    pub fn with_options(
        client: Arc<dyn PubSubClient>,
        options: ChannelOptions,
    ) -> BroadcastResult<Self> {
        options.subscription.validate()?;

        let mut channel = match options.use_sharded_pubsub {
            Some(true) => Self::sharded(client),
            Some(false) => Self::regular(client),
            None => Self::detect(client),
        };
        channel.settings = options.subscription;
        Ok(channel)
    }

    pub fn from_settings(
        client: Arc<dyn PubSubClient>,
        settings: &Settings,
    ) -> BroadcastResult<Self> {
        Self::with_options(client, ChannelOptions::from_settings(settings))
    }

    fn new(
        client: Arc<dyn PubSubClient>,
        mode: PubSubMode,
        server_version: Option<ServerVersion>,
    ) -> Self {
        Self {
            client,
            mode,
            settings: SubscriptionSettings::default(),
            server_version,
        }
    }

    /// Возвращает топик с именем `name`. Не обращается к брокеру.
    pub fn topic(
        &self,
        name: impl Into<Arc<str>>,
    ) -> Topic {
        Topic::new(Arc::clone(&self.client), name, self.mode, self.settings)
    }

    pub fn mode(&self) -> PubSubMode {
        self.mode
    }

    /// Версия сервера, определённая при создании; `None`, если режим был
    /// задан явно.
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.server_version
    }

    pub fn subscription_settings(&self) -> SubscriptionSettings {
        self.settings
    }
}

impl std::fmt::Debug for BroadcastChannel {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("BroadcastChannel")
            .field("mode", &self.mode)
            .field("settings", &self.settings)
            .field("server_version", &self.server_version)
            .finish()
    }
}
