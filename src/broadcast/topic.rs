use std::{fmt, sync::Arc};

use bytes::Bytes;
use tracing::trace;
use zcast_error::BroadcastResult;

use super::{mode::PubSubMode, subscription::Subscription};
use crate::{config::SubscriptionSettings, transport::PubSubClient};

/// Возможность публиковать сообщения в топик.
pub trait Producer: Send + Sync {
    /// Публикует сообщение. Отсутствие подписчиков ошибкой не является.
    fn publish(
        &self,
        payload: Bytes,
    ) -> BroadcastResult<()>;
}

/// Возможность подписываться на топик.
pub trait Subscriber: Send + Sync {
    /// Создаёт новую подписку. Брокер не затрагивается до первого чтения.
    fn subscribe(&self) -> Subscription;
}

/// Именованный топик, привязанный к клиенту брокера.
///
/// Топик ничего не хранит, кроме имени и настроек: не отслеживает
/// подписки и не держит фоновых ресурсов. Создаётся через
/// [`BroadcastChannel::topic`](super::BroadcastChannel::topic).
#[derive(Clone)]
pub struct Topic {
    client: Arc<dyn PubSubClient>,
    name: Arc<str>,
    mode: PubSubMode,
    settings: SubscriptionSettings,
}

impl Topic {
    pub(crate) fn new(
        client: Arc<dyn PubSubClient>,
        name: impl Into<Arc<str>>,
        mode: PubSubMode,
        settings: SubscriptionSettings,
    ) -> Self {
        Self {
            client,
            name: name.into(),
            mode,
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> PubSubMode {
        self.mode
    }

    /// Тот же топик, суженный до возможности публикации.
    pub fn as_producer(&self) -> &dyn Producer {
        self
    }

    /// Тот же топик, суженный до возможности подписки.
    pub fn as_subscriber(&self) -> &dyn Subscriber {
        self
    }
}

impl Producer for Topic {
    fn publish(
        &self,
        payload: Bytes,
    ) -> BroadcastResult<()> {
        let receivers = self
            .mode
            .publish(self.client.as_ref(), &self.name, payload)?;
        trace!(topic = %self.name, receivers, "published");
        Ok(())
    }
}

impl Subscriber for Topic {
    fn subscribe(&self) -> Subscription {
        Subscription::new(
            Arc::clone(&self.client),
            self.name.as_ref(),
            self.mode,
            self.settings,
        )
    }
}

impl fmt::Debug for Topic {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}
