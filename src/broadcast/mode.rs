use std::time::Duration;

use bytes::Bytes;
use tracing::debug;
use zcast_error::{SubscriptionMode, TransportError};

use crate::transport::{Frame, PubSubClient, PubSubHandle, MESSAGE, SHARDED_MESSAGE};

/// Режим работы канала: обычный PUBLISH/SUBSCRIBE или шардированный
/// SPUBLISH/SSUBSCRIBE.
///
/// Выбирается один раз при создании `BroadcastChannel` и передаётся всем
/// топикам и подпискам канала.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PubSubMode {
    #[default]
    Regular,
    Sharded,
}

/// Примитивы доставки для фактического режима подписки.
pub(crate) trait DeliveryExt {
    /// Тип фрейма, который несёт данные в этом режиме.
    fn data_tag(self) -> &'static str;

    fn unsubscribe(
        self,
        handle: &mut dyn PubSubHandle,
        channel: &str,
    ) -> Result<(), TransportError>;

    fn next_frame(
        self,
        handle: &mut dyn PubSubHandle,
        timeout: Duration,
    ) -> Result<Option<Frame>, TransportError>;
}

impl PubSubMode {
    pub fn is_sharded(self) -> bool {
        matches!(self, Self::Sharded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Sharded => "sharded",
        }
    }

    /// Публикует сообщение. В шардированном режиме при ответе
    /// "unknown command" повторяет публикацию через PUBLISH.
    pub(crate) fn publish(
        self,
        client: &dyn PubSubClient,
        channel: &str,
        payload: Bytes,
    ) -> Result<usize, TransportError> {
        match self {
            Self::Regular => client.publish(channel, payload),
            Self::Sharded => match client.spublish(channel, payload.clone()) {
                Err(err) if err.is_unknown_command() => {
                    debug!(channel, %err, "SPUBLISH unsupported, falling back to PUBLISH");
                    client.publish(channel, payload)
                }
                other => other,
            },
        }
    }

    /// Подписывает хэндл на канал и возвращает фактический режим подписки.
    ///
    /// Если сервер не знает SSUBSCRIBE, подписка оформляется через SUBSCRIBE
    /// и дальше работает в обычном режиме.
    pub(crate) fn subscribe(
        self,
        handle: &mut dyn PubSubHandle,
        channel: &str,
    ) -> Result<SubscriptionMode, TransportError> {
        match self {
            Self::Regular => {
                handle.subscribe(channel)?;
                Ok(SubscriptionMode::Standard)
            }
            Self::Sharded => match handle.ssubscribe(channel) {
                Ok(()) => Ok(SubscriptionMode::Sharded),
                Err(err) if err.is_unknown_command() => {
                    debug!(channel, %err, "SSUBSCRIBE unsupported, falling back to SUBSCRIBE");
                    handle.subscribe(channel)?;
                    Ok(SubscriptionMode::Standard)
                }
                Err(err) => Err(err),
            },
        }
    }
}

impl DeliveryExt for SubscriptionMode {
    fn data_tag(self) -> &'static str {
        match self {
            Self::Standard => MESSAGE,
            Self::Sharded => SHARDED_MESSAGE,
        }
    }

    fn unsubscribe(
        self,
        handle: &mut dyn PubSubHandle,
        channel: &str,
    ) -> Result<(), TransportError> {
        match self {
            Self::Standard => handle.unsubscribe(channel),
            Self::Sharded => handle.sunsubscribe(channel),
        }
    }

    fn next_frame(
        self,
        handle: &mut dyn PubSubHandle,
        timeout: Duration,
    ) -> Result<Option<Frame>, TransportError> {
        match self {
            Self::Standard => handle.get_message(timeout),
            Self::Sharded => handle.get_sharded_message(timeout),
        }
    }
}

impl From<PubSubMode> for SubscriptionMode {
    fn from(mode: PubSubMode) -> Self {
        match mode {
            PubSubMode::Regular => SubscriptionMode::Standard,
            PubSubMode::Sharded => SubscriptionMode::Sharded,
        }
    }
}

impl std::fmt::Display for PubSubMode {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
