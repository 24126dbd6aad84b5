//! Транспорт pub/sub, поверх которого работают broadcast-каналы.
//!
//! Модуль описывает минимальный контракт брокера в духе Redis:
//! - `PubSubClient`: разделяемое соединение (PUBLISH/SPUBLISH, создание
//!   хэндлов подписки, версия сервера);
//! - `PubSubHandle`: отдельный хэндл подписки (SUBSCRIBE/SSUBSCRIBE,
//!   получение фреймов, закрытие);
//! - `Frame`: сырой фрейм брокера.
//!
//! `memory` содержит внутрипроцессную реализацию контракта.

pub mod memory;

use std::time::Duration;

use bytes::Bytes;
use zcast_error::TransportError;

pub use memory::{HandleStats, MemoryBroker, MemoryBrokerConfig};

/// Тип фрейма с данными обычного PUBLISH.
pub const MESSAGE: &str = "message";
/// Тип фрейма с данными шардированного SPUBLISH.
pub const SHARDED_MESSAGE: &str = "smessage";

/// Сырой фрейм, полученный от брокера.
///
/// Помимо сообщений с данными брокер присылает подтверждения
/// (`subscribe`, `unsubscribe`, ...), у которых `data` содержит число
/// активных подписок хэндла.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Тип фрейма: `message`, `smessage`, `subscribe`, ...
    pub kind: String,
    /// Канал, к которому относится фрейм.
    pub channel: String,
    /// Полезная нагрузка.
    pub data: Bytes,
}

impl Frame {
    pub fn new(
        kind: impl Into<String>,
        channel: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind: kind.into(),
            channel: channel.into(),
            data: data.into(),
        }
    }

    /// Фрейм обычного сообщения (`message`).
    pub fn message(
        channel: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self::new(MESSAGE, channel, data)
    }

    /// Фрейм шардированного сообщения (`smessage`).
    pub fn sharded_message(
        channel: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self::new(SHARDED_MESSAGE, channel, data)
    }
}

/// Разделяемый клиент брокера.
///
/// Клиент используется всеми топиками и подписками одного канала
/// одновременно, поэтому методы принимают `&self`. Подсистема никогда не
/// закрывает сам клиент.
pub trait PubSubClient: Send + Sync {
    /// PUBLISH. Возвращает количество получателей.
    fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> Result<usize, TransportError>;

    /// SPUBLISH. Возвращает количество получателей.
    fn spublish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> Result<usize, TransportError>;

    /// Создаёт новый хэндл подписки.
    fn pubsub(&self) -> Result<Box<dyn PubSubHandle>, TransportError>;

    /// Версия сервера в виде строки (`"7.2.3"`, `"7.0.0-rc1"`).
    fn server_version(&self) -> Result<String, TransportError>;
}

/// Хэндл подписки, принадлежащий ровно одной `Subscription`.
pub trait PubSubHandle: Send {
    fn subscribe(
        &mut self,
        channel: &str,
    ) -> Result<(), TransportError>;

    fn ssubscribe(
        &mut self,
        channel: &str,
    ) -> Result<(), TransportError>;

    fn unsubscribe(
        &mut self,
        channel: &str,
    ) -> Result<(), TransportError>;

    fn sunsubscribe(
        &mut self,
        channel: &str,
    ) -> Result<(), TransportError>;

    /// Ждёт следующий фрейм не дольше `timeout`. `Ok(None)` — таймаут.
    fn get_message(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Frame>, TransportError>;

    /// То же, что `get_message`, для шардированных подписок.
    fn get_sharded_message(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Frame>, TransportError>;

    /// Закрывает хэндл. Повторные операции после закрытия возвращают
    /// `TransportError::ConnectionClosed`.
    fn close(&mut self) -> Result<(), TransportError>;
}
