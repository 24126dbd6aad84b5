use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use zcast_error::{BroadcastChannelError, BroadcastResult};

use crate::logging::LoggingConfig;

/// Параметры одной подписки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSettings {
    /// Ёмкость очереди подписки; при переполнении вытесняется самое старое
    /// сообщение.
    pub queue_capacity: usize,
    /// Интервал опроса транспорта фоновым потоком, мс.
    pub poll_interval_ms: u64,
    /// Сколько ждать завершения фонового потока при `close()`, мс.
    pub join_timeout_ms: u64,
}

/// Конфигурация broadcast-каналов.
///
/// Значения по умолчанию переопределяются переменными окружения с
/// префиксом `ZCAST_`, вложенные ключи разделяются `__`:
/// `ZCAST_SUBSCRIPTION__QUEUE_CAPACITY=64`, `ZCAST_USE_SHARDED_PUBSUB=true`,
/// `ZCAST_LOG__FORMAT=json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub subscription: SubscriptionSettings,
    /// `None` — определить режим по версии сервера.
    pub use_sharded_pubsub: Option<bool>,
    pub log: LoggingConfig,
}

impl SubscriptionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Проверяет, что ёмкость очереди и интервал опроса ненулевые.
    pub fn validate(&self) -> BroadcastResult<()> {
        if self.queue_capacity == 0 {
            return Err(BroadcastChannelError::InvalidConfig {
                reason: "queue_capacity must be greater than zero".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(BroadcastChannelError::InvalidConfig {
                reason: "poll_interval_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = SubscriptionSettings::default();
        let cfg = Config::builder()
            // Добавляем значения по умолчанию
            .set_default("subscription.queue_capacity", defaults.queue_capacity as u64)?
            .set_default("subscription.poll_interval_ms", defaults.poll_interval_ms)?
            .set_default("subscription.join_timeout_ms", defaults.join_timeout_ms)?
            .set_default("log.level", "info")?
            // Добавляем переменные окружения с префиксом ZCAST_
            .add_source(
                Environment::with_prefix("ZCAST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // Десериализуем конфигурацию в нашу структуру
        cfg.try_deserialize()
    }

    pub fn validate(&self) -> BroadcastResult<()> {
        self.subscription.validate()
    }
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            poll_interval_ms: 100,
            join_timeout_ms: 1000,
        }
    }
}
