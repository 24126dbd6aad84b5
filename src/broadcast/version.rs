use std::fmt;

use tracing::warn;

use crate::transport::PubSubClient;

/// Версия сервера `major.minor.patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    /// Минимальная версия с поддержкой SPUBLISH/SSUBSCRIBE.
    pub const SHARDED_PUBSUB: Self = Self::new(7, 0, 0);

    pub const fn new(
        major: u32,
        minor: u32,
        patch: u32,
    ) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn as_tuple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }

    pub fn supports_sharded_pubsub(&self) -> bool {
        *self >= Self::SHARDED_PUBSUB
    }
}

/// Разбирает строку версии вида `7.2.3` или `7.0.0-rc1`.
///
/// Суффикс после `-` отбрасывается; отсутствующие или нечисловые
/// компоненты считаются нулями.
pub fn parse_server_version(raw: &str) -> ServerVersion {
    let core = raw.trim().split(['-', '+']).next().unwrap_or_default();
    let mut parts = core.split('.').map(|p| p.trim().parse::<u32>().unwrap_or(0));

    ServerVersion {
        major: parts.next().unwrap_or(0),
        minor: parts.next().unwrap_or(0),
        patch: parts.next().unwrap_or(0),
    }
}

/// Запрашивает версию сервера. Ошибка транспорта даёт `0.0.0`.
pub fn fetch_server_version(client: &dyn PubSubClient) -> ServerVersion {
    match client.server_version() {
        Ok(raw) => parse_server_version(&raw),
        Err(err) => {
            warn!(%err, "failed to detect server version, assuming 0.0.0");
            ServerVersion::default()
        }
    }
}

pub fn supports_sharded_pubsub(version: ServerVersion) -> bool {
    version.supports_sharded_pubsub()
}

impl From<(u32, u32, u32)> for ServerVersion {
    fn from((major, minor, patch): (u32, u32, u32)) -> Self {
        Self::new(major, minor, patch)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryBroker, MemoryBrokerConfig};

    /// Тест проверяет разбор полных, предрелизных и неполных версий.
    #[test]
    fn test_parse_versions() {
        assert_eq!(parse_server_version("7.2.3").as_tuple(), (7, 2, 3));
        assert_eq!(parse_server_version("7.0.0-rc1").as_tuple(), (7, 0, 0));
        assert_eq!(parse_server_version("6.2").as_tuple(), (6, 2, 0));
        assert_eq!(parse_server_version("").as_tuple(), (0, 0, 0));
        assert_eq!(parse_server_version("x.1.y").as_tuple(), (0, 1, 0));
    }

    /// Тест проверяет порог поддержки шардированного pub/sub.
    #[test]
    fn test_supports_sharded() {
        assert!(supports_sharded_pubsub(ServerVersion::new(7, 0, 0)));
        assert!(supports_sharded_pubsub((7, 1, 0).into()));
        assert!(!supports_sharded_pubsub((6, 2, 14).into()));
        assert!(!supports_sharded_pubsub(ServerVersion::default()));
    }

    /// Тест проверяет, что недоступная версия сервера трактуется как 0.0.0.
    #[test]
    fn test_fetch_failure_is_zero() {
        let broker = MemoryBroker::with_config(MemoryBrokerConfig {
            version: None,
            sharded_commands: true,
        });
        assert_eq!(fetch_server_version(&broker), ServerVersion::default());
        assert_eq!(broker.server_version_calls(), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(ServerVersion::new(7, 2, 3).to_string(), "7.2.3");
    }
}
