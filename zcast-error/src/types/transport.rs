use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки транспорта pub/sub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Сервер не знает команду (например, SPUBLISH на Redis < 7)
    UnknownCommand { command: String },
    /// Соединение или хэндл подписки закрыт
    ConnectionClosed,
    /// Таймаут операции
    Timeout,
    /// Ошибка протокола или ответ сервера с ошибкой
    Protocol { reason: String },
    /// Ошибка ввода/вывода
    Io { reason: String },
}

impl TransportError {
    /// Проверяет, что сервер отклонил команду как неизвестную.
    ///
    /// Серверы отвечают по-разному, поэтому помимо явного варианта
    /// проверяется и текст протокольной ошибки.
    pub fn is_unknown_command(&self) -> bool {
        match self {
            Self::UnknownCommand { .. } => true,
            Self::Protocol { reason } => reason.to_ascii_lowercase().contains("unknown command"),
            _ => false,
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::UnknownCommand { command } => write!(f, "unknown command `{command}`"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Operation timed out"),
            Self::Protocol { reason } => write!(f, "Protocol error: {reason}"),
            Self::Io { reason } => write!(f, "I/O error: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownCommand { .. } => StatusCode::UnknownCommand,
            Self::ConnectionClosed => StatusCode::ConnectionClosed,
            Self::Timeout => StatusCode::Timeout,
            Self::Protocol { .. } => StatusCode::ProtocolError,
            Self::Io { .. } => StatusCode::Io,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Конвертация из std::io::Error
impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::Io {
                reason: err.to_string(),
            },
        }
    }
}
