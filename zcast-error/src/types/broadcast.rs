use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode, SubscriptionClosedError, TransportError};

/// Общая ошибка подсистемы broadcast-каналов.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastChannelError {
    #[error(transparent)]
    SubscriptionClosed(#[from] SubscriptionClosedError),

    #[error("broadcast transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid broadcast configuration: {reason}")]
    InvalidConfig { reason: String },
}

pub type BroadcastResult<T> = Result<T, BroadcastChannelError>;

impl BroadcastChannelError {
    /// Возвращает `true`, если ошибка означает закрытую подписку.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::SubscriptionClosed(_))
    }
}

impl ErrorExt for BroadcastChannelError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::SubscriptionClosed(err) => err.status_code(),
            Self::Transport(err) => err.status_code(),
            Self::InvalidConfig { .. } => StatusCode::InvalidArgs,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
