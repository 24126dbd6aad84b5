use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Режим доставки, в котором работает подписка.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionMode {
    /// Обычный PUBLISH/SUBSCRIBE.
    Standard,
    /// Шардированный SPUBLISH/SSUBSCRIBE.
    Sharded,
}

/// Причина, по которой подписка недоступна.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    /// Подписка закрыта вызовом `close()`.
    Closed,
    /// Транспортный хэндл уже освобождён.
    CleanedUp,
}

/// Операция над подпиской после её закрытия.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionClosedError {
    pub mode: SubscriptionMode,
    pub reason: ClosedReason,
}

impl SubscriptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Sharded => "sharded",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Standard => "pub/sub",
            Self::Sharded => "sharded pub/sub",
        }
    }
}

impl SubscriptionClosedError {
    pub fn closed(mode: SubscriptionMode) -> Self {
        Self {
            mode,
            reason: ClosedReason::Closed,
        }
    }

    pub fn cleaned_up(mode: SubscriptionMode) -> Self {
        Self {
            mode,
            reason: ClosedReason::CleanedUp,
        }
    }
}

impl std::fmt::Display for SubscriptionMode {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for SubscriptionClosedError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self.reason {
            ClosedReason::Closed => write!(f, "The {} subscription is closed", self.mode.label()),
            ClosedReason::CleanedUp => {
                write!(f, "The {} subscription has been cleaned up", self.mode.label())
            }
        }
    }
}

impl std::error::Error for SubscriptionClosedError {}

impl ErrorExt for SubscriptionClosedError {
    fn status_code(&self) -> StatusCode {
        match self.reason {
            ClosedReason::Closed => StatusCode::SubscriptionClosed,
            ClosedReason::CleanedUp => StatusCode::SubscriptionCleanedUp,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
