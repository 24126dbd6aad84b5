pub mod config;
mod events;
mod filters;
mod formatter;

pub use self::config::{LogFormat, LoggingConfig};
pub(crate) use events::log_error;
pub use filters::build_filter_from_config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError};

/// Инициализация логирования с конфигурацией.
///
/// Использует `try_init`, поэтому повторный вызов (например, из нескольких
/// тестов) возвращает ошибку, а не паникует.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let env_filter = filters::build_filter_from_config(config);
    let fmt_layer = formatter::build_formatter_from_config(config);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        format = ?config.format,
        "Logging system initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что повторная инициализация не паникует.
    #[test]
    fn test_init_logging_twice_is_harmless() {
        let cfg = LoggingConfig {
            with_ansi: false,
            ..Default::default()
        };
        let _ = init_logging(&cfg);
        assert!(init_logging(&cfg).is_err());
    }
}
