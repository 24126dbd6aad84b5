use tracing::{debug, error, info, trace, warn};
use zcast_error::{ErrorExt, LogLevel};

/// Пишет событие об ошибке на уровне, который задаёт её статус-код.
pub(crate) fn log_error(
    topic: &str,
    err: &dyn ErrorExt,
    message: &str,
) {
    let status = err.status_code();
    let error_type = err.type_name();
    let detail = err.log_message();
    match err.log_level() {
        LogLevel::Trace => trace!(topic, %status, %error_type, %detail, "{message}"),
        LogLevel::Debug => debug!(topic, %status, %error_type, %detail, "{message}"),
        LogLevel::Info => info!(topic, %status, %error_type, %detail, "{message}"),
        LogLevel::Warn => warn!(topic, %status, %error_type, %detail, "{message}"),
        LogLevel::Error => error!(topic, %status, %error_type, %detail, "{message}"),
    }
}
