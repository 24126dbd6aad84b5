pub mod broadcast;
pub mod subscription;
pub mod transport;

// Публичный экспорт всех типов ошибок из вложенных модулей, чтобы упростить
// доступ к ним из внешнего кода.
pub use broadcast::*;
pub use subscription::*;
pub use transport::*;
