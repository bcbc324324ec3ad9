pub mod logging;
pub mod telegram;

pub use logging::LoggingNotifier;
pub use telegram::TelegramNotifier;
