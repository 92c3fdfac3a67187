pub mod notifications;

pub use notifications::{DepositNotifier, TelegramNotifier};
