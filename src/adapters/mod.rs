pub mod api_football;
pub mod provider;
pub mod retry;
pub mod telegram;

pub use api_football::ApiFootballProvider;
pub use provider::{GoalEvent, LiveMatchProvider, RawMatchRecord};
pub use retry::{RetryPolicy, RetryingProvider};
pub use telegram::{LogChannel, NotificationChannel, TelegramChannel};
