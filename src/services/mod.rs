pub mod driver;
pub mod health;
pub mod metrics;
pub mod notifier;

pub use driver::{CycleDriver, CyclePhase, CycleStatus, CycleSummary, DriverControl};
pub use health::{ComponentHealth, HealthResponse, HealthServer, HealthState, HealthStatus};
pub use metrics::Metrics;
pub use notifier::{format_message, Notifier};
