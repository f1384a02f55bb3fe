pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod services;
pub mod tracking;

pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal};
pub use error::{GoalwatchError, Result};
pub use persistence::{FileTrackingStore, TrackingStore};
pub use services::{CycleDriver, DriverControl, Metrics, Notifier};
pub use tracking::ReconciliationEngine;
