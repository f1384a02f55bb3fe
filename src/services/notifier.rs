//! Notifier: one message per completed pattern.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

use crate::adapters::NotificationChannel;
use crate::domain::NotificationRecord;
use crate::error::NotifyError;
use crate::services::metrics::Metrics;

pub struct Notifier {
    channel: Arc<dyn NotificationChannel>,
    destination: String,
    metrics: Option<Arc<Metrics>>,
}

fn minute_text(minute: Option<u32>) -> String {
    minute.map_or_else(|| "?".to_string(), |m| m.to_string())
}

/// Message body for `record`:
///
/// ```text
/// Team A - Team B (L1 - Country)
/// 1-0 ; 22'
/// 1-1 ; 30'
/// Reliability: 5/5
/// ```
pub fn format_message(record: &NotificationRecord) -> String {
    let competition = if record.country.is_empty() {
        record.league.clone()
    } else {
        format!("{} - {}", record.league, record.country)
    };
    format!(
        "{} - {} ({})\n{} ; {}'\n1-1 ; {}'\nReliability: {}",
        record.home,
        record.away,
        competition,
        record.first_score,
        minute_text(record.first_minute),
        minute_text(record.second_minute),
        record.reliability,
    )
}

impl Notifier {
    pub fn new(channel: Arc<dyn NotificationChannel>, destination: impl Into<String>) -> Self {
        Self {
            channel,
            destination: destination.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel.name()
    }

    /// Send one message. Failures are reported, never retried here.
    pub async fn notify(&self, record: &NotificationRecord) -> Result<(), NotifyError> {
        let text = format_message(record);
        let result = self.channel.send(&self.destination, &text).await;

        if let Some(metrics) = &self.metrics {
            metrics
                .record_notification(record, result.is_ok(), Utc::now())
                .await;
        }

        match &result {
            Ok(()) => info!(
                channel = self.channel.name(),
                home = %record.home,
                away = %record.away,
                "Notification sent"
            ),
            Err(e) => error!(
                channel = self.channel.name(),
                home = %record.home,
                away = %record.away,
                error = %e,
                "Notification failed"
            ),
        }
        result
    }
}
