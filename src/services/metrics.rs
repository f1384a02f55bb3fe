use crate::domain::{NotificationRecord, StateCounts};
use crate::tracking::Transition;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::info;

/// Entries kept in each recent-activity log
const RECENT_LOG_CAPACITY: usize = 50;

/// One request against the live-event provider
#[derive(Debug, Clone, Serialize)]
pub struct ApiCallEntry {
    pub at: DateTime<Utc>,
    pub endpoint: String,
    pub status: Option<u16>,
    pub matches: Option<usize>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// One dispatched (or attempted) notification
#[derive(Debug, Clone, Serialize)]
pub struct NotificationLogEntry {
    pub at: DateTime<Utc>,
    pub home: String,
    pub away: String,
    pub league: String,
    pub first_score: String,
    pub delivered: bool,
}

/// Notifications sent on one UTC day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub notifications: u64,
}

/// Metrics collector for observability
pub struct Metrics {
    /// Cycles that ran to completion
    pub cycles_completed: AtomicU64,
    /// Cycles aborted by a fetch or storage failure
    pub cycles_failed: AtomicU64,
    pub fetch_failures: AtomicU64,
    /// Provider records that failed normalization
    pub malformed_records: AtomicU64,
    pub persist_failures: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notifications_failed: AtomicU64,
    transitions: DashMap<&'static str, u64>,
    daily_notifications: DashMap<NaiveDate, u64>,
    api_calls: RwLock<VecDeque<ApiCallEntry>>,
    notification_log: RwLock<VecDeque<NotificationLogEntry>>,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            cycles_completed: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            malformed_records: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            transitions: DashMap::new(),
            daily_notifications: DashMap::new(),
            api_calls: RwLock::new(VecDeque::with_capacity(RECENT_LOG_CAPACITY)),
            notification_log: RwLock::new(VecDeque::with_capacity(RECENT_LOG_CAPACITY)),
        }
    }

    pub fn inc_cycles_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cycles_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fetch_failures(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_malformed_records(&self, count: usize) {
        self.malformed_records
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn inc_persist_failures(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one engine transition by kind
    pub fn record_transition(&self, transition: &Transition) {
        *self.transitions.entry(transition.kind()).or_insert(0) += 1;
    }

    pub fn transition_count(&self, kind: &str) -> u64 {
        self.transitions.get(kind).map(|v| *v).unwrap_or(0)
    }

    pub async fn record_api_call(&self, entry: ApiCallEntry) {
        let mut log = self.api_calls.write().await;
        if log.len() == RECENT_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// Record a notification attempt at `at`
    pub async fn record_notification(
        &self,
        record: &NotificationRecord,
        delivered: bool,
        at: DateTime<Utc>,
    ) {
        if delivered {
            self.notifications_sent.fetch_add(1, Ordering::Relaxed);
            *self.daily_notifications.entry(at.date_naive()).or_insert(0) += 1;
        } else {
            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }

        let mut log = self.notification_log.write().await;
        if log.len() == RECENT_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(NotificationLogEntry {
            at,
            home: record.home.clone(),
            away: record.away.clone(),
            league: record.league.clone(),
            first_score: record.first_score.clone(),
            delivered,
        });
    }

    /// Most recent API calls, newest first
    pub async fn recent_api_calls(&self, limit: usize) -> Vec<ApiCallEntry> {
        self.api_calls.read().await.iter().rev().take(limit).cloned().collect()
    }

    /// Most recent notifications, newest first
    pub async fn recent_notifications(&self, limit: usize) -> Vec<NotificationLogEntry> {
        self.notification_log
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn notifications_on(&self, date: NaiveDate) -> u64 {
        self.daily_notifications.get(&date).map(|v| *v).unwrap_or(0)
    }

    /// Per-day notification counts for the `days` days ending `today`, oldest first
    pub fn daily_stats(&self, today: NaiveDate, days: u32) -> Vec<DailyCount> {
        (0..i64::from(days))
            .rev()
            .map(|back| {
                let date = today - Duration::days(back);
                DailyCount {
                    date,
                    notifications: self.notifications_on(date),
                }
            })
            .collect()
    }

    /// Export metrics in Prometheus format
    pub fn prometheus(&self, counts: StateCounts) -> String {
        let mut out = format!(
            r#"# HELP goalwatch_cycles_completed_total Polling cycles completed
# TYPE goalwatch_cycles_completed_total counter
goalwatch_cycles_completed_total {}

# HELP goalwatch_cycles_failed_total Polling cycles aborted
# TYPE goalwatch_cycles_failed_total counter
goalwatch_cycles_failed_total {}

# HELP goalwatch_fetch_failures_total Provider fetch failures
# TYPE goalwatch_fetch_failures_total counter
goalwatch_fetch_failures_total {}

# HELP goalwatch_malformed_records_total Provider records rejected by the normalizer
# TYPE goalwatch_malformed_records_total counter
goalwatch_malformed_records_total {}

# HELP goalwatch_persist_failures_total State commits that failed
# TYPE goalwatch_persist_failures_total counter
goalwatch_persist_failures_total {}

# HELP goalwatch_notifications_sent_total Notifications delivered
# TYPE goalwatch_notifications_sent_total counter
goalwatch_notifications_sent_total {}

# HELP goalwatch_notifications_failed_total Notifications that could not be delivered
# TYPE goalwatch_notifications_failed_total counter
goalwatch_notifications_failed_total {}

# HELP goalwatch_tracked_matches Matches currently tracked
# TYPE goalwatch_tracked_matches gauge
goalwatch_tracked_matches {}

# HELP goalwatch_leading_matches Tracked matches waiting for an equaliser
# TYPE goalwatch_leading_matches gauge
goalwatch_leading_matches {}

# HELP goalwatch_notified_matches Matches ever notified
# TYPE goalwatch_notified_matches gauge
goalwatch_notified_matches {}

# HELP goalwatch_deadlisted_matches Matches on the deadlist
# TYPE goalwatch_deadlisted_matches gauge
goalwatch_deadlisted_matches {}

# HELP goalwatch_transitions_total Engine transitions by kind
# TYPE goalwatch_transitions_total counter
"#,
            self.cycles_completed.load(Ordering::Relaxed),
            self.cycles_failed.load(Ordering::Relaxed),
            self.fetch_failures.load(Ordering::Relaxed),
            self.malformed_records.load(Ordering::Relaxed),
            self.persist_failures.load(Ordering::Relaxed),
            self.notifications_sent.load(Ordering::Relaxed),
            self.notifications_failed.load(Ordering::Relaxed),
            counts.tracked,
            counts.leading,
            counts.notified,
            counts.deadlisted,
        );

        let mut kinds: Vec<(&'static str, u64)> = self
            .transitions
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        kinds.sort_unstable();
        for (kind, count) in kinds {
            out.push_str(&format!(
                "goalwatch_transitions_total{{kind=\"{}\"}} {}\n",
                kind, count
            ));
        }
        out
    }

    /// Log periodic status
    pub fn log_status(&self, counts: StateCounts) {
        info!(
            cycles = self.cycles_completed.load(Ordering::Relaxed),
            failed = self.cycles_failed.load(Ordering::Relaxed),
            notified_total = self.notifications_sent.load(Ordering::Relaxed),
            tracked = counts.tracked,
            leading = counts.leading,
            deadlisted = counts.deadlisted,
            "Watcher status"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeadlistReason;

    #[tokio::test]
    async fn test_notification_log_is_bounded() {
        let metrics = Metrics::new();
        let now = Utc::now();
        let record = NotificationRecord {
            home: "A".into(),
            away: "B".into(),
            first_score: "1-0".into(),
            ..Default::default()
        };
        for _ in 0..(RECENT_LOG_CAPACITY + 5) {
            metrics.record_notification(&record, true, now).await;
        }
        metrics.record_notification(&record, false, now).await;

        assert_eq!(metrics.recent_notifications(100).await.len(), RECENT_LOG_CAPACITY);
        assert!(!metrics.recent_notifications(1).await[0].delivered);
        assert_eq!(metrics.notifications_on(now.date_naive()), 55);
        assert_eq!(metrics.notifications_failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_api_calls_newest_first() {
        let metrics = Metrics::new();
        for i in 0..3 {
            metrics
                .record_api_call(ApiCallEntry {
                    at: Utc::now(),
                    endpoint: format!("call-{}", i),
                    status: Some(200),
                    matches: Some(i),
                    latency_ms: 5,
                    error: None,
                })
                .await;
        }
        let calls = metrics.recent_api_calls(2).await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].endpoint, "call-2");
    }

    #[test]
    fn test_daily_stats_window() {
        let metrics = Metrics::new();
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        metrics.daily_notifications.insert(today - Duration::days(2), 3);
        metrics.daily_notifications.insert(today - Duration::days(9), 7);

        let stats = metrics.daily_stats(today, 7);
        assert_eq!(stats.len(), 7);
        assert_eq!(stats[6].date, today);
        assert_eq!(stats[4].notifications, 3);
        assert_eq!(stats.iter().map(|d| d.notifications).sum::<u64>(), 3);
    }

    #[test]
    fn test_prometheus_includes_transitions() {
        let metrics = Metrics::new();
        metrics.record_transition(&Transition::Notified);
        metrics.record_transition(&Transition::Deadlisted(DeadlistReason::Finished));
        metrics.inc_cycles_completed();

        let text = metrics.prometheus(StateCounts {
            tracked: 4,
            leading: 1,
            notified: 2,
            deadlisted: 9,
        });
        assert!(text.contains("goalwatch_cycles_completed_total 1"));
        assert!(text.contains("goalwatch_deadlisted_matches 9"));
        assert!(text.contains("goalwatch_transitions_total{kind=\"notified\"} 1"));
        assert!(text.contains("goalwatch_transitions_total{kind=\"deadlisted\"} 1"));
    }
}
