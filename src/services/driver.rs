//! Cycle Driver
//!
//! Runs fetch -> reconcile -> persist -> dispatch on a fixed interval, one
//! cycle at a time. Auxiliary tasks talk to it only through
//! [`DriverControl`]: they may read the last cycle's status, request an
//! immediate cycle, or change the interval. They never see the tracking state
//! itself.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Notify, RwLock, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::adapters::LiveMatchProvider;
use crate::config::{MAX_POLL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS};
use crate::coordination::shutdown::ShutdownToken;
use crate::domain::{MatchSnapshot, StateCounts, TrackedMatch, TrackingState};
use crate::error::{FetchError, GoalwatchError, Result};
use crate::persistence::TrackingStore;
use crate::services::metrics::Metrics;
use crate::services::notifier::Notifier;
use crate::tracking::{
    apply_timeline_check, check_goal_timeline, normalize_all, Reconciliation,
    ReconciliationEngine, TimelineCheck,
};

/// Shortest interval accepted at runtime
pub const MIN_INTERVAL: Duration = Duration::from_secs(MIN_POLL_INTERVAL_SECS);
/// Longest interval accepted at runtime
pub const MAX_INTERVAL: Duration = Duration::from_secs(MAX_POLL_INTERVAL_SECS);

/// Goal-timeline requests one cycle may spend; the quota floor reserves them.
pub const EVENT_LOOKUPS_PER_CYCLE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CyclePhase {
    Idle,
    Fetching,
    Reconciling,
    Persisting,
    /// Sending the notifications of an already persisted cycle
    Dispatching,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CyclePhase::Idle => write!(f, "IDLE"),
            CyclePhase::Fetching => write!(f, "FETCHING"),
            CyclePhase::Reconciling => write!(f, "RECONCILING"),
            CyclePhase::Persisting => write!(f, "PERSISTING"),
            CyclePhase::Dispatching => write!(f, "DISPATCHING"),
        }
    }
}

/// Outcome of one successful cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub cycle_id: u64,
    pub fetched: usize,
    /// Records the normalizer could not use
    pub malformed: usize,
    /// Snapshots the engine rejected
    pub rejected: usize,
    /// Whether the cycle changed durable state
    pub committed: bool,
    pub notifications: usize,
    pub delivered: usize,
    pub duration_ms: u64,
}

/// What the command interface can report about the driver.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStatus {
    pub cycles_started: u64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Error of the most recent cycle; cleared by the next successful one
    pub last_error: Option<String>,
    pub last_summary: Option<CycleSummary>,
    /// Collection sizes as of the last commit
    pub counts: StateCounts,
}

/// State shared between the driver and auxiliary tasks.
pub struct DriverControl {
    /// The only flag written by both sides
    force_requested: Mutex<bool>,
    wake: Notify,
    interval: RwLock<Duration>,
    interval_changed: Notify,
    min_interval: Duration,
    phase_tx: watch::Sender<CyclePhase>,
    status: RwLock<CycleStatus>,
    /// One permit, held for the length of a store write; closed at shutdown
    commits: Semaphore,
}

impl DriverControl {
    /// `interval` is raised to `min_interval` if below it and capped at
    /// [`MAX_INTERVAL`]
    pub fn new(interval: Duration, min_interval: Duration) -> Self {
        let (phase_tx, _) = watch::channel(CyclePhase::Idle);
        Self {
            force_requested: Mutex::new(false),
            wake: Notify::new(),
            interval: RwLock::new(interval.max(min_interval).min(MAX_INTERVAL)),
            interval_changed: Notify::new(),
            min_interval,
            phase_tx,
            status: RwLock::new(CycleStatus::default()),
            commits: Semaphore::new(1),
        }
    }

    /// Ask for a cycle as soon as the driver is idle. Returns false when a
    /// request was already pending.
    pub async fn request_force_cycle(&self) -> bool {
        let mut requested = self.force_requested.lock().await;
        let fresh = !*requested;
        *requested = true;
        drop(requested);
        self.wake.notify_one();
        fresh
    }

    async fn take_force_request(&self) -> bool {
        let mut requested = self.force_requested.lock().await;
        std::mem::replace(&mut *requested, false)
    }

    async fn wait_for_force_request(&self) {
        loop {
            self.wake.notified().await;
            if self.take_force_request().await {
                return;
            }
        }
    }

    pub async fn interval(&self) -> Duration {
        *self.interval.read().await
    }

    /// Quota floor for the interval
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Change the polling interval; takes effect in the current idle wait.
    pub async fn set_interval(&self, interval: Duration) -> Result<Duration> {
        if interval < MIN_INTERVAL || interval > MAX_INTERVAL {
            return Err(GoalwatchError::Validation(format!(
                "interval must be between {} and {} minutes",
                MIN_INTERVAL.as_secs() / 60,
                MAX_INTERVAL.as_secs() / 60
            )));
        }
        if interval < self.min_interval {
            return Err(GoalwatchError::Validation(format!(
                "interval below the provider quota floor of {}s",
                self.min_interval.as_secs()
            )));
        }
        *self.interval.write().await = interval;
        self.interval_changed.notify_one();
        info!(interval_secs = interval.as_secs(), "Polling interval changed");
        Ok(interval)
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase_tx.borrow()
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.phase_tx.send_replace(phase);
    }

    /// Wait for any in-flight commit to finish, then refuse new ones.
    ///
    /// After this returns the store is not written again by this process; a
    /// cycle reaching its commit step aborts without notifying.
    pub async fn seal_commits(&self) {
        let in_flight = self.commits.acquire().await;
        self.commits.close();
        drop(in_flight);
        info!("Store commits sealed");
    }

    pub async fn status(&self) -> CycleStatus {
        self.status.read().await.clone()
    }

    /// When the next scheduled cycle is due, if one has finished yet
    pub async fn next_cycle_at(&self) -> Option<DateTime<Utc>> {
        let finished = self.status.read().await.last_finished_at?;
        let interval = chrono::Duration::from_std(self.interval().await).ok()?;
        finished.checked_add_signed(interval)
    }

    async fn publish_counts(&self, counts: StateCounts) {
        self.status.write().await.counts = counts;
    }

    async fn begin_cycle(&self, at: DateTime<Utc>) -> u64 {
        let mut status = self.status.write().await;
        status.cycles_started += 1;
        status.last_started_at = Some(at);
        status.cycles_started
    }

    async fn finish_cycle(
        &self,
        outcome: &Result<CycleSummary>,
        counts: StateCounts,
        at: DateTime<Utc>,
    ) {
        let mut status = self.status.write().await;
        status.last_finished_at = Some(at);
        status.counts = counts;
        match outcome {
            Ok(summary) => {
                status.last_success_at = Some(at);
                status.last_error = None;
                status.last_summary = Some(summary.clone());
            }
            Err(e) => status.last_error = Some(e.to_string()),
        }
    }
}

enum Wake {
    Timer,
    Forced,
    Shutdown,
}

pub struct CycleDriver {
    provider: Arc<dyn LiveMatchProvider>,
    store: Arc<dyn TrackingStore>,
    engine: ReconciliationEngine,
    notifier: Notifier,
    control: Arc<DriverControl>,
    metrics: Arc<Metrics>,
    fetch_timeout: Duration,
    event_lookups: bool,
    /// Last committed state
    state: TrackingState,
    loaded: bool,
}

impl CycleDriver {
    pub fn new(
        provider: Arc<dyn LiveMatchProvider>,
        store: Arc<dyn TrackingStore>,
        engine: ReconciliationEngine,
        notifier: Notifier,
        control: Arc<DriverControl>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            provider,
            store,
            engine,
            notifier,
            control,
            metrics,
            fetch_timeout: Duration::from_secs(15),
            event_lookups: false,
            state: TrackingState::default(),
            loaded: false,
        }
    }

    /// Bound on a whole fetch, provider retries included
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Settle the minutes of a completed pattern from the provider's goal
    /// timeline before committing it
    pub fn with_event_lookups(mut self, enabled: bool) -> Self {
        self.event_lookups = enabled;
        self
    }

    pub fn control(&self) -> Arc<DriverControl> {
        Arc::clone(&self.control)
    }

    pub fn state(&self) -> &TrackingState {
        &self.state
    }

    async fn ensure_loaded(&mut self) {
        if !self.loaded {
            self.state = self.store.load().await;
            self.loaded = true;
            self.control.publish_counts(self.state.counts()).await;
        }
    }

    /// Run one full cycle and record its outcome.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        self.ensure_loaded().await;

        // Any pending request is served by this cycle
        self.control.take_force_request().await;
        let cycle_id = self.control.begin_cycle(Utc::now()).await;

        let outcome = self.execute_cycle(cycle_id).await;
        self.control.set_phase(CyclePhase::Idle);

        match &outcome {
            Ok(summary) => {
                self.metrics.inc_cycles_completed();
                info!(
                    cycle_id,
                    fetched = summary.fetched,
                    malformed = summary.malformed,
                    notifications = summary.notifications,
                    duration_ms = summary.duration_ms,
                    "Cycle complete"
                );
            }
            Err(e) => {
                self.metrics.inc_cycles_failed();
                warn!(cycle_id, error = %e, "Cycle aborted, state unchanged");
            }
        }

        self.control
            .finish_cycle(&outcome, self.state.counts(), Utc::now())
            .await;
        outcome
    }

    #[instrument(skip(self))]
    async fn execute_cycle(&mut self, cycle_id: u64) -> Result<CycleSummary> {
        let started = Instant::now();

        self.control.set_phase(CyclePhase::Fetching);
        let records = match tokio::time::timeout(
            self.fetch_timeout,
            self.provider.fetch_live_matches(),
        )
        .await
        {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                self.metrics.inc_fetch_failures();
                return Err(e.into());
            }
            Err(_) => {
                self.metrics.inc_fetch_failures();
                return Err(FetchError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
                .into());
            }
        };

        self.control.set_phase(CyclePhase::Reconciling);
        let (snapshots, malformed) = normalize_all(&records);
        for (index, err) in &malformed {
            debug!(index, error = %err, "Skipping malformed record");
        }
        if !malformed.is_empty() {
            self.metrics.add_malformed_records(malformed.len());
            warn!(count = malformed.len(), "Malformed provider records skipped");
        }

        let now = Utc::now();
        let mut reconciliation = self.engine.reconcile(&self.state, &snapshots, now);
        if self.event_lookups && !reconciliation.notifications.is_empty() {
            self.check_timelines(&mut reconciliation, &snapshots, now).await;
        }
        let rejected = reconciliation.rejected();

        let Ok(commit) = self.control.commits.acquire().await else {
            return Err(GoalwatchError::ShuttingDown);
        };
        self.control.set_phase(CyclePhase::Persisting);
        let committed = reconciliation.state != self.state;
        if committed {
            if let Err(e) = self.store.save(&reconciliation.state).await {
                self.metrics.inc_persist_failures();
                return Err(e.into());
            }
            self.state = reconciliation.state;
        }
        drop(commit);

        self.control.set_phase(CyclePhase::Dispatching);
        let notifications = reconciliation.notifications.len();
        let mut delivered = 0;
        for (key, record) in &reconciliation.notifications {
            match self.notifier.notify(record).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(key = %key, error = %e, "Notification lost"),
            }
        }

        Ok(CycleSummary {
            cycle_id,
            fetched: records.len(),
            malformed: malformed.len(),
            rejected,
            committed,
            notifications,
            delivered,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Ask the provider for the goal timeline of this cycle's patterns and
    /// fold the verdicts in. Failures keep the polled minutes.
    async fn check_timelines(
        &self,
        reconciliation: &mut Reconciliation,
        snapshots: &[MatchSnapshot],
        now: DateTime<Utc>,
    ) {
        let candidates: Vec<_> = reconciliation
            .notifications
            .iter()
            .filter_map(|(key, _)| {
                let snapshot = snapshots.iter().find(|s| &s.key() == key)?;
                let fixture_id = snapshot.external_id.clone()?;
                let Some(TrackedMatch::Leading { leading_side, .. }) = self.state.tracked.get(key)
                else {
                    return None;
                };
                Some((key.clone(), fixture_id, *leading_side, snapshot))
            })
            .take(EVENT_LOOKUPS_PER_CYCLE)
            .collect();

        for (key, fixture_id, leading_side, snapshot) in candidates {
            let events = match tokio::time::timeout(
                self.fetch_timeout,
                self.provider.fixture_events(&fixture_id),
            )
            .await
            {
                Ok(Ok(events)) => events,
                Ok(Err(e)) => {
                    warn!(key = %key, error = %e, "Goal timeline unavailable, keeping polled minutes");
                    continue;
                }
                Err(_) => {
                    warn!(key = %key, "Goal timeline timed out, keeping polled minutes");
                    continue;
                }
            };

            let check = check_goal_timeline(
                &events,
                &snapshot.home,
                &snapshot.away,
                leading_side,
                self.engine.config().window_minutes,
            );
            match &check {
                TimelineCheck::Confirmed {
                    first_minute,
                    second_minute,
                    reliability,
                } => info!(
                    key = %key,
                    first_minute,
                    second_minute,
                    reliability = %reliability,
                    "Goal timeline confirms pattern"
                ),
                TimelineCheck::Contradicted(reason) => {
                    warn!(key = %key, reason = %reason, "Goal timeline contradicts pattern, withdrawn")
                }
                TimelineCheck::Inconclusive => {
                    debug!(key = %key, goals = events.len(), "Goal timeline inconclusive")
                }
            }
            apply_timeline_check(reconciliation, &key, &check, now);
        }
    }

    async fn idle_wait(&self, shutdown: &mut ShutdownToken) -> Wake {
        if self.control.take_force_request().await {
            return Wake::Forced;
        }
        let idle_since = tokio::time::Instant::now();
        loop {
            let deadline = idle_since + self.control.interval().await;
            tokio::select! {
                _ = shutdown.wait_for_shutdown() => return Wake::Shutdown,
                _ = tokio::time::sleep_until(deadline) => return Wake::Timer,
                _ = self.control.wait_for_force_request() => return Wake::Forced,
                _ = self.control.interval_changed.notified() => continue,
            }
        }
    }

    /// Loop until shutdown. A shutdown request is only acted on between
    /// cycles, so an in-flight commit always completes.
    pub async fn run(mut self, mut shutdown: ShutdownToken) {
        let interval_secs = self.control.interval().await.as_secs();
        info!(
            interval_secs = interval_secs,
            channel = self.notifier.channel_name(),
            "Cycle driver started"
        );

        loop {
            if shutdown.is_shutdown_requested() {
                break;
            }
            // Outcome is already logged and published to the control
            let _ = self.run_cycle().await;
            self.metrics.log_status(self.state.counts());

            match self.idle_wait(&mut shutdown).await {
                Wake::Shutdown => break,
                Wake::Forced => info!("Forced cycle requested"),
                Wake::Timer => {}
            }
        }

        self.control.set_phase(CyclePhase::Idle);
        info!("Cycle driver stopped");
    }
}
