//! Reconciliation Engine
//!
//! Merges one cycle's snapshots into the previously committed
//! [`TrackingState`] and decides which matches completed the
//! 0-0 -> lead -> 1-1 pattern. The engine is pure: it never touches storage
//! or the network, and takes the wall clock as an argument so a cycle can be
//! replayed exactly.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{TrackingConfig, UnseenLeadPolicy};
use crate::domain::{
    DeadlistEntry, DeadlistReason, LeadingSide, MatchKey, MatchSnapshot, MatchStatus,
    NotificationRecord, Reliability, Score, TrackedMatch, TrackingState,
};
use crate::error::SnapshotError;
use crate::services::metrics::Metrics;
use crate::tracking::timing::{check_same_period, corrected_goal_minute, elapsed_since_goal};

/// Tunables of the state machine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max match-minutes from first goal to equaliser, inclusive
    pub window_minutes: i64,
    /// Subtracted from the minute a 0-0 -> lead change is first observed
    pub goal_minute_correction: u32,
    pub stale_grace: Duration,
    pub scoreless_grace: Duration,
    pub deadlist_retention: Duration,
    pub unseen_lead_policy: UnseenLeadPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&TrackingConfig::default())
    }
}

impl From<&TrackingConfig> for EngineConfig {
    fn from(cfg: &TrackingConfig) -> Self {
        Self {
            window_minutes: i64::from(cfg.window_minutes),
            goal_minute_correction: cfg.goal_minute_correction,
            stale_grace: Duration::minutes(i64::from(cfg.stale_grace_minutes)),
            scoreless_grace: Duration::minutes(i64::from(cfg.scoreless_grace_minutes)),
            deadlist_retention: Duration::hours(i64::from(cfg.deadlist_retention_hours)),
            unseen_lead_policy: cfg.unseen_lead_policy,
        }
    }
}

/// What happened to one match in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Already deadlisted; nothing read or written
    SkippedDeadlisted,
    /// Notified but missing from the deadlist; deadlist repaired
    HealedDeadlist,
    /// Snapshot carried nothing that changes the stored state
    Unchanged,
    StartedScoreless,
    ScorelessRefreshed,
    /// Leading match reported back at 0-0
    ScoreRegressionIgnored,
    LeadDetected {
        side: LeadingSide,
        /// Lead seen without a preceding 0-0
        unseen: bool,
    },
    /// Lead seen without a preceding 0-0 under the skip policy
    UnseenLeadSkipped,
    Notified,
    Deadlisted(DeadlistReason),
    Rejected(SnapshotError),
}

impl Transition {
    pub fn kind(&self) -> &'static str {
        match self {
            Transition::SkippedDeadlisted => "skipped_deadlisted",
            Transition::HealedDeadlist => "healed_deadlist",
            Transition::Unchanged => "unchanged",
            Transition::StartedScoreless => "started_scoreless",
            Transition::ScorelessRefreshed => "scoreless_refreshed",
            Transition::ScoreRegressionIgnored => "score_regression_ignored",
            Transition::LeadDetected { .. } => "lead_detected",
            Transition::UnseenLeadSkipped => "unseen_lead_skipped",
            Transition::Notified => "notified",
            Transition::Deadlisted(_) => "deadlisted",
            Transition::Rejected(_) => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOutcome {
    pub key: MatchKey,
    pub transition: Transition,
}

/// Entries removed after the per-snapshot pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneSummary {
    /// Leading entries expired for being absent too long (now deadlisted)
    pub stale_leads: Vec<MatchKey>,
    /// Scoreless entries dropped for being absent too long
    pub dropped_scoreless: Vec<MatchKey>,
    /// Non-notified deadlist entries past retention
    pub deadlist_pruned: Vec<MatchKey>,
}

/// Result of one reconciliation. Nothing here is committed yet.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub state: TrackingState,
    /// To dispatch only after `state` is durably saved
    pub notifications: Vec<(MatchKey, NotificationRecord)>,
    pub outcomes: Vec<SnapshotOutcome>,
    pub pruned: PruneSummary,
}

impl Reconciliation {
    pub fn rejected(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.transition, Transition::Rejected(_)))
            .count()
    }
}

pub struct ReconciliationEngine {
    config: EngineConfig,
    metrics: Option<Arc<Metrics>>,
}

impl ReconciliationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    /// Report transitions to `metrics` as a side channel
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one cycle over `snapshots` against `previous`.
    pub fn reconcile(
        &self,
        previous: &TrackingState,
        snapshots: &[MatchSnapshot],
        now: DateTime<Utc>,
    ) -> Reconciliation {
        let mut state = previous.clone();
        let mut notifications = Vec::new();
        let mut outcomes = Vec::with_capacity(snapshots.len());
        let mut present = HashSet::with_capacity(snapshots.len());

        for snapshot in snapshots {
            let key = snapshot.key();
            present.insert(key.clone());

            let transition = match validate(snapshot) {
                Ok(()) => self.apply(&mut state, &key, snapshot, now, &mut notifications),
                Err(err) => {
                    warn!(key = %key, error = %err, "Rejected snapshot");
                    Transition::Rejected(err)
                }
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_transition(&transition);
            }
            outcomes.push(SnapshotOutcome { key, transition });
        }

        let pruned = self.prune(&mut state, &present, now);

        Reconciliation {
            state,
            notifications,
            outcomes,
            pruned,
        }
    }

    fn apply(
        &self,
        state: &mut TrackingState,
        key: &MatchKey,
        snapshot: &MatchSnapshot,
        now: DateTime<Utc>,
        notifications: &mut Vec<(MatchKey, NotificationRecord)>,
    ) -> Transition {
        if state.is_deadlisted(key) {
            return Transition::SkippedDeadlisted;
        }

        if state.is_notified(key) {
            state.tracked.remove(key);
            deadlist(state, key, DeadlistReason::Notified, now);
            warn!(key = %key, "Notified match was missing from deadlist, repaired");
            return Transition::HealedDeadlist;
        }

        let transition = match snapshot.score() {
            Score::Scoreless => self.on_scoreless(state, key, snapshot, now),
            Score::HomeLeads => self.on_lead(state, key, snapshot, LeadingSide::Home, now),
            Score::AwayLeads => self.on_lead(state, key, snapshot, LeadingSide::Away, now),
            Score::Level => self.on_level(state, key, snapshot, now, notifications),
            Score::Other { .. } => {
                state.tracked.remove(key);
                deadlist(state, key, DeadlistReason::DisqualifyingScore, now);
                debug!(key = %key, score = %snapshot.score(), "Disqualifying score");
                Transition::Deadlisted(DeadlistReason::DisqualifyingScore)
            }
        };

        // A finished match can never move again
        if snapshot.status == MatchStatus::Finished && !state.is_deadlisted(key) {
            state.tracked.remove(key);
            deadlist(state, key, DeadlistReason::Finished, now);
            debug!(key = %key, "Match finished");
            return Transition::Deadlisted(DeadlistReason::Finished);
        }

        transition
    }

    fn on_scoreless(
        &self,
        state: &mut TrackingState,
        key: &MatchKey,
        snapshot: &MatchSnapshot,
        now: DateTime<Utc>,
    ) -> Transition {
        match state.tracked.get_mut(key) {
            None => {
                state.tracked.insert(
                    key.clone(),
                    TrackedMatch::Scoreless {
                        last_seen_minute: snapshot.minute,
                        last_seen_period: snapshot.period,
                        last_seen_at: now,
                    },
                );
                debug!(key = %key, minute = ?snapshot.minute, "Tracking scoreless match");
                Transition::StartedScoreless
            }
            Some(TrackedMatch::Scoreless {
                last_seen_minute,
                last_seen_period,
                last_seen_at,
            }) => {
                let changed = *last_seen_minute != snapshot.minute
                    || *last_seen_period != snapshot.period
                    || *last_seen_at != now;
                *last_seen_minute = snapshot.minute;
                *last_seen_period = snapshot.period;
                *last_seen_at = now;
                if changed {
                    Transition::ScorelessRefreshed
                } else {
                    Transition::Unchanged
                }
            }
            Some(TrackedMatch::Leading { .. }) => {
                warn!(key = %key, "Leading match reported at 0-0, ignoring");
                Transition::ScoreRegressionIgnored
            }
        }
    }

    fn on_lead(
        &self,
        state: &mut TrackingState,
        key: &MatchKey,
        snapshot: &MatchSnapshot,
        side: LeadingSide,
        now: DateTime<Utc>,
    ) -> Transition {
        match state.tracked.get(key).cloned() {
            Some(TrackedMatch::Scoreless { .. }) => {
                let first_goal_minute =
                    corrected_goal_minute(snapshot.minute, self.config.goal_minute_correction);
                state.tracked.insert(
                    key.clone(),
                    TrackedMatch::Leading {
                        leading_side: side,
                        first_goal_minute,
                        first_goal_period: snapshot.period,
                        first_goal_reliability: snapshot.reliability,
                        first_goal_time: now,
                    },
                );
                info!(
                    key = %key,
                    side = %side,
                    first_goal_minute = ?first_goal_minute,
                    "First goal detected"
                );
                Transition::LeadDetected {
                    side,
                    unseen: false,
                }
            }
            None => match self.config.unseen_lead_policy {
                UnseenLeadPolicy::Track => {
                    state.tracked.insert(
                        key.clone(),
                        TrackedMatch::Leading {
                            leading_side: side,
                            first_goal_minute: snapshot.minute,
                            first_goal_period: snapshot.period,
                            first_goal_reliability: Reliability::LOWEST,
                            first_goal_time: now,
                        },
                    );
                    info!(key = %key, side = %side, "Lead seen without 0-0, tracking at lowest reliability");
                    Transition::LeadDetected { side, unseen: true }
                }
                UnseenLeadPolicy::Skip => Transition::UnseenLeadSkipped,
            },
            Some(TrackedMatch::Leading {
                leading_side,
                first_goal_minute,
                first_goal_period,
                ..
            }) => {
                if leading_side != side {
                    state.tracked.remove(key);
                    deadlist(state, key, DeadlistReason::LeadSwitched, now);
                    debug!(key = %key, "Lead switched sides");
                    return Transition::Deadlisted(DeadlistReason::LeadSwitched);
                }

                // Close the window early once no equaliser could qualify
                if first_goal_period.is_known()
                    && snapshot.period.is_known()
                    && first_goal_period != snapshot.period
                {
                    state.tracked.remove(key);
                    deadlist(state, key, DeadlistReason::PeriodChanged, now);
                    return Transition::Deadlisted(DeadlistReason::PeriodChanged);
                }
                if let (Some(first), Some(current)) = (first_goal_minute, snapshot.minute) {
                    if i64::from(current) - i64::from(first) > self.config.window_minutes {
                        state.tracked.remove(key);
                        deadlist(state, key, DeadlistReason::WindowExpired, now);
                        return Transition::Deadlisted(DeadlistReason::WindowExpired);
                    }
                }

                Transition::Unchanged
            }
        }
    }

    fn on_level(
        &self,
        state: &mut TrackingState,
        key: &MatchKey,
        snapshot: &MatchSnapshot,
        now: DateTime<Utc>,
        notifications: &mut Vec<(MatchKey, NotificationRecord)>,
    ) -> Transition {
        let Some(TrackedMatch::Leading {
            leading_side,
            first_goal_minute,
            first_goal_period,
            first_goal_reliability,
            first_goal_time,
        }) = state.tracked.remove(key)
        else {
            // No observed lead, so no window start
            deadlist(state, key, DeadlistReason::LevelWithoutLead, now);
            debug!(key = %key, "1-1 without an observed lead");
            return Transition::Deadlisted(DeadlistReason::LevelWithoutLead);
        };

        let period = check_same_period(
            first_goal_period,
            first_goal_minute,
            snapshot.period,
            snapshot.minute,
        );
        if !period.same_period {
            deadlist(state, key, DeadlistReason::PeriodChanged, now);
            info!(key = %key, "Equaliser in a different half");
            return Transition::Deadlisted(DeadlistReason::PeriodChanged);
        }

        let elapsed = elapsed_since_goal(first_goal_minute, first_goal_time, snapshot.minute, now);
        if !(0..=self.config.window_minutes).contains(&elapsed.minutes) {
            deadlist(state, key, DeadlistReason::WindowExpired, now);
            info!(key = %key, elapsed = elapsed.minutes, "Equaliser outside window");
            return Transition::Deadlisted(DeadlistReason::WindowExpired);
        }

        let reliability = first_goal_reliability
            .min(snapshot.reliability)
            .capped(elapsed.reliability_cap())
            .capped(period.reliability_cap());

        let record = NotificationRecord {
            home: snapshot.home.clone(),
            away: snapshot.away.clone(),
            league: snapshot.league.clone(),
            country: snapshot.country.clone(),
            first_score: leading_side.first_score().to_string(),
            first_minute: first_goal_minute,
            second_minute: snapshot.minute,
            reliability,
            notified_at: Some(now),
        };

        info!(
            key = %key,
            first_score = %record.first_score,
            first_minute = ?record.first_minute,
            second_minute = ?record.second_minute,
            reliability = %reliability,
            "Pattern completed"
        );

        state.notified.insert(key.clone(), record.clone());
        deadlist(state, key, DeadlistReason::Notified, now);
        notifications.push((key.clone(), record));
        Transition::Notified
    }

    fn prune(
        &self,
        state: &mut TrackingState,
        present: &HashSet<MatchKey>,
        now: DateTime<Utc>,
    ) -> PruneSummary {
        let mut summary = PruneSummary::default();

        for (key, tracked) in &state.tracked {
            if present.contains(key) {
                continue;
            }
            match tracked {
                TrackedMatch::Leading {
                    first_goal_time, ..
                } if now - *first_goal_time > self.config.stale_grace => {
                    summary.stale_leads.push(key.clone());
                }
                TrackedMatch::Scoreless { last_seen_at, .. }
                    if now - *last_seen_at > self.config.scoreless_grace =>
                {
                    summary.dropped_scoreless.push(key.clone());
                }
                _ => {}
            }
        }

        for key in &summary.stale_leads {
            state.tracked.remove(key);
            deadlist(state, key, DeadlistReason::StaleLead, now);
            info!(key = %key, "Leading match vanished from feed, expired");
        }
        for key in &summary.dropped_scoreless {
            state.tracked.remove(key);
            debug!(key = %key, "Scoreless match vanished from feed, dropped");
        }

        summary.deadlist_pruned = state
            .deadlist
            .iter()
            .filter(|(key, entry)| {
                !present.contains(*key)
                    && !state.notified.contains_key(*key)
                    && now - entry.added_at > self.config.deadlist_retention
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &summary.deadlist_pruned {
            state.deadlist.remove(key);
        }

        if !summary.deadlist_pruned.is_empty() {
            debug!(count = summary.deadlist_pruned.len(), "Pruned deadlist");
        }

        summary
    }
}

fn deadlist(state: &mut TrackingState, key: &MatchKey, reason: DeadlistReason, now: DateTime<Utc>) {
    state
        .deadlist
        .entry(key.clone())
        .or_insert_with(|| DeadlistEntry::new(reason, now));
}

fn validate(snapshot: &MatchSnapshot) -> Result<(), SnapshotError> {
    if snapshot.home.trim().is_empty() {
        return Err(SnapshotError::EmptyIdentity("home"));
    }
    if snapshot.away.trim().is_empty() {
        return Err(SnapshotError::EmptyIdentity("away"));
    }
    if snapshot.league.trim().is_empty() {
        return Err(SnapshotError::EmptyIdentity("league"));
    }
    if snapshot.reliability.value() > Reliability::MAX {
        return Err(SnapshotError::ReliabilityOutOfRange(
            snapshot.reliability.value(),
        ));
    }
    Ok(())
}
