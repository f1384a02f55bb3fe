//! Durable tracking state: active matches, notified matches, and the deadlist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::key::MatchKey;
use super::snapshot::{Period, Reliability};

/// Team holding the one-goal lead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadingSide {
    Home,
    Away,
}

impl LeadingSide {
    /// Scoreline of the first goal, as shown in notifications
    pub fn first_score(&self) -> &'static str {
        match self {
            LeadingSide::Home => "1-0",
            LeadingSide::Away => "0-1",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            LeadingSide::Home => LeadingSide::Away,
            LeadingSide::Away => LeadingSide::Home,
        }
    }
}

impl fmt::Display for LeadingSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeadingSide::Home => write!(f, "HOME"),
            LeadingSide::Away => write!(f, "AWAY"),
        }
    }
}

/// A match currently being watched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackedMatch {
    /// Seen at 0-0, waiting for the first goal
    Scoreless {
        last_seen_minute: Option<u32>,
        #[serde(default)]
        last_seen_period: Period,
        /// Wall-clock time of the latest sighting in the feed
        last_seen_at: DateTime<Utc>,
    },
    /// Seen at a one-goal lead, waiting for the equaliser
    Leading {
        leading_side: LeadingSide,
        first_goal_minute: Option<u32>,
        #[serde(default)]
        first_goal_period: Period,
        #[serde(default)]
        first_goal_reliability: Reliability,
        /// Wall-clock fallback timer
        first_goal_time: DateTime<Utc>,
    },
}

impl TrackedMatch {
    pub fn is_leading(&self) -> bool {
        matches!(self, TrackedMatch::Leading { .. })
    }
}

/// Immutable record of a completed pattern.
///
/// Every field defaults so that bare keys from the legacy notified list can be
/// upgraded to empty records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationRecord {
    pub home: String,
    pub away: String,
    pub league: String,
    pub country: String,
    /// `"1-0"` or `"0-1"`
    pub first_score: String,
    pub first_minute: Option<u32>,
    pub second_minute: Option<u32>,
    pub reliability: Reliability,
    pub notified_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    /// Legacy entries carry no match details
    pub fn is_empty(&self) -> bool {
        self.home.is_empty() && self.away.is_empty() && self.notified_at.is_none()
    }
}

/// Why a match can no longer fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlistReason {
    Notified,
    Finished,
    DisqualifyingScore,
    LeadSwitched,
    PeriodChanged,
    WindowExpired,
    LevelWithoutLead,
    StaleLead,
    /// Entry upgraded from a format that did not record a reason
    Unknown,
}

impl DeadlistReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadlistReason::Notified => "notified",
            DeadlistReason::Finished => "finished",
            DeadlistReason::DisqualifyingScore => "disqualifying_score",
            DeadlistReason::LeadSwitched => "lead_switched",
            DeadlistReason::PeriodChanged => "period_changed",
            DeadlistReason::WindowExpired => "window_expired",
            DeadlistReason::LevelWithoutLead => "level_without_lead",
            DeadlistReason::StaleLead => "stale_lead",
            DeadlistReason::Unknown => "unknown",
        }
    }
}

impl Default for DeadlistReason {
    fn default() -> Self {
        DeadlistReason::Unknown
    }
}

impl fmt::Display for DeadlistReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlistEntry {
    #[serde(default)]
    pub reason: DeadlistReason,
    pub added_at: DateTime<Utc>,
}

impl DeadlistEntry {
    pub fn new(reason: DeadlistReason, added_at: DateTime<Utc>) -> Self {
        Self { reason, added_at }
    }
}

/// The three durable collections, committed together once per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackingState {
    pub tracked: BTreeMap<MatchKey, TrackedMatch>,
    pub notified: BTreeMap<MatchKey, NotificationRecord>,
    pub deadlist: BTreeMap<MatchKey, DeadlistEntry>,
}

impl TrackingState {
    pub fn is_deadlisted(&self, key: &MatchKey) -> bool {
        self.deadlist.contains_key(key)
    }

    pub fn is_notified(&self, key: &MatchKey) -> bool {
        self.notified.contains_key(key)
    }

    /// Put every notified key on the deadlist. Returns how many were missing.
    pub fn repair_deadlist(&mut self, now: DateTime<Utc>) -> usize {
        let mut repaired = 0;
        for key in self.notified.keys() {
            if !self.deadlist.contains_key(key) {
                self.deadlist
                    .insert(key.clone(), DeadlistEntry::new(DeadlistReason::Notified, now));
                repaired += 1;
            }
        }
        repaired
    }

    pub fn counts(&self) -> StateCounts {
        StateCounts {
            tracked: self.tracked.len(),
            leading: self.tracked.values().filter(|t| t.is_leading()).count(),
            notified: self.notified.len(),
            deadlisted: self.deadlist.len(),
        }
    }
}

/// Collection sizes for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateCounts {
    pub tracked: usize,
    pub leading: usize,
    pub notified: usize,
    pub deadlisted: usize,
}
