use serde::{Deserialize, Serialize};
use std::fmt;

use super::key::{derive_key, MatchKey};

/// Half of play a snapshot was taken in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Period {
    FirstHalf,
    SecondHalf,
    Unknown,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::FirstHalf => "FIRST_HALF",
            Period::SecondHalf => "SECOND_HALF",
            Period::Unknown => "UNKNOWN",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Period::Unknown)
    }
}

impl Default for Period {
    fn default() -> Self {
        Period::Unknown
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse match status as reported by the provider. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    NotStarted,
    InProgress,
    Finished,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::NotStarted => "NOT_STARTED",
            MatchStatus::InProgress => "IN_PROGRESS",
            MatchStatus::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Confidence (0-5) in the accuracy of a derived match minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reliability(u8);

impl Reliability {
    /// Minute and period straight from the provider, regular time
    pub const EXACT: Reliability = Reliability(5);
    /// Minute reported inside stoppage time
    pub const STOPPAGE: Reliability = Reliability(4);
    /// Minute known, period not
    pub const NO_PERIOD: Reliability = Reliability(3);
    /// Timing derived from the wall clock only
    pub const WALL_CLOCK: Reliability = Reliability(1);
    /// Nothing known about the timing
    pub const LOWEST: Reliability = Reliability(0);

    pub const MAX: u8 = 5;

    /// `None` when `value` is outside 0..=5.
    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Lower this reliability to at most `cap`.
    pub fn capped(self, cap: Reliability) -> Self {
        self.min(cap)
    }
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability::LOWEST
    }
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0, Self::MAX)
    }
}

/// Canonical view of one live match in one polling cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub home: String,
    pub away: String,
    pub league: String,
    pub country: String,
    pub score_home: u32,
    pub score_away: u32,
    /// Elapsed play time, not wall-clock
    pub minute: Option<u32>,
    pub period: Period,
    pub reliability: Reliability,
    /// Provider id, for deep links only; never used as the join key
    pub external_id: Option<String>,
    pub status: MatchStatus,
}

impl MatchSnapshot {
    pub fn key(&self) -> MatchKey {
        derive_key(&self.home, &self.away, &self.league)
    }

    pub fn score(&self) -> Score {
        Score::new(self.score_home, self.score_away)
    }
}

/// Scoreline classified by what it means for the 0-0 -> 1-0 -> 1-1 pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Scoreless,
    HomeLeads,
    AwayLeads,
    Level,
    /// Any scoreline from which the pattern can no longer start or finish
    Other { home: u32, away: u32 },
}

impl Score {
    pub fn new(home: u32, away: u32) -> Self {
        match (home, away) {
            (0, 0) => Score::Scoreless,
            (1, 0) => Score::HomeLeads,
            (0, 1) => Score::AwayLeads,
            (1, 1) => Score::Level,
            (home, away) => Score::Other { home, away },
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Scoreless => write!(f, "0-0"),
            Score::HomeLeads => write!(f, "1-0"),
            Score::AwayLeads => write!(f, "0-1"),
            Score::Level => write!(f, "1-1"),
            Score::Other { home, away } => write!(f, "{}-{}", home, away),
        }
    }
}
