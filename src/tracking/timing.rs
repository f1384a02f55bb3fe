//! Match-time arithmetic for the equaliser window.

use chrono::{DateTime, Utc};

use crate::domain::{Period, Reliability};

/// Last regulation minute of the first half. Stoppage in the first half is
/// reported as 45 with extra time on top.
pub const HALF_TIME_MINUTE: u32 = 45;

/// Where an elapsed-time figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElapsedSource {
    /// Difference of two reported match minutes
    MatchClock,
    /// Wall-clock time since the lead was first observed
    WallClock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    /// Match minutes between first goal and now. Negative means the feed went
    /// backwards.
    pub minutes: i64,
    pub source: ElapsedSource,
}

impl Elapsed {
    pub fn reliability_cap(&self) -> Reliability {
        match self.source {
            ElapsedSource::MatchClock => Reliability::EXACT,
            ElapsedSource::WallClock => Reliability::WALL_CLOCK,
        }
    }
}

/// Minutes from the first goal to the current observation.
///
/// Uses match minutes when both are known, the wall clock otherwise.
pub fn elapsed_since_goal(
    first_goal_minute: Option<u32>,
    first_goal_time: DateTime<Utc>,
    current_minute: Option<u32>,
    now: DateTime<Utc>,
) -> Elapsed {
    match (first_goal_minute, current_minute) {
        (Some(first), Some(current)) => Elapsed {
            minutes: i64::from(current) - i64::from(first),
            source: ElapsedSource::MatchClock,
        },
        _ => Elapsed {
            minutes: (now - first_goal_time).num_minutes(),
            source: ElapsedSource::WallClock,
        },
    }
}

/// How the same-half check was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodBasis {
    /// Both halves reported by the provider
    Reported,
    /// Inferred from the minutes on either side of half time
    InferredFromMinutes,
    /// Nothing to go on; assumed unchanged
    Assumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodCheck {
    pub same_period: bool,
    pub basis: PeriodBasis,
}

impl PeriodCheck {
    pub fn reliability_cap(&self) -> Reliability {
        match self.basis {
            PeriodBasis::Reported => Reliability::EXACT,
            PeriodBasis::InferredFromMinutes => Reliability::NO_PERIOD,
            PeriodBasis::Assumed => Reliability::WALL_CLOCK,
        }
    }
}

fn half_from_minute(minute: u32) -> Period {
    if minute <= HALF_TIME_MINUTE {
        Period::FirstHalf
    } else {
        Period::SecondHalf
    }
}

/// Whether the first goal and the current observation fall in the same half.
pub fn check_same_period(
    first_period: Period,
    first_minute: Option<u32>,
    current_period: Period,
    current_minute: Option<u32>,
) -> PeriodCheck {
    if first_period.is_known() && current_period.is_known() {
        return PeriodCheck {
            same_period: first_period == current_period,
            basis: PeriodBasis::Reported,
        };
    }

    match (first_minute, current_minute) {
        (Some(first), Some(current)) => PeriodCheck {
            same_period: half_from_minute(first) == half_from_minute(current),
            basis: PeriodBasis::InferredFromMinutes,
        },
        _ => PeriodCheck {
            same_period: true,
            basis: PeriodBasis::Assumed,
        },
    }
}

/// Estimated minute of a goal first seen at `observed_minute`. The goal
/// happened some time before the poll that saw it.
pub fn corrected_goal_minute(observed_minute: Option<u32>, correction: u32) -> Option<u32> {
    observed_minute.map(|m| m.saturating_sub(correction))
}
