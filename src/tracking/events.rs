//! Cross-check of a completed pattern against the fixture's goal timeline.
//!
//! Polling only brackets a goal between two cycles, so the engine's minutes
//! carry a correction and a reliability below exact. When the provider can
//! list the goals of a fixture, the two goals of a 1-1 settle both minutes.

use chrono::{DateTime, Utc};

use crate::adapters::GoalEvent;
use crate::domain::{DeadlistEntry, DeadlistReason, LeadingSide, MatchKey, Period, Reliability};
use crate::tracking::engine::{Reconciliation, Transition};

/// Verdict of the goal timeline on one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineCheck {
    /// Both goals found, opposite sides, same half, inside the window
    Confirmed {
        first_minute: u32,
        second_minute: u32,
        reliability: Reliability,
    },
    /// The timeline proves the pattern did not happen
    Contradicted(DeadlistReason),
    /// No usable timeline; the polled verdict stands
    Inconclusive,
}

fn half_of(event: &GoalEvent) -> Period {
    match event.minute {
        0..=45 => Period::FirstHalf,
        46..=90 => Period::SecondHalf,
        _ => Period::Unknown,
    }
}

fn side_of(event: &GoalEvent, home: &str, away: &str) -> Option<LeadingSide> {
    let team = event.team.trim();
    if team.eq_ignore_ascii_case(home.trim()) {
        Some(LeadingSide::Home)
    } else if team.eq_ignore_ascii_case(away.trim()) {
        Some(LeadingSide::Away)
    } else {
        None
    }
}

/// Judge a 1-1 whose lead was taken by `leading_side`.
///
/// Anything other than exactly two goals scored by the expected sides in
/// that order is inconclusive.
pub fn check_goal_timeline(
    events: &[GoalEvent],
    home: &str,
    away: &str,
    leading_side: LeadingSide,
    window_minutes: i64,
) -> TimelineCheck {
    let [first, second] = events else {
        return TimelineCheck::Inconclusive;
    };
    if side_of(first, home, away) != Some(leading_side)
        || side_of(second, home, away) != Some(leading_side.opposite())
    {
        return TimelineCheck::Inconclusive;
    }

    let (first_half, second_half) = (half_of(first), half_of(second));
    if !first_half.is_known() || !second_half.is_known() {
        return TimelineCheck::Inconclusive;
    }
    if first_half != second_half {
        return TimelineCheck::Contradicted(DeadlistReason::PeriodChanged);
    }

    let at = |e: &GoalEvent| i64::from(e.minute) + i64::from(e.extra.unwrap_or(0));
    let elapsed = at(second) - at(first);
    if !(0..=window_minutes).contains(&elapsed) {
        return TimelineCheck::Contradicted(DeadlistReason::WindowExpired);
    }

    let reliability = if first.extra.is_some() || second.extra.is_some() {
        Reliability::STOPPAGE
    } else {
        Reliability::EXACT
    };
    TimelineCheck::Confirmed {
        first_minute: first.minute,
        second_minute: second.minute,
        reliability,
    }
}

/// Fold a verdict into a reconciliation that has not been committed yet.
///
/// A confirmed timeline rewrites the minutes in both the pending notification
/// and the notified record. A contradiction withdraws the notification and
/// leaves the match deadlisted for the timeline's reason.
pub fn apply_timeline_check(
    reconciliation: &mut Reconciliation,
    key: &MatchKey,
    check: &TimelineCheck,
    now: DateTime<Utc>,
) {
    match check {
        TimelineCheck::Inconclusive => {}
        TimelineCheck::Confirmed {
            first_minute,
            second_minute,
            reliability,
        } => {
            let pending = reconciliation
                .notifications
                .iter_mut()
                .filter(|(k, _)| k == key)
                .map(|(_, record)| record);
            for record in pending.chain(reconciliation.state.notified.get_mut(key)) {
                record.first_minute = Some(*first_minute);
                record.second_minute = Some(*second_minute);
                record.reliability = *reliability;
            }
        }
        TimelineCheck::Contradicted(reason) => {
            reconciliation.notifications.retain(|(k, _)| k != key);
            reconciliation.state.notified.remove(key);
            reconciliation
                .state
                .deadlist
                .insert(key.clone(), DeadlistEntry::new(*reason, now));
            for outcome in reconciliation.outcomes.iter_mut().filter(|o| &o.key == key) {
                outcome.transition = Transition::Deadlisted(*reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::RawMatchRecord;
    use crate::domain::{derive_key, TrackingState};
    use crate::tracking::engine::SnapshotOutcome;
    use crate::tracking::{normalize_all, EngineConfig, ReconciliationEngine};

    fn goal(minute: u32, team: &str) -> GoalEvent {
        GoalEvent {
            minute,
            extra: None,
            team: team.to_string(),
        }
    }

    fn check(events: &[GoalEvent]) -> TimelineCheck {
        check_goal_timeline(events, "Team A", "Team B", LeadingSide::Home, 10)
    }

    #[test]
    fn test_confirmed_timeline() {
        assert_eq!(
            check(&[goal(18, "Team A"), goal(27, "team b")]),
            TimelineCheck::Confirmed {
                first_minute: 18,
                second_minute: 27,
                reliability: Reliability::EXACT,
            }
        );
    }

    #[test]
    fn test_stoppage_goal_lowers_reliability() {
        let late = GoalEvent {
            extra: Some(3),
            ..goal(45, "Team B")
        };
        match check(&[goal(40, "Team A"), late]) {
            TimelineCheck::Confirmed {
                second_minute,
                reliability,
                ..
            } => {
                assert_eq!(second_minute, 45);
                assert_eq!(reliability, Reliability::STOPPAGE);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_contradicting_timelines() {
        assert_eq!(
            check(&[goal(12, "Team A"), goal(23, "Team B")]),
            TimelineCheck::Contradicted(DeadlistReason::WindowExpired)
        );
        assert_eq!(
            check(&[goal(44, "Team A"), goal(47, "Team B")]),
            TimelineCheck::Contradicted(DeadlistReason::PeriodChanged)
        );
    }

    #[test]
    fn test_unusable_timelines_are_inconclusive() {
        assert_eq!(check(&[]), TimelineCheck::Inconclusive);
        assert_eq!(check(&[goal(20, "Team A")]), TimelineCheck::Inconclusive);
        // Sides disagree with the observed lead
        assert_eq!(
            check(&[goal(20, "Team B"), goal(25, "Team A")]),
            TimelineCheck::Inconclusive
        );
        assert_eq!(
            check(&[goal(20, "Team A"), goal(25, "Someone Else")]),
            TimelineCheck::Inconclusive
        );
        assert_eq!(
            check(&[goal(100, "Team A"), goal(104, "Team B")]),
            TimelineCheck::Inconclusive
        );
    }

    fn completed_pattern() -> Reconciliation {
        let engine = ReconciliationEngine::new(EngineConfig::default());
        let now = Utc::now();
        let cycle = |state: &TrackingState, goals, minute| {
            let record = RawMatchRecord::live("Team A", "Team B", "L1", goals, "1H", Some(minute));
            let (snapshots, _) = normalize_all(&[record]);
            engine.reconcile(state, &snapshots, now)
        };
        let a = cycle(&TrackingState::default(), (0, 0), 10);
        let b = cycle(&a.state, (1, 0), 15);
        let c = cycle(&b.state, (1, 1), 24);
        assert_eq!(c.notifications.len(), 1);
        c
    }

    #[test]
    fn test_apply_confirmed_rewrites_both_records() {
        let mut rec = completed_pattern();
        let key = derive_key("Team A", "Team B", "L1");
        let check = TimelineCheck::Confirmed {
            first_minute: 13,
            second_minute: 22,
            reliability: Reliability::EXACT,
        };
        apply_timeline_check(&mut rec, &key, &check, Utc::now());

        assert_eq!(rec.notifications[0].1.first_minute, Some(13));
        assert_eq!(rec.notifications[0].1.second_minute, Some(22));
        assert_eq!(rec.state.notified[&key], rec.notifications[0].1);
        assert_eq!(rec.state.deadlist[&key].reason, DeadlistReason::Notified);
    }

    #[test]
    fn test_apply_contradiction_withdraws_notification() {
        let mut rec = completed_pattern();
        let key = derive_key("Team A", "Team B", "L1");
        apply_timeline_check(
            &mut rec,
            &key,
            &TimelineCheck::Contradicted(DeadlistReason::WindowExpired),
            Utc::now(),
        );

        assert!(rec.notifications.is_empty());
        assert!(rec.state.notified.is_empty());
        assert_eq!(rec.state.deadlist[&key].reason, DeadlistReason::WindowExpired);
        assert_eq!(
            rec.outcomes,
            vec![SnapshotOutcome {
                key,
                transition: Transition::Deadlisted(DeadlistReason::WindowExpired),
            }]
        );
    }
}
