//! Raw provider record -> canonical [`MatchSnapshot`].

use crate::adapters::provider::RawMatchRecord;
use crate::domain::{MatchSnapshot, MatchStatus, Period, Reliability};
use crate::error::NormalizeError;

/// Map a provider status code to the half being played.
pub fn period_from_status(short: Option<&str>) -> Period {
    match short.map(str::trim) {
        Some("1H") | Some("HT") => Period::FirstHalf,
        Some("2H") => Period::SecondHalf,
        _ => Period::Unknown,
    }
}

/// Map a provider status code to the coarse match status.
pub fn status_from_code(short: Option<&str>) -> MatchStatus {
    match short.map(str::trim) {
        Some("NS") | Some("TBD") => MatchStatus::NotStarted,
        Some("FT") | Some("AET") | Some("PEN") | Some("AWD") | Some("WO") | Some("CANC")
        | Some("ABD") => MatchStatus::Finished,
        _ => MatchStatus::InProgress,
    }
}

/// Reliability of the reported minute.
///
/// | minute | stoppage | period  | reliability |
/// |--------|----------|---------|-------------|
/// | none   | -        | -       | 0           |
/// | some   | yes      | -       | 4           |
/// | some   | no       | unknown | 3           |
/// | some   | no       | known   | 5           |
pub fn reliability_for(minute: Option<u32>, in_stoppage: bool, period: Period) -> Reliability {
    match (minute, in_stoppage, period.is_known()) {
        (None, _, _) => Reliability::LOWEST,
        (Some(_), true, _) => Reliability::STOPPAGE,
        (Some(_), false, false) => Reliability::NO_PERIOD,
        (Some(_), false, true) => Reliability::EXACT,
    }
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, NormalizeError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(NormalizeError::MissingField(field)),
    }
}

fn goals(
    home: Option<i64>,
    away: Option<i64>,
    status: MatchStatus,
) -> Result<(u32, u32), NormalizeError> {
    let invalid = || NormalizeError::InvalidScore { home, away };
    match (home, away) {
        (Some(h), Some(a)) => {
            let h = u32::try_from(h).map_err(|_| invalid())?;
            let a = u32::try_from(a).map_err(|_| invalid())?;
            Ok((h, a))
        }
        // Not-started fixtures report null goals
        (None, None) if status == MatchStatus::NotStarted => Ok((0, 0)),
        _ => Err(invalid()),
    }
}

/// Build a snapshot from one raw record.
///
/// Fails only for records that cannot be tracked at all: missing team or
/// league names, or an unusable score. A missing or negative minute is not an
/// error; it lowers the reliability instead.
pub fn normalize(raw: &RawMatchRecord) -> Result<MatchSnapshot, NormalizeError> {
    let home = required(&raw.teams.home.name, "teams.home.name")?;
    let away = required(&raw.teams.away.name, "teams.away.name")?;
    let league = required(&raw.league.name, "league.name")?;
    let country = raw
        .league
        .country
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let short = raw.fixture.status.short.as_deref();
    let status = status_from_code(short);
    let period = period_from_status(short);
    let (score_home, score_away) = goals(raw.goals.home, raw.goals.away, status)?;

    let minute = raw
        .fixture
        .status
        .elapsed
        .and_then(|m| u32::try_from(m).ok());
    let in_stoppage = raw.fixture.status.extra.is_some_and(|extra| extra > 0);
    let reliability = reliability_for(minute, in_stoppage, period);

    Ok(MatchSnapshot {
        home,
        away,
        league,
        country,
        score_home,
        score_away,
        minute,
        period,
        reliability,
        external_id: raw.fixture.id.map(|id| id.to_string()),
        status,
    })
}

/// Normalize a whole fetch, splitting good snapshots from rejects.
pub fn normalize_all(
    records: &[RawMatchRecord],
) -> (Vec<MatchSnapshot>, Vec<(usize, NormalizeError)>) {
    let mut snapshots = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match normalize(record) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(err) => rejected.push((index, err)),
        }
    }
    (snapshots, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_mapping() {
        assert_eq!(period_from_status(Some("1H")), Period::FirstHalf);
        assert_eq!(period_from_status(Some("HT")), Period::FirstHalf);
        assert_eq!(period_from_status(Some("2H")), Period::SecondHalf);
        assert_eq!(period_from_status(Some("ET")), Period::Unknown);
        assert_eq!(period_from_status(None), Period::Unknown);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_from_code(Some("NS")), MatchStatus::NotStarted);
        assert_eq!(status_from_code(Some("2H")), MatchStatus::InProgress);
        assert_eq!(status_from_code(Some("BT")), MatchStatus::InProgress);
        assert_eq!(status_from_code(Some("FT")), MatchStatus::Finished);
        assert_eq!(status_from_code(Some("PEN")), MatchStatus::Finished);
    }

    #[test]
    fn test_normalize_exact_record() {
        let mut raw = RawMatchRecord::live(" Team A ", "Team B", "L1", (1, 0), "1H", Some(23));
        raw.league.country = Some("Italy".into());
        raw.fixture.id = Some(77);

        let snapshot = normalize(&raw).unwrap();
        assert_eq!(snapshot.home, "Team A");
        assert_eq!(snapshot.country, "Italy");
        assert_eq!((snapshot.score_home, snapshot.score_away), (1, 0));
        assert_eq!(snapshot.minute, Some(23));
        assert_eq!(snapshot.period, Period::FirstHalf);
        assert_eq!(snapshot.reliability, Reliability::EXACT);
        assert_eq!(snapshot.external_id.as_deref(), Some("77"));
        assert_eq!(snapshot.status, MatchStatus::InProgress);
    }

    #[test]
    fn test_degraded_reliability() {
        let mut raw = RawMatchRecord::live("A", "B", "L", (0, 0), "1H", Some(45));
        raw.fixture.status.extra = Some(3);
        assert_eq!(normalize(&raw).unwrap().reliability, Reliability::STOPPAGE);

        let raw = RawMatchRecord::live("A", "B", "L", (0, 0), "ET", Some(95));
        assert_eq!(normalize(&raw).unwrap().reliability, Reliability::NO_PERIOD);

        let raw = RawMatchRecord::live("A", "B", "L", (0, 0), "2H", None);
        let snapshot = normalize(&raw).unwrap();
        assert_eq!(snapshot.minute, None);
        assert_eq!(snapshot.reliability, Reliability::LOWEST);

        let raw = RawMatchRecord::live("A", "B", "L", (0, 0), "2H", Some(-4));
        assert_eq!(normalize(&raw).unwrap().minute, None);
    }

    #[test]
    fn test_missing_identity_is_rejected() {
        let mut raw = RawMatchRecord::live("A", "B", "L", (0, 0), "1H", Some(3));
        raw.teams.away.name = Some("   ".into());
        assert_eq!(
            normalize(&raw),
            Err(NormalizeError::MissingField("teams.away.name"))
        );

        raw.teams.away.name = Some("B".into());
        raw.league.name = None;
        assert_eq!(normalize(&raw), Err(NormalizeError::MissingField("league.name")));
    }

    #[test]
    fn test_bad_scores() {
        let raw = RawMatchRecord::live("A", "B", "L", (-1, 0), "1H", Some(3));
        assert!(matches!(normalize(&raw), Err(NormalizeError::InvalidScore { .. })));

        let mut raw = RawMatchRecord::live("A", "B", "L", (0, 0), "1H", Some(3));
        raw.goals.away = None;
        assert!(matches!(normalize(&raw), Err(NormalizeError::InvalidScore { .. })));

        let mut raw = RawMatchRecord::live("A", "B", "L", (0, 0), "NS", None);
        raw.goals.home = None;
        raw.goals.away = None;
        let snapshot = normalize(&raw).unwrap();
        assert_eq!((snapshot.score_home, snapshot.score_away), (0, 0));
    }

    #[test]
    fn test_normalize_all_splits_rejects() {
        let good = RawMatchRecord::live("A", "B", "L", (0, 0), "1H", Some(3));
        let bad = RawMatchRecord::default();
        let (snapshots, rejected) = normalize_all(&[good, bad]);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, 1);
    }
}
