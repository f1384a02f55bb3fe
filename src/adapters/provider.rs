//! Live-event provider boundary.
//!
//! `RawMatchRecord` mirrors one element of the API-Football
//! `GET /fixtures?live=all` response. Every field is optional so that a
//! single odd record decodes and is then rejected by the normalizer, instead
//! of failing the whole list.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawMatchRecord {
    pub fixture: RawFixture,
    pub league: RawLeague,
    pub teams: RawTeams,
    pub goals: RawGoals,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawFixture {
    pub id: Option<i64>,
    pub status: RawStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawStatus {
    /// Short status code, e.g. `1H`, `HT`, `2H`, `FT`
    pub short: Option<String>,
    /// Elapsed match minutes
    pub elapsed: Option<i64>,
    /// Stoppage minutes on top of `elapsed`
    pub extra: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawLeague {
    pub name: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawTeams {
    pub home: RawTeam,
    pub away: RawTeam,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawTeam {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawGoals {
    pub home: Option<i64>,
    pub away: Option<i64>,
}

impl RawMatchRecord {
    /// Convenience constructor for an in-play record.
    pub fn live(
        home: &str,
        away: &str,
        league: &str,
        goals: (i64, i64),
        short: &str,
        elapsed: Option<i64>,
    ) -> Self {
        Self {
            fixture: RawFixture {
                id: None,
                status: RawStatus {
                    short: Some(short.to_string()),
                    elapsed,
                    extra: None,
                },
            },
            league: RawLeague {
                name: Some(league.to_string()),
                country: None,
            },
            teams: RawTeams {
                home: RawTeam {
                    name: Some(home.to_string()),
                },
                away: RawTeam {
                    name: Some(away.to_string()),
                },
            },
            goals: RawGoals {
                home: Some(goals.0),
                away: Some(goals.1),
            },
        }
    }
}

/// One goal from a fixture's event timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalEvent {
    /// Match minute, stoppage excluded
    pub minute: u32,
    /// Stoppage minutes on top of `minute`
    pub extra: Option<u32>,
    /// Team credited with the goal
    pub team: String,
}

/// Source of the current set of in-play matches.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveMatchProvider: Send + Sync {
    /// One request against the provider. Individual records may still be
    /// malformed; only the request as a whole fails here.
    async fn fetch_live_matches(&self) -> Result<Vec<RawMatchRecord>, FetchError>;

    /// Goals of one fixture in the order they were scored, keyed by the
    /// provider's fixture id. One request; providers without a timeline
    /// return nothing.
    async fn fixture_events(&self, _fixture_id: &str) -> Result<Vec<GoalEvent>, FetchError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_api_football_element() {
        let json = r#"{
            "fixture": {"id": 1035, "status": {"short": "2H", "elapsed": 63, "extra": null}},
            "league": {"name": "Premier League", "country": "England"},
            "teams": {"home": {"id": 1, "name": "Arsenal"}, "away": {"id": 2, "name": "Chelsea"}},
            "goals": {"home": 1, "away": 0},
            "score": {"halftime": {"home": 1, "away": 0}}
        }"#;
        let record: RawMatchRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.fixture.id, Some(1035));
        assert_eq!(record.fixture.status.short.as_deref(), Some("2H"));
        assert_eq!(record.fixture.status.elapsed, Some(63));
        assert_eq!(record.teams.away.name.as_deref(), Some("Chelsea"));
        assert_eq!(record.goals.home, Some(1));
    }

    #[test]
    fn test_decode_sparse_element() {
        let record: RawMatchRecord = serde_json::from_str(r#"{"goals": {"home": null}}"#).unwrap();
        assert_eq!(record.teams.home.name, None);
        assert_eq!(record.goals.home, None);
    }
}
