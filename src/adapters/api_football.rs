//! API-Football live fixtures client.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::adapters::provider::{GoalEvent, LiveMatchProvider, RawMatchRecord};
use crate::config::ProviderConfig;
use crate::error::{FetchError, GoalwatchError, Result};
use crate::services::metrics::{ApiCallEntry, Metrics};

const API_KEY_HEADER: &str = "x-apisports-key";
const LIVE_FIXTURES_PATH: &str = "/fixtures";
const FIXTURE_EVENTS_PATH: &str = "/fixtures/events";

pub struct ApiFootballProvider {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    metrics: Option<Arc<Metrics>>,
}

impl ApiFootballProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("goalwatch/", env!("CARGO_PKG_VERSION")))
            // Per attempt; the retry wrapper and the driver bound the whole fetch
            .timeout(Duration::from_secs(config.attempt_timeout_secs))
            .build()
            .map_err(|e| {
                GoalwatchError::Internal(format!("failed to build provider HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            metrics: None,
        })
    }

    /// Record every request in the API call log
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, LIVE_FIXTURES_PATH)
    }

    pub fn events_endpoint(&self) -> String {
        format!("{}{}", self.base_url, FIXTURE_EVENTS_PATH)
    }

    async fn request(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<(u16, Value), FetchError> {
        let key = self.api_key.as_deref().ok_or_else(|| {
            FetchError::NotConfigured("provider.api_key (or API_KEY) is required".to_string())
        })?;

        let resp = self
            .http
            .get(endpoint)
            .header(API_KEY_HEADER, key)
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = resp.json().await?;
        Ok((status.as_u16(), body))
    }

    async fn log_call<T>(
        &self,
        endpoint: String,
        started: Instant,
        outcome: &std::result::Result<(u16, Vec<T>), FetchError>,
    ) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let (status, matches, error) = match outcome {
            Ok((status, records)) => (Some(*status), Some(records.len()), None),
            Err(FetchError::Status { status, .. }) => (Some(*status), None, None),
            Err(e) => (None, None, Some(e.to_string())),
        };
        metrics
            .record_api_call(ApiCallEntry {
                at: Utc::now(),
                endpoint,
                status,
                matches,
                latency_ms: started.elapsed().as_millis() as u64,
                error,
            })
            .await;
    }
}

/// Pull the fixture list out of a response body.
///
/// API-Football answers quota and auth problems with HTTP 200 and a non-empty
/// `errors` field. Elements that do not fit [`RawMatchRecord`] are kept as
/// empty records so the normalizer rejects and counts them.
pub fn parse_live_response(body: Value) -> std::result::Result<Vec<RawMatchRecord>, FetchError> {
    check_errors(&body)?;
    let items = response_items(&body)?;

    Ok(items
        .iter()
        .map(|item| {
            serde_json::from_value(item.clone()).unwrap_or_else(|e| {
                debug!(error = %e, "Undecodable fixture element");
                RawMatchRecord::default()
            })
        })
        .collect())
}

fn check_errors(body: &Value) -> std::result::Result<(), FetchError> {
    let errors_present = match body.get("errors") {
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(list)) => !list.is_empty(),
        _ => false,
    };
    if errors_present {
        let detail = body.get("errors").map(Value::to_string).unwrap_or_default();
        return Err(FetchError::Rejected(detail));
    }
    Ok(())
}

fn response_items(body: &Value) -> std::result::Result<&Vec<Value>, FetchError> {
    match body.get("response") {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(FetchError::Decode(format!(
            "'response' is not a list: {}",
            other
        ))),
        None => Err(FetchError::Decode("missing 'response' field".to_string())),
    }
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RawEvent {
    time: RawEventTime,
    team: RawEventTeam,
    #[serde(rename = "type")]
    kind: Option<String>,
    detail: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RawEventTime {
    elapsed: Option<i64>,
    extra: Option<i64>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RawEventTeam {
    name: Option<String>,
}

/// Goals out of a `/fixtures/events` body, in timeline order.
///
/// Missed penalties and elements without a minute or team are dropped.
pub fn parse_events_response(body: Value) -> std::result::Result<Vec<GoalEvent>, FetchError> {
    check_errors(&body)?;
    let items = response_items(&body)?;

    Ok(items
        .iter()
        .filter_map(|item| serde_json::from_value::<RawEvent>(item.clone()).ok())
        .filter(|e| e.kind.as_deref().is_some_and(|k| k.eq_ignore_ascii_case("goal")))
        .filter(|e| e.detail.as_deref() != Some("Missed Penalty"))
        .filter_map(|e| {
            Some(GoalEvent {
                minute: u32::try_from(e.time.elapsed?).ok()?,
                extra: e.time.extra.and_then(|x| u32::try_from(x).ok()).filter(|x| *x > 0),
                team: e.team.name.filter(|n| !n.trim().is_empty())?,
            })
        })
        .collect())
}

#[async_trait]
impl LiveMatchProvider for ApiFootballProvider {
    #[instrument(skip(self))]
    async fn fetch_live_matches(&self) -> std::result::Result<Vec<RawMatchRecord>, FetchError> {
        let endpoint = self.endpoint();
        let started = Instant::now();

        let outcome = match self.request(&endpoint, &[("live", "all")]).await {
            Ok((status, body)) => parse_live_response(body).map(|records| (status, records)),
            Err(e) => Err(e),
        };
        self.log_call(format!("{}?live=all", endpoint), started, &outcome)
            .await;

        match outcome {
            Ok((_, records)) => {
                debug!(count = records.len(), "Fetched live fixtures");
                Ok(records)
            }
            Err(e) => {
                warn!(error = %e, "Live fixtures request failed");
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    async fn fixture_events(
        &self,
        fixture_id: &str,
    ) -> std::result::Result<Vec<GoalEvent>, FetchError> {
        let endpoint = self.events_endpoint();
        let started = Instant::now();

        let outcome = match self.request(&endpoint, &[("fixture", fixture_id)]).await {
            Ok((status, body)) => parse_events_response(body).map(|goals| (status, goals)),
            Err(e) => Err(e),
        };
        self.log_call(format!("{}?fixture={}", endpoint, fixture_id), started, &outcome)
            .await;

        outcome.map(|(_, goals)| goals).map_err(|e| {
            warn!(fixture_id, error = %e, "Fixture events request failed");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_live_response() {
        let body = json!({
            "get": "fixtures",
            "errors": [],
            "results": 2,
            "response": [
                {
                    "fixture": {"id": 1, "status": {"short": "1H", "elapsed": 12}},
                    "league": {"name": "Serie A", "country": "Italy"},
                    "teams": {"home": {"name": "Inter"}, "away": {"name": "Milan"}},
                    "goals": {"home": 0, "away": 0}
                },
                {
                    "fixture": {"id": 2, "status": {"short": "2H", "elapsed": "sixty"}}
                }
            ]
        });
        let records = parse_live_response(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].teams.home.name.as_deref(), Some("Inter"));
        assert_eq!(records[1], RawMatchRecord::default());
    }

    #[test]
    fn test_quota_error_is_rejected() {
        let body = json!({
            "errors": {"requests": "You have reached the request limit for the day"},
            "response": []
        });
        match parse_live_response(body) {
            Err(FetchError::Rejected(detail)) => assert!(detail.contains("request limit")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_response_field() {
        assert!(matches!(
            parse_live_response(json!({"errors": []})),
            Err(FetchError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_events_keeps_scored_goals() {
        let body = json!({
            "errors": [],
            "response": [
                {"time": {"elapsed": 12, "extra": null}, "team": {"id": 1, "name": "Inter"},
                 "type": "Goal", "detail": "Normal Goal"},
                {"time": {"elapsed": 15, "extra": null}, "team": {"id": 2, "name": "Milan"},
                 "type": "Card", "detail": "Yellow Card"},
                {"time": {"elapsed": 19, "extra": null}, "team": {"id": 2, "name": "Milan"},
                 "type": "Goal", "detail": "Missed Penalty"},
                {"time": {"elapsed": 45, "extra": 2}, "team": {"id": 2, "name": "Milan"},
                 "type": "Goal", "detail": "Penalty"},
                {"time": {"elapsed": null}, "team": {"name": "Milan"}, "type": "Goal"}
            ]
        });
        let goals = parse_events_response(body).unwrap();
        assert_eq!(
            goals,
            vec![
                GoalEvent { minute: 12, extra: None, team: "Inter".into() },
                GoalEvent { minute: 45, extra: Some(2), team: "Milan".into() },
            ]
        );
    }

    #[test]
    fn test_events_quota_error_is_rejected() {
        let body = json!({"errors": {"requests": "limit"}, "response": []});
        assert!(matches!(parse_events_response(body), Err(FetchError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_events_call_is_logged_against_quota() {
        let config = crate::config::AppConfig::default_config("/tmp/unused").provider;
        let metrics = Arc::new(Metrics::new());
        let provider = ApiFootballProvider::new(&config)
            .unwrap()
            .with_metrics(metrics.clone());

        assert!(provider.fixture_events("1035").await.is_err());
        let calls = metrics.recent_api_calls(5).await;
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].endpoint,
            "https://v3.football.api-sports.io/fixtures/events?fixture=1035"
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let mut config = crate::config::AppConfig::default_config("/tmp/unused").provider;
        config.api_key = Some("  ".into());
        let metrics = Arc::new(Metrics::new());
        let provider = ApiFootballProvider::new(&config)
            .unwrap()
            .with_metrics(metrics.clone());

        assert!(matches!(
            provider.fetch_live_matches().await,
            Err(FetchError::NotConfigured(_))
        ));
        let calls = metrics.recent_api_calls(5).await;
        assert_eq!(calls.len(), 1);
        assert!(calls[0].error.is_some());
        assert_eq!(
            calls[0].endpoint,
            "https://v3.football.api-sports.io/fixtures?live=all"
        );
    }
}
