//! Health check and command HTTP server
//!
//! Liveness/health probes for process supervision, a Prometheus endpoint, and
//! the read-only command interface (status, stats, request log) with the two
//! triggers the driver accepts: force a cycle and change the interval.

use crate::services::driver::{CycleStatus, DriverControl, MAX_INTERVAL};
use crate::services::metrics::{ApiCallEntry, DailyCount, Metrics, NotificationLogEntry};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Days covered by `/stats`
const STATS_DAYS: u32 = 7;
const RECENT_API_CALLS: usize = 20;
const RECENT_NOTIFICATIONS: usize = 10;
/// Missed intervals after which the service reports unhealthy
const STALL_INTERVALS: u32 = 3;

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

/// Overall system health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    pub phase: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub phase: String,
    pub interval_secs: u64,
    pub min_interval_secs: u64,
    /// True until the first cycle has finished
    pub no_cycle_yet: bool,
    pub cycles_started: u64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub next_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub notifications_today: u64,
    pub tracked: usize,
    pub leading: usize,
    pub notified: usize,
    pub deadlisted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub days: Vec<DailyCount>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestsResponse {
    pub api_calls: Vec<ApiCallEntry>,
    pub notifications: Vec<NotificationLogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntervalRequest {
    pub minutes: u64,
}

/// Shared state for the HTTP server; read-only except for the two triggers.
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    pub control: Arc<DriverControl>,
    pub metrics: Arc<Metrics>,
}

impl HealthState {
    pub fn new(control: Arc<DriverControl>, metrics: Arc<Metrics>) -> Self {
        Self {
            started_at: Utc::now(),
            control,
            metrics,
        }
    }

    fn driver_health(&self, status: &CycleStatus, interval: Duration, now: DateTime<Utc>) -> ComponentHealth {
        let stall_limit = chrono::Duration::from_std(interval.min(MAX_INTERVAL) * STALL_INTERVALS)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let reference = status.last_success_at.unwrap_or(self.started_at);

        let (health, message) = if now - reference > stall_limit {
            (
                HealthStatus::Unhealthy,
                Some(format!("no successful cycle for over {} intervals", STALL_INTERVALS)),
            )
        } else if let Some(err) = &status.last_error {
            (HealthStatus::Degraded, Some(err.clone()))
        } else if status.last_finished_at.is_none() {
            (HealthStatus::Healthy, Some("no cycle yet".to_string()))
        } else {
            (HealthStatus::Healthy, None)
        };

        ComponentHealth {
            name: "cycle_driver".to_string(),
            status: health,
            message,
            last_check: status.last_finished_at,
        }
    }

    /// Get overall health status
    pub async fn get_health(&self) -> HealthResponse {
        let now = Utc::now();
        let status = self.control.status().await;
        let interval = self.control.interval().await;

        let driver = self.driver_health(&status, interval, now);
        let provider = match self.metrics.recent_api_calls(1).await.first() {
            Some(call) if call.error.is_some() || call.status.map_or(false, |s| s >= 400) => {
                ComponentHealth {
                    name: "provider".to_string(),
                    status: HealthStatus::Degraded,
                    message: call.error.clone().or_else(|| call.status.map(|s| format!("HTTP {}", s))),
                    last_check: Some(call.at),
                }
            }
            Some(call) => ComponentHealth {
                name: "provider".to_string(),
                status: HealthStatus::Healthy,
                message: None,
                last_check: Some(call.at),
            },
            None => ComponentHealth {
                name: "provider".to_string(),
                status: HealthStatus::Healthy,
                message: Some("no request yet".to_string()),
                last_check: None,
            },
        };

        let overall = if driver.status == HealthStatus::Unhealthy {
            HealthStatus::Unhealthy
        } else if driver.status == HealthStatus::Degraded || provider.status == HealthStatus::Degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthResponse {
            status: overall,
            timestamp: now,
            uptime_seconds: (now - self.started_at).num_seconds().max(0) as u64,
            components: vec![driver, provider],
            phase: self.control.phase().to_string(),
        }
    }

    pub async fn get_status(&self) -> StatusResponse {
        let status = self.control.status().await;
        StatusResponse {
            phase: self.control.phase().to_string(),
            interval_secs: self.control.interval().await.as_secs(),
            min_interval_secs: self.control.min_interval().as_secs(),
            no_cycle_yet: status.last_finished_at.is_none(),
            cycles_started: status.cycles_started,
            last_started_at: status.last_started_at,
            last_finished_at: status.last_finished_at,
            last_success_at: status.last_success_at,
            next_cycle_at: self.control.next_cycle_at().await,
            last_error: status.last_error,
            notifications_today: self.metrics.notifications_on(Utc::now().date_naive()),
            tracked: status.counts.tracked,
            leading: status.counts.leading,
            notified: status.counts.notified,
            deadlisted: status.counts.deadlisted,
        }
    }
}

/// Build the router; exposed separately so it can be exercised without a socket.
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/ping", get(ping_handler))
        .route("/status", get(status_handler))
        .route("/stats", get(stats_handler))
        .route("/requests", get(requests_handler))
        .route("/metrics", get(metrics_handler))
        .route("/force-check", post(force_check_handler))
        .route("/interval", post(interval_handler))
        .with_state(state)
}

/// Health check server
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> crate::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = router(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting health server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::GoalwatchError::Internal(format!("Health server error: {}", e)))?;

        info!("Health server stopped");
        Ok(())
    }

    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn ping_handler() -> &'static str {
    "pong"
}

async fn status_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    Json(state.get_status().await)
}

async fn stats_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let days = state.metrics.daily_stats(Utc::now().date_naive(), STATS_DAYS);
    let total = days.iter().map(|d| d.notifications).sum();
    Json(StatsResponse { days, total })
}

async fn requests_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    Json(RequestsResponse {
        api_calls: state.metrics.recent_api_calls(RECENT_API_CALLS).await,
        notifications: state.metrics.recent_notifications(RECENT_NOTIFICATIONS).await,
    })
}

async fn force_check_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let fresh = state.control.request_force_cycle().await;
    info!(already_pending = !fresh, "Forced cycle requested over HTTP");
    (
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "already_pending": !fresh })),
    )
}

async fn interval_handler(
    State(state): State<Arc<HealthState>>,
    body: Result<Json<IntervalRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": rejection.body_text() })),
            )
        }
    };

    let requested = Duration::from_secs(request.minutes.saturating_mul(60));
    match state.control.set_interval(requested).await {
        Ok(interval) => (
            StatusCode::OK,
            Json(json!({ "interval_secs": interval.as_secs() })),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let counts = state.control.status().await.counts;
    let health = state.get_health().await;
    let up = match health.status {
        HealthStatus::Healthy => 1,
        HealthStatus::Degraded => 0,
        HealthStatus::Unhealthy => -1,
    };

    let body = format!(
        "# HELP goalwatch_up Health status (1=healthy, 0=degraded, -1=unhealthy)\n\
         # TYPE goalwatch_up gauge\n\
         goalwatch_up {}\n\
         \n\
         # HELP goalwatch_uptime_seconds Uptime in seconds\n\
         # TYPE goalwatch_uptime_seconds counter\n\
         goalwatch_uptime_seconds {}\n\
         \n\
         {}",
        up,
        health.uptime_seconds,
        state.metrics.prometheus(counts),
    );

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::min_interval_for_quota;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> Arc<HealthState> {
        Arc::new(HealthState::new(
            Arc::new(DriverControl::new(
                Duration::from_secs(900),
                min_interval_for_quota(100, 1),
            )),
            Arc::new(Metrics::new()),
        ))
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let resp = router(state())
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pong");
    }

    #[tokio::test]
    async fn test_status_before_first_cycle() {
        let resp = router(state())
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["no_cycle_yet"], true);
        assert!(body["last_error"].is_null());
        assert_eq!(body["phase"], "IDLE");
        assert_eq!(body["interval_secs"], 900);
        assert_eq!(body["min_interval_secs"], 864);
    }

    #[tokio::test]
    async fn test_health_is_healthy_on_start() {
        let health = state().get_health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(
            health.components[0].message.as_deref(),
            Some("no cycle yet")
        );
    }

    #[tokio::test]
    async fn test_health_with_out_of_range_interval() {
        let state = HealthState::new(
            Arc::new(DriverControl::new(Duration::from_secs(u64::MAX), Duration::from_secs(60))),
            Arc::new(Metrics::new()),
        );
        let health = state.get_health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_force_check_sets_flag() {
        let state = state();
        let resp = router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/force-check")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["already_pending"], false);
        assert!(!state.control.request_force_cycle().await);
    }

    fn interval_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/interval")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_interval_change() {
        let state = state();
        let resp = router(state.clone())
            .oneshot(interval_request(r#"{"minutes": 30}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.control.interval().await, Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_interval_rejections() {
        let state = state();
        for body in [
            r#"{"minutes": 0}"#,
            r#"{"minutes": 5}"#,
            r#"{"minutes": 1441}"#,
            r#"{"minutes": "ten"}"#,
            "not json",
        ] {
            let resp = router(state.clone())
                .oneshot(interval_request(body))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {}", body);
        }
        assert_eq!(state.control.interval().await, Duration::from_secs(900));
    }

    #[tokio::test]
    async fn test_stats_and_requests_on_empty_state() {
        let app = router(state());
        let stats = app
            .clone()
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(stats).await;
        assert_eq!(body["days"].as_array().unwrap().len(), 7);
        assert_eq!(body["total"], 0);

        let requests = app
            .oneshot(Request::builder().uri("/requests").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(requests).await;
        assert!(body["api_calls"].as_array().unwrap().is_empty());
        assert!(body["notifications"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let resp = router(state())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("goalwatch_up 1"));
        assert!(text.contains("goalwatch_tracked_matches"));
    }
}
