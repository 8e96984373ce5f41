//! Read-only HTTP surface: dashboard queries and health probes.
//!
//! Every route is a pure read against committed state. Pipeline errors
//! never surface here; dashboards degrade to last-known data.

use crate::domain::{PeriodType, Scope, ScopeKind};
use crate::facade::DashboardFacade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Overall system health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
}

/// Shared state the runtime keeps fresh for the health endpoint
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    pub db_connected: AtomicBool,
    pub last_worker_poll: RwLock<Option<DateTime<Utc>>>,
    pub last_snapshots: RwLock<HashMap<PeriodType, DateTime<Utc>>>,
    /// Worker considered stalled when its last poll is older than this
    pub worker_staleness_secs: u64,
}

impl HealthState {
    pub fn new(worker_staleness_secs: u64) -> Self {
        Self {
            started_at: Utc::now(),
            db_connected: AtomicBool::new(false),
            last_worker_poll: RwLock::new(None),
            last_snapshots: RwLock::new(HashMap::new()),
            worker_staleness_secs,
        }
    }

    pub fn set_db_connected(&self, connected: bool) {
        self.db_connected.store(connected, Ordering::SeqCst);
    }

    pub async fn record_worker_poll(&self, at: DateTime<Utc>) {
        *self.last_worker_poll.write().await = Some(at);
    }

    pub async fn record_snapshots(&self, cycles: HashMap<PeriodType, DateTime<Utc>>) {
        *self.last_snapshots.write().await = cycles;
    }

    /// Get overall health status
    pub async fn get_health(&self) -> HealthResponse {
        let mut components = Vec::new();
        let mut overall = HealthStatus::Healthy;

        let db_connected = self.db_connected.load(Ordering::SeqCst);
        components.push(ComponentHealth {
            name: "database".to_string(),
            status: if db_connected {
                HealthStatus::Healthy
            } else {
                overall = HealthStatus::Unhealthy;
                HealthStatus::Unhealthy
            },
            message: (!db_connected).then(|| "no recent successful check".to_string()),
        });

        let worker_status = match *self.last_worker_poll.read().await {
            Some(last) => {
                let elapsed = (Utc::now() - last).num_seconds().max(0) as u64;
                if elapsed <= self.worker_staleness_secs {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                }
            }
            None => HealthStatus::Degraded,
        };
        if worker_status != HealthStatus::Healthy && overall == HealthStatus::Healthy {
            overall = HealthStatus::Degraded;
        }
        components.push(ComponentHealth {
            name: "worker".to_string(),
            status: worker_status,
            message: None,
        });

        // Stale snapshots degrade, never fail: dashboards keep serving the
        // last generation
        let snapshots = self.last_snapshots.read().await;
        components.push(ComponentHealth {
            name: "snapshots".to_string(),
            status: if snapshots.is_empty() {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            message: snapshots
                .is_empty()
                .then(|| "no cycle completed yet".to_string()),
        });

        HealthResponse {
            status: overall,
            timestamp: Utc::now(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            components,
        }
    }
}

/// Shared state for all routes
#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<DashboardFacade>,
    pub health: Arc<HealthState>,
}

/// Build the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/students/:student_id/points", get(points_handler))
        .route("/students/:student_id/level", get(level_handler))
        .route(
            "/students/:student_id/achievements",
            get(achievements_handler),
        )
        .route("/students/:student_id/events", get(events_handler))
        .route(
            "/leaderboards/:kind/:id/:period",
            get(leaderboard_handler),
        )
        .layer(TraceLayer::new_for_http())
        // Dashboards are served from a different origin than the API
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until shutdown is signalled
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Query API listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct ScopeQuery {
    scope_kind: String,
    scope_id: String,
}

impl ScopeQuery {
    fn to_scope(&self) -> Result<Scope, StatusCode> {
        let kind =
            ScopeKind::try_from(self.scope_kind.as_str()).map_err(|_| StatusCode::BAD_REQUEST)?;
        Ok(Scope::new(kind, self.scope_id.clone()))
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health.get_health().await;
    let code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(health))
}

async fn points_handler(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let scope = query.to_scope()?;

    state
        .facade
        .points_summary(&student_id, &scope)
        .await
        .map(Json)
        .map_err(|e| {
            warn!("points summary query failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn level_handler(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let scope = query.to_scope()?;

    state
        .facade
        .student_level(&student_id, &scope)
        .await
        .map(Json)
        .map_err(|e| {
            warn!("level query failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn achievements_handler(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .facade
        .student_achievements(&student_id)
        .await
        .map(Json)
        .map_err(|e| {
            warn!("achievements query failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default = "default_events_limit")]
    limit: i64,
}

fn default_events_limit() -> i64 {
    20
}

async fn events_handler(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .facade
        .recent_events(&student_id, query.limit.clamp(1, 200))
        .await
        .map(Json)
        .map_err(|e| {
            warn!("events query failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Path((kind, id, period)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    let kind = ScopeKind::try_from(kind.as_str()).map_err(|_| StatusCode::BAD_REQUEST)?;
    let period = PeriodType::try_from(period.as_str()).map_err(|_| StatusCode::BAD_REQUEST)?;

    state
        .facade
        .leaderboard(&Scope::new(kind, id), period)
        .await
        .map(Json)
        .map_err(|e| {
            warn!("leaderboard query failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
