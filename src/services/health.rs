//! Health, metrics and operator API
//!
//! Liveness/readiness probes and Prometheus metrics, plus the operator
//! surface: current decisions, recent alerts, manual override, HTTP ingest
//! and a WebSocket feed of decisions and alerts.

use crate::adapters::RecordDecoder;
use crate::domain::{
    AnomalyAlert, Decision, InputRecord, HUMAN_TELEMETRY_TOPIC, ROBOT_TELEMETRY_TOPIC,
    ZONE_CONTEXT_TOPIC,
};
use crate::engine::{OverrideRegistry, OverrideSource};
use crate::error::CoSenseError;
use crate::services::{AlertEmitter, DecisionEmitter, Metrics};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

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
}

/// Overall system health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    pub tracked_robots: usize,
    pub overridden_robots: Vec<String>,
}

/// Shared state for the health server
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    /// Pipeline tasks are running
    pub ready: AtomicBool,
    pub metrics: Arc<Metrics>,
    pub decisions: Arc<DecisionEmitter>,
    pub alerts: Arc<AlertEmitter>,
    pub overrides: OverrideRegistry,
    /// HTTP ingest; None disables `/ingest/*`
    pub ingest: Option<(RecordDecoder, mpsc::Sender<InputRecord>)>,
    /// Seconds without input before ingest is reported degraded
    pub idle_threshold_secs: i64,
}

impl HealthState {
    pub fn new(
        metrics: Arc<Metrics>,
        decisions: Arc<DecisionEmitter>,
        alerts: Arc<AlertEmitter>,
        overrides: OverrideRegistry,
    ) -> Self {
        Self {
            started_at: Utc::now(),
            ready: AtomicBool::new(false),
            metrics,
            decisions,
            alerts,
            overrides,
            ingest: None,
            idle_threshold_secs: 30,
        }
    }

    pub fn with_ingest(mut self, decoder: RecordDecoder, tx: mpsc::Sender<InputRecord>) -> Self {
        self.ingest = Some((decoder, tx));
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Get overall health status
    pub fn get_health(&self) -> HealthResponse {
        let mut components = Vec::new();
        let mut overall = HealthStatus::Healthy;

        let ready = self.ready.load(Ordering::SeqCst);
        let pipeline = if ready {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        components.push(ComponentHealth {
            name: "pipeline".to_string(),
            status: pipeline,
            message: (!ready).then(|| "Not running".to_string()),
        });
        if !ready {
            overall = HealthStatus::Unhealthy;
        }

        let idle = Utc::now().timestamp() - self.metrics.last_activity();
        let ingest = if idle > self.idle_threshold_secs {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        components.push(ComponentHealth {
            name: "ingest".to_string(),
            status: ingest,
            message: (ingest != HealthStatus::Healthy)
                .then(|| format!("No input for {}s", idle)),
        });
        if ingest == HealthStatus::Degraded && overall == HealthStatus::Healthy {
            overall = HealthStatus::Degraded;
        }

        let restarts = Metrics::get(&self.metrics.worker_restarts);
        let workers = if restarts > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        components.push(ComponentHealth {
            name: "partitions".to_string(),
            status: workers,
            message: (restarts > 0).then(|| format!("{} worker restarts", restarts)),
        });
        if workers == HealthStatus::Degraded && overall == HealthStatus::Healthy {
            overall = HealthStatus::Degraded;
        }

        HealthResponse {
            status: overall,
            timestamp: Utc::now(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            components,
            tracked_robots: self.decisions.current_all().len(),
            overridden_robots: self.overrides.list(),
        }
    }
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

    pub fn router(state: Arc<HealthState>) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .route("/decisions/current", get(current_decisions_handler))
            .route("/alerts/recent", get(recent_alerts_handler))
            .route("/robots/overrides", get(list_overrides_handler))
            .route(
                "/robots/:id/override",
                post(set_override_handler).delete(clear_override_handler),
            )
            .route("/ingest/:kind", post(ingest_handler))
            .route("/ws", get(websocket_handler))
            .with_state(state)
            .layer(cors)
    }

    /// Serve until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> crate::Result<()> {
        let app = Self::router(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting health server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .map_err(|e| CoSenseError::Internal(format!("Health server error: {}", e)))?;

        Ok(())
    }

    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health();
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.ready.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health();
    let up = match health.status {
        HealthStatus::Healthy => 1,
        HealthStatus::Degraded => 0,
        HealthStatus::Unhealthy => -1,
    };
    let body = format!(
        "# HELP cosense_up Health status (1=healthy, 0=degraded, -1=unhealthy)\n\
         # TYPE cosense_up gauge\n\
         cosense_up {}\n\n\
         # HELP cosense_uptime_seconds Uptime in seconds\n\
         # TYPE cosense_uptime_seconds counter\n\
         cosense_uptime_seconds {}\n\n\
         # HELP cosense_overridden_robots Robots under manual override\n\
         # TYPE cosense_overridden_robots gauge\n\
         cosense_overridden_robots {}\n\n{}",
        up,
        health.uptime_seconds,
        health.overridden_robots.len(),
        state.metrics.prometheus(),
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

async fn current_decisions_handler(State(state): State<Arc<HealthState>>) -> Json<Vec<Decision>> {
    Json(state.decisions.current_all())
}

async fn recent_alerts_handler(State(state): State<Arc<HealthState>>) -> Json<Vec<AnomalyAlert>> {
    Json(state.alerts.recent().await)
}

#[derive(Debug, Serialize)]
struct OverrideResponse {
    robot_id: String,
    manual_override: bool,
}

async fn list_overrides_handler(State(state): State<Arc<HealthState>>) -> Json<Vec<String>> {
    Json(state.overrides.list())
}

async fn set_override_handler(
    State(state): State<Arc<HealthState>>,
    Path(robot_id): Path<String>,
) -> impl IntoResponse {
    state.overrides.set(&robot_id, OverrideSource::Operator);
    Json(OverrideResponse {
        robot_id,
        manual_override: true,
    })
}

async fn clear_override_handler(
    State(state): State<Arc<HealthState>>,
    Path(robot_id): Path<String>,
) -> impl IntoResponse {
    if state.overrides.clear(&robot_id) {
        (
            StatusCode::OK,
            Json(OverrideResponse {
                robot_id,
                manual_override: false,
            }),
        )
            .into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn ingest_handler(
    State(state): State<Arc<HealthState>>,
    Path(kind): Path<String>,
    Json(value): Json<serde_json::Value>,
) -> impl IntoResponse {
    let Some((decoder, tx)) = &state.ingest else {
        return (StatusCode::SERVICE_UNAVAILABLE, "ingest disabled".to_string());
    };
    let topic = match kind.as_str() {
        "robot" => ROBOT_TELEMETRY_TOPIC,
        "human" => HUMAN_TELEMETRY_TOPIC,
        "zone" => ZONE_CONTEXT_TOPIC,
        _ => return (StatusCode::NOT_FOUND, format!("unknown record kind: {}", kind)),
    };

    match decoder.decode_value(topic, value) {
        Ok(record) => match tx.send(record).await {
            Ok(()) => (StatusCode::ACCEPTED, String::new()),
            Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "pipeline stopped".to_string()),
        },
        Err(e) => {
            Metrics::inc(&state.metrics.records_malformed);
            debug!(error = %e, "rejected HTTP record");
            (StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

/// Streams decisions and alerts (raw and enriched) as JSON text frames
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HealthState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum FeedMessage {
    Decision(Decision),
    Alert(AnomalyAlert),
}

async fn handle_socket(socket: WebSocket, state: Arc<HealthState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut decisions = state.decisions.subscribe();
    let mut alerts = state.alerts.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                decision = decisions.recv() => match decision {
                    Ok(d) => FeedMessage::Decision(d),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "websocket client lagging");
                        continue;
                    }
                    Err(_) => break,
                },
                alert = alerts.recv() => match alert {
                    Ok(a) => FeedMessage::Alert(a),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                },
            };

            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(_) => continue,
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Close(_) = msg {
            break;
        }
    }

    send_task.abort();
    debug!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::NoopActuator;
    use crate::config::{ActuatorConfig, EnrichmentConfig, IngestConfig};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> Arc<HealthState> {
        let metrics = Arc::new(Metrics::new());
        let decisions = Arc::new(DecisionEmitter::new(
            ActuatorConfig::default(),
            Arc::new(NoopActuator),
            Arc::clone(&metrics),
        ));
        let alerts = Arc::new(AlertEmitter::new(
            &EnrichmentConfig::default(),
            None,
            Arc::clone(&metrics),
        ));
        Arc::new(HealthState::new(metrics, decisions, alerts, OverrideRegistry::new()))
    }

    #[tokio::test]
    async fn test_not_ready_until_started() {
        let state = state();
        assert_eq!(state.get_health().status, HealthStatus::Unhealthy);

        state.set_ready(true);
        assert_eq!(state.get_health().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_override_routes() {
        let state = state();
        let app = HealthServer::router(Arc::clone(&state));

        let resp = app
            .clone()
            .oneshot(
                Request::post("/robots/robot-7/override")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.overrides.is_overridden("robot-7"));

        let resp = app
            .clone()
            .oneshot(
                Request::delete("/robots/robot-7/override")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!state.overrides.is_overridden("robot-7"));

        let resp = app
            .oneshot(
                Request::delete("/robots/robot-7/override")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ingest_route_validates() {
        let (tx, mut rx) = mpsc::channel(4);
        let base = state();
        let state = Arc::new(
            HealthState::new(
                Arc::clone(&base.metrics),
                Arc::clone(&base.decisions),
                Arc::clone(&base.alerts),
                OverrideRegistry::new(),
            )
            .with_ingest(RecordDecoder::new(&IngestConfig::default()), tx),
        );
        let app = HealthServer::router(Arc::clone(&state));

        let resp = app
            .clone()
            .oneshot(
                Request::post("/ingest/human")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"human_id":"human-1","timestamp":1000,"x":1.0,"y":1.0,"velocity":0.3}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(matches!(rx.recv().await, Some(InputRecord::Human(_))));

        let resp = app
            .oneshot(
                Request::post("/ingest/zone")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"zone_id":"","timestamp":1000}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Metrics::get(&state.metrics.records_malformed), 1);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = HealthServer::router(state());
        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
