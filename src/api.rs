use std::sync::Arc;

use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::Value;
use tokio::{net::TcpListener, sync::watch};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    clients::{health::HealthChecker, publisher::EventPublisher},
    config::Config,
    models::{
        event::{Event, FieldError},
        health::HealthStatus,
        response::{ErrorResponse, TrackResponse},
        status::WorkerState,
    },
};

#[derive(Clone)]
pub struct AppState {
    publisher: Arc<EventPublisher>,
    health_checker: Arc<HealthChecker>,
    worker_state: Option<watch::Receiver<WorkerState>>,
}

impl AppState {
    pub fn new(publisher: Arc<EventPublisher>, health_checker: Arc<HealthChecker>) -> Self {
        Self {
            publisher,
            health_checker,
            worker_state: None,
        }
    }

    /// Reports the in-process worker's lifecycle on `GET /health`.
    pub fn with_worker_state(mut self, worker_state: watch::Receiver<WorkerState>) -> Self {
        self.worker_state = Some(worker_state);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/events/track", post(track_event))
        .route("/api/v1/events/track", post(track_event))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API until `shutdown` is cancelled, then drains in-flight requests.
pub async fn run_api_server(
    config: &Config,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("API server stopped");

    Ok(())
}

async fn track_event(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected unreadable request body");
            let details = vec![FieldError::new("body", rejection.body_text())];
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::invalid_payload(details)),
            )
                .into_response();
        }
    };

    let event = match Event::from_json(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Rejected invalid event");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::invalid_payload(e.details)),
            )
                .into_response();
        }
    };

    match state.publisher.publish(&event).await {
        Ok(()) => {
            info!(
                user_id = %event.user_id(),
                event_type = event.event_type(),
                "Event accepted"
            );
            (StatusCode::ACCEPTED, Json(TrackResponse::accepted())).into_response()
        }
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::queue_failure()),
        )
            .into_response(),
    }
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut health = state.health_checker.check_all().await;
    health.worker = state.worker_state.as_ref().map(|rx| *rx.borrow());

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}
