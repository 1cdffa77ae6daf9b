//! REST API Server for the budget agent
//!
//! Exposes analysis runs over HTTP, either as a single JSON response or as a
//! server-sent event stream of reasoning steps.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::agent::BudgetAgent;
use crate::config::TransactionWindow;
use crate::error::{AgentError, RunFailure};
use crate::models::{BillingPeriod, RunEvent, UserProfile};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct AnalysisRequest {
    /// Falls back to the server's configured profile.
    pub profile: Option<UserProfile>,
    /// Named look-back window ending today; ignored when both dates are given.
    pub window: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Failed run: the error plus whatever reasoning log was produced.
    pub fn failure(failure: &RunFailure) -> Self {
        Self {
            success: false,
            data: Some(serde_json::json!({ "steps": failure.steps })),
            error: Some(failure.error.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<BudgetAgent>,
    pub profile: Arc<UserProfile>,
}

impl ApiState {
    fn resolve(&self, req: AnalysisRequest) -> Result<(UserProfile, BillingPeriod), AgentError> {
        let profile = req.profile.unwrap_or_else(|| (*self.profile).clone());

        let period = match (req.start, req.end) {
            (Some(start), Some(end)) => BillingPeriod::new(start, end)?,
            (None, None) => {
                let window = match req.window.as_deref() {
                    Some(name) => name.parse::<TransactionWindow>()?,
                    None => self.agent.config().window,
                };
                window.period_ending(chrono::Utc::now().date_naive())
            }
            _ => {
                return Err(AgentError::Config(
                    "start and end must be given together".to_string(),
                ))
            }
        };

        Ok((profile, period))
    }
}

fn failure_status(error: &AgentError) -> StatusCode {
    match error {
        AgentError::InvalidProfile(_) | AgentError::Config(_) => StatusCode::BAD_REQUEST,
        AgentError::Provider(_) | AgentError::Backend(_) | AgentError::Timeout { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "backend": state.agent.backend_name(),
        "max_cycles": state.agent.config().max_cycles,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Analysis Endpoint
/// =============================

async fn run_analysis(
    State(state): State<ApiState>,
    Json(req): Json<AnalysisRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let (profile, period) = match state.resolve(req) {
        Ok(resolved) => resolved,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    };

    info!(profile = %profile.name, %period, "Received analysis request");

    // Dropping the handler future (client gone) drops the run with it.
    match state
        .agent
        .run(&profile, period, None, CancellationToken::new())
        .await
    {
        Ok(report) => (StatusCode::OK, Json(ApiResponse::success(report))),
        Err(failure) => (
            failure_status(&failure.error),
            Json(ApiResponse::failure(&failure)),
        ),
    }
}

/// =============================
/// Streaming Endpoint
/// =============================

async fn stream_analysis(
    State(state): State<ApiState>,
    Json(req): Json<AnalysisRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<ApiResponse>)> {
    let (profile, period) = state.resolve(req).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(e.to_string())),
        )
    })?;

    info!(profile = %profile.name, %period, "Received streaming analysis request");

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let agent = state.agent.clone();
    let run_cancel = cancel.clone();

    tokio::spawn(async move {
        // Outcome reaches the client through the observer channel.
        if let Err(failure) = agent.run(&profile, period, Some(tx), run_cancel).await {
            warn!(error = %failure.error, "Streamed run ended without a report");
        }
    });

    // The guard cancels the run once the client stops listening.
    let guard = cancel.drop_guard();
    let events = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse(&event)), (rx, guard)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &RunEvent) -> Event {
    let name = match event {
        RunEvent::Step(_) => "step",
        RunEvent::Completed(_) => "completed",
        RunEvent::Failed { .. } => "failed",
    };

    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        serde_json::json!({ "event": "failed", "error": e.to_string() }).to_string()
    });

    Event::default().event(name).data(data)
}

/// =============================
/// Router
/// =============================

pub fn create_router(agent: Arc<BudgetAgent>, profile: UserProfile) -> Router {
    let state = ApiState {
        agent,
        profile: Arc::new(profile),
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/analysis", post(run_analysis))
        .route("/api/analysis/stream", post(stream_analysis))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    agent: Arc<BudgetAgent>,
    profile: UserProfile,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(agent, profile);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
