//! HTTP request handlers

use super::sse::{session_events, turn_stream};
use super::types::{
    CreateSessionRequest, ErrorResponse, EvaluationResponse, LegacyChatRequest,
    LegacyEvaluationResponse, ProgressResponse, ScenarioInfo, ScenarioInfoQuery,
    ScenarioInfoResponse, ScenarioListResponse, ScenarioResponse,
    SessionIdRequest, SessionListResponse, SessionResponse, SessionStartResponse,
    StartChatResponse, SuccessResponse, TurnRequest,
};
use super::AppState;
use crate::error::SessionError;
use crate::state_machine::Event;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Scenario catalog
        .route("/api/scenarios", get(list_scenarios))
        .route("/api/scenarios/info", get(scenario_info))
        .route("/api/scenarios/:id", get(get_scenario))
        // Session lifecycle
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(close_session))
        // Conversation
        .route("/api/sessions/:id/turns", post(send_turn))
        .route("/api/sessions/:id/events", get(stream_events))
        .route("/api/sessions/:id/advance", post(advance_step))
        .route("/api/sessions/:id/cancel", post(cancel_exchange))
        .route("/api/sessions/:id/restart", post(restart_session))
        .route("/api/sessions/:id/evaluate", post(evaluate_session))
        // Routes older clients call
        .route("/api/start_chat", post(start_chat))
        .route("/api/chat/stream", post(legacy_chat_stream))
        .route("/api/evaluate", post(legacy_evaluate))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Scenarios
// ============================================================

async fn list_scenarios(State(state): State<AppState>) -> Json<ScenarioListResponse> {
    Json(ScenarioListResponse {
        scenarios: state.store.scenarios().list_scenarios(),
    })
}

/// Listing with steps and cues; `?id=` narrows it to one scenario by id or
/// key and falls back to the full list when nothing matches
async fn scenario_info(
    State(state): State<AppState>,
    Query(query): Query<ScenarioInfoQuery>,
) -> Json<ScenarioInfoResponse> {
    let provider = state.store.scenarios();
    if let Some(scenario) = query.id.and_then(|id| provider.get_scenario(&id).ok()) {
        return Json(ScenarioInfoResponse {
            scenarios: vec![ScenarioInfo::from(scenario.as_ref())],
        });
    }

    let scenarios = provider
        .list_scenarios()
        .iter()
        .filter_map(|summary| provider.get_scenario(&summary.id).ok())
        .map(|scenario| ScenarioInfo::from(scenario.as_ref()))
        .collect();
    Json(ScenarioInfoResponse { scenarios })
}

async fn get_scenario(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScenarioResponse>, AppError> {
    let scenario = state.store.scenarios().get_scenario(&id)?;
    Ok(Json(ScenarioResponse::from(scenario.as_ref())))
}

// ============================================================
// Session Lifecycle
// ============================================================

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionStartResponse>), AppError> {
    let handle = state.store.create(&req.scenario_id).await?;
    let response = SessionStartResponse::new(&handle.snapshot(), handle.scenario());
    Ok((StatusCode::CREATED, Json(response)))
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.store.active_sessions().await,
    })
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let handle = state.store.get(&id).await?;
    Ok(Json(SessionResponse::from(&handle.snapshot())))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.store.close(&id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn restart_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStartResponse>, AppError> {
    let handle = state.store.restart(&id).await?;
    Ok(Json(SessionStartResponse::new(
        &handle.snapshot(),
        handle.scenario(),
    )))
}

// ============================================================
// Conversation
// ============================================================

async fn send_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TurnRequest>,
) -> Result<Response, AppError> {
    submit_turn(&state, &id, req.text, req.model).await
}

/// Record the user turn, then answer with the streaming reply
async fn submit_turn(
    state: &AppState,
    id: &str,
    text: String,
    model: Option<String>,
) -> Result<Response, AppError> {
    if text.trim().is_empty() {
        return Err(AppError::BadRequest("Message is empty".to_string()));
    }

    let handle = state.store.get(id).await?;
    // Subscribe first so no fragment of this exchange is missed
    let events = handle.subscribe();
    let session = handle.send(Event::UserTurn { text, model }).await?;
    let exchange = session
        .phase
        .exchange()
        .ok_or_else(|| AppError::Internal("exchange did not start".to_string()))?;

    Ok(turn_stream(handle, events, exchange).into_response())
}

async fn stream_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let handle = state.store.get(&id).await?;
    Ok(session_events(&handle).into_response())
}

async fn advance_step(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProgressResponse>, AppError> {
    let handle = state.store.get(&id).await?;
    let session = handle.send(Event::AdvanceStep).await?;
    Ok(Json(ProgressResponse {
        session_id: session.id.clone(),
        progress: session.progress(),
    }))
}

async fn cancel_exchange(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProgressResponse>, AppError> {
    let handle = state.store.get(&id).await?;
    let session = handle.send(Event::Cancel { exchange: None }).await?;
    Ok(Json(ProgressResponse {
        session_id: session.id.clone(),
        progress: session.progress(),
    }))
}

async fn evaluate_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EvaluationResponse>, AppError> {
    let handle = state.store.get(&id).await?;
    let report = state.store.evaluate(&id).await?;
    Ok(Json(EvaluationResponse {
        session_id: id,
        scenario_id: handle.scenario().id.clone(),
        report,
    }))
}

// ============================================================
// Older Client Routes
// ============================================================

async fn start_chat(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<StartChatResponse>, AppError> {
    let handle = state.store.create(&req.scenario_id).await?;
    let scenario = handle.scenario();
    Ok(Json(StartChatResponse {
        session_id: handle.id().to_string(),
        initial_prompt: scenario.initial_prompt.clone(),
        ai_role: scenario.ai_role.clone(),
        communication_steps: scenario.steps.iter().map(|s| s.name.clone()).collect(),
    }))
}

async fn legacy_chat_stream(
    State(state): State<AppState>,
    Json(req): Json<LegacyChatRequest>,
) -> Result<Response, AppError> {
    submit_turn(&state, &req.session_id, req.message, req.model).await
}

async fn legacy_evaluate(
    State(state): State<AppState>,
    Json(req): Json<SessionIdRequest>,
) -> Result<Json<LegacyEvaluationResponse>, AppError> {
    let handle = state.store.get(&req.session_id).await?;
    let report = state.store.evaluate(&req.session_id).await?;
    Ok(Json(LegacyEvaluationResponse {
        session_id: req.session_id,
        scenario_id: handle.scenario().id.clone(),
        steps_evaluation: report.steps,
        overall_score: report.overall_score,
        feedback: report.feedback,
    }))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("medcomm ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Session(SessionError),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        AppError::Session(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Session(e) => {
                let status = match &e {
                    SessionError::InvalidState(_) => StatusCode::CONFLICT,
                    SessionError::SessionNotFound(_) | SessionError::NotFound(_) => {
                        StatusCode::NOT_FOUND
                    }
                    SessionError::NoTranscript => StatusCode::UNPROCESSABLE_ENTITY,
                    SessionError::Stream(_) | SessionError::Parse(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
