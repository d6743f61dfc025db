// Academic Year Guard - Web Server
// REST API over per-client year-selection sessions
//
// POST /api/sessions opens a session; every /api/session/* call names it in the
// `x-year-session` header. Sessions never see each other's school or selection.

use academic_year_guard::{
    get_schools, init_logging, insert_event, Config, Event, LoadOutcome, ReadOnlyViolation,
    School, SelectionSnapshot, SessionRegistry, SqliteYearStore, YearSession,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const SESSION_HEADER: &str = "x-year-session";

type Session = Arc<YearSession<SqliteYearStore, SqliteYearStore>>;

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: SqliteYearStore,
    sessions: Arc<SessionRegistry<SqliteYearStore, SqliteYearStore>>,
    actor: String,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    fn err(data: T, error: String) -> Self {
        Self {
            success: false,
            data,
            error: Some(error),
        }
    }
}

/// Response for session creation
#[derive(Serialize)]
struct SessionCreated {
    session_id: String,
    session: SelectionSnapshot,
}

/// Response for school switch / refresh
#[derive(Serialize)]
struct LoadResponse {
    outcome: LoadOutcome,
    session: SelectionSnapshot,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/schools - List schools
async fn list_schools(State(state): State<AppState>) -> Response {
    let result = get_schools(&state.store.conn());

    match result {
        Ok(schools) => (StatusCode::OK, Json(ApiResponse::ok(schools))).into_response(),
        Err(e) => {
            error!(error = %e, "failed to list schools");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err(Vec::<School>::new(), e.to_string())),
            )
                .into_response()
        }
    }
}

/// POST /api/sessions - Open a session for this client
async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let (session_id, session) = state.sessions.create();
    let response = SessionCreated {
        session_id,
        session: session.snapshot(),
    };
    (StatusCode::CREATED, Json(ApiResponse::ok(response)))
}

/// DELETE /api/sessions/:session_id - End a session
async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if state.sessions.end(&session_id) {
        (StatusCode::OK, Json(ApiResponse::ok(true))).into_response()
    } else {
        unknown_session(&session_id)
    }
}

/// GET /api/session - Current selection snapshot
async fn get_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match session_for(&state, &headers) {
        Ok(session) => Json(ApiResponse::ok(session.snapshot())).into_response(),
        Err(response) => response,
    }
}

/// POST /api/session/school/:school_id - Switch active school
async fn switch_school(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(school_id): Path<String>,
) -> Response {
    let session = match session_for(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };

    let outcome = session.switch_school(&school_id).await;
    let response = LoadResponse {
        outcome,
        session: session.snapshot(),
    };
    Json(ApiResponse::ok(response)).into_response()
}

/// POST /api/session/refresh - Reload the active school's years
async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match session_for(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };

    match session.refresh().await {
        Some(outcome) => {
            let response = LoadResponse {
                outcome,
                session: session.snapshot(),
            };
            Json(ApiResponse::ok(response)).into_response()
        }
        None => (
            StatusCode::CONFLICT,
            Json(ApiResponse::err(session.snapshot(), "no active school".to_string())),
        )
            .into_response(),
    }
}

/// POST /api/session/selection/:year_id - Select a year
async fn select_year(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(year_id): Path<String>,
) -> Response {
    let session = match session_for(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };

    match session.set_selected_year_id(&year_id) {
        Ok(()) => {
            let snapshot = session.snapshot();
            audit(&state, "year_selected", snapshot.school_id.as_deref(), &year_id);
            (StatusCode::OK, Json(ApiResponse::ok(snapshot))).into_response()
        }
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::err(session.snapshot(), e.to_string())),
        )
            .into_response(),
    }
}

/// POST /api/session/select-current - Switch back to the current year
async fn select_current(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match session_for(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };

    match session.select_current_year() {
        Some(year_id) => {
            let snapshot = session.snapshot();
            audit(&state, "year_selected", snapshot.school_id.as_deref(), &year_id);
            (StatusCode::OK, Json(ApiResponse::ok(snapshot))).into_response()
        }
        None => (
            StatusCode::CONFLICT,
            Json(ApiResponse::err(
                session.snapshot(),
                "no current academic year configured".to_string(),
            )),
        )
            .into_response(),
    }
}

/// POST /api/session/assert-writable - 409 when the selection is read-only
async fn assert_writable(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match session_for(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };

    match session.assert_writable() {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(true))).into_response(),
        Err(violation) => {
            let school_id = session.snapshot().school_id;
            audit(
                &state,
                "read_only_violation",
                school_id.as_deref(),
                violation.year_id.as_deref().unwrap_or(""),
            );
            violation_response(violation)
        }
    }
}

/// Resolve the caller's session from the `x-year-session` header
fn session_for(state: &AppState, headers: &HeaderMap) -> Result<Session, Response> {
    let Some(session_id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err((), format!("missing {} header", SESSION_HEADER))),
        )
            .into_response());
    };

    state
        .sessions
        .get(session_id)
        .ok_or_else(|| unknown_session(session_id))
}

fn unknown_session(session_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::err((), format!("unknown session {}", session_id))),
    )
        .into_response()
}

fn violation_response(violation: ReadOnlyViolation) -> Response {
    let message = violation.message.clone();
    (
        StatusCode::CONFLICT,
        Json(ApiResponse::err(violation, message)),
    )
        .into_response()
}

/// Best-effort audit event; failures are logged, never returned
fn audit(state: &AppState, event_type: &str, school_id: Option<&str>, year_id: &str) {
    let event = Event::new(
        event_type,
        "school",
        school_id.unwrap_or(""),
        serde_json::json!({ "year_id": year_id }),
        &state.actor,
    );

    if let Err(e) = insert_event(&state.store.conn(), &event) {
        error!(error = %e, event_type, "failed to record audit event");
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_logging(&config);

    let store = SqliteYearStore::open(&config.database_path)?;
    info!(path = ?config.database_path, "database opened");

    // Create shared state
    let state = AppState {
        store: store.clone(),
        sessions: Arc::new(SessionRegistry::new(store.clone(), store)),
        actor: config.actor.clone(),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/schools", get(list_schools))
        .route("/sessions", post(create_session))
        .route("/sessions/:session_id", delete(end_session))
        .route("/session", get(get_session))
        .route("/session/school/:school_id", post(switch_school))
        .route("/session/refresh", post(refresh))
        .route("/session/selection/:year_id", post(select_year))
        .route("/session/select-current", post(select_current))
        .route("/session/assert-writable", post(assert_writable))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "server running");

    axum::serve(listener, app).await?;

    Ok(())
}
