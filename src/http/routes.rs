//! HTTP route definitions

use axum::{
    extract::{Extension, Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::tournament::{
    BracketView, MatchTicket, NewTournament, Participant, Persisted, ResultOutcome, Tournament,
    TournamentError, TournamentSummary,
};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CLIENT_ORIGIN may list several origins, comma-separated
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (the socket authenticates with a query token)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    let tournament_routes = Router::new()
        .route("/tournaments", get(list_handler).post(create_handler))
        .route("/tournaments/:id", get(get_handler))
        .route("/tournaments/:id/participants", post(register_handler))
        .route("/tournaments/:id/start", post(start_handler))
        .route("/tournaments/:id/bracket", get(bracket_handler))
        .route(
            "/tournaments/:id/matches/:match_id/session",
            post(open_session_handler),
        )
        .route(
            "/tournaments/:id/matches/:match_id/result",
            post(report_handler),
        )
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(tournament_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    connected_players: usize,
    tournaments: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.rooms.active_rooms(),
        connected_players: state.rooms.connected_players(),
        tournaments: state.tournaments.len(),
    })
}

// ============================================================================
// Tournament endpoints
// ============================================================================

async fn create_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<NewTournament>,
) -> Result<(StatusCode, Json<Persisted<Tournament>>), AppError> {
    let created = state.tournaments.create(auth.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_handler(State(state): State<AppState>) -> Json<Vec<TournamentSummary>> {
    Json(state.tournaments.list().await)
}

async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Tournament>, AppError> {
    Ok(Json(state.tournaments.get(id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    seed: Option<u32>,
}

async fn register_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Persisted<Participant>>), AppError> {
    let display_name = req.display_name.unwrap_or(auth.display_name);
    let participant = state
        .tournaments
        .register(id, auth.user_id, &display_name, req.seed)
        .await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

async fn start_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Persisted<Tournament>>, AppError> {
    Ok(Json(state.tournaments.start(id, auth.user_id).await?))
}

async fn bracket_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BracketView>, AppError> {
    Ok(Json(state.tournaments.bracket(id).await?))
}

async fn open_session_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path((id, match_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Persisted<MatchTicket>>, AppError> {
    Ok(Json(
        state
            .tournaments
            .open_match_session(id, match_id, auth.user_id)
            .await?,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRequest {
    left_score: u32,
    right_score: u32,
}

async fn report_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path((id, match_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<Persisted<ResultOutcome>>, AppError> {
    Ok(Json(
        state
            .tournaments
            .report(id, match_id, auth.user_id, req.left_score, req.right_score)
            .await?,
    ))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<TournamentError> for AppError {
    fn from(e: TournamentError) -> Self {
        let message = e.to_string();
        match e {
            TournamentError::NotFound(_) | TournamentError::MatchNotFound(_) => AppError::NotFound(message),
            TournamentError::Validation(_) => AppError::BadRequest(message),
            TournamentError::Forbidden(_) => AppError::Forbidden(message),
            TournamentError::ConcurrencyConflict(_)
            | TournamentError::InvalidState(_)
            | TournamentError::Full
            | TournamentError::AlreadyRegistered => AppError::Conflict(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::http::middleware::issue_token;
    use crate::store::MemoryStore;
    use crate::util::time::unix_millis;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "route-secret";

    fn router() -> Router {
        let config = Config::from_lookup(|key| match key {
            "AUTH_JWT_SECRET" => Some(SECRET.to_string()),
            _ => None,
        })
        .unwrap();
        let (state, _outcomes) = AppState::with_store(config, Arc::new(MemoryStore::new()));
        build_router(state)
    }

    fn token(user: Uuid) -> String {
        issue_token(user, Some("tester"), SECRET, unix_millis() / 1000 + 600)
    }

    async fn call(router: &Router, method: Method, uri: &str, user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_is_public() {
        let router = router();
        let (status, body) = call(&router, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_rooms"], 0);
    }

    #[tokio::test]
    async fn tournament_routes_require_a_token() {
        let router = router();
        let (status, body) = call(&router, Method::GET, "/tournaments", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn full_tournament_flow_over_http() {
        let router = router();
        let creator = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (status, created) = call(
            &router,
            Method::POST,
            "/tournaments",
            Some(creator),
            Some(json!({ "name": "Lunch Cup", "maxParticipants": 4, "settings": { "winScore": 5 } })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["durable"], true);
        let id = created["data"]["id"].as_str().unwrap().to_string();

        for user in [a, b] {
            let (status, joined) = call(
                &router,
                Method::POST,
                &format!("/tournaments/{id}/participants"),
                Some(user),
                Some(json!({})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(joined["data"]["displayName"], "tester");
        }

        let (status, _) = call(
            &router,
            Method::POST,
            &format!("/tournaments/{id}/participants"),
            Some(a),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&router, Method::POST, &format!("/tournaments/{id}/start"), Some(a), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, started) =
            call(&router, Method::POST, &format!("/tournaments/{id}/start"), Some(creator), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["data"]["status"], "in_progress");
        let match_id = started["data"]["matches"][0]["id"].as_str().unwrap().to_string();

        let (status, ticket) = call(
            &router,
            Method::POST,
            &format!("/tournaments/{id}/matches/{match_id}/session"),
            Some(a),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(ticket["data"]["roomId"].as_str().unwrap().starts_with("match-"));

        let result_uri = format!("/tournaments/{id}/matches/{match_id}/result");
        let (status, reported) = call(
            &router,
            Method::POST,
            &result_uri,
            Some(b),
            Some(json!({ "leftScore": 3, "rightScore": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reported["data"]["tournamentFinished"], true);

        let (status, _) = call(
            &router,
            Method::POST,
            &result_uri,
            Some(b),
            Some(json!({ "leftScore": 5, "rightScore": 3 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, bracket) =
            call(&router, Method::GET, &format!("/tournaments/{id}/bracket"), Some(a), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bracket["status"], "finished");
        assert_eq!(bracket["nodes"][0]["winner"], "right");
    }

    #[tokio::test]
    async fn unknown_tournament_is_not_found() {
        let router = router();
        let (status, body) = call(
            &router,
            Method::GET,
            &format!("/tournaments/{}", Uuid::new_v4()),
            Some(Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }
}
