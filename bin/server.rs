// Provider Funds - Web Server
// REST API with Axum

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{Datelike, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use provider_funds::{
    build_candidates, get_allocations, get_reports_since, init_tracing, insert_report, load_index,
    merge_allocations, setup_database, AppConfig, CanonicalProvider, CanonicalSpecialty,
    FundStatus, ReportKind, ReportRejection, Suggestion, UserReport,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    config: Arc<AppConfig>,
}

impl AppState {
    fn db(&self) -> Result<MutexGuard<'_, Connection>, Response> {
        self.db
            .lock()
            .map_err(|_| internal_error("database lock poisoned"))
    }
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
}

impl ApiResponse<()> {
    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message.into()),
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::error(message))).into_response()
}

fn internal_error(e: impl Display) -> Response {
    tracing::error!(error = %e, "request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

/// Provider with its specialties resolved
#[derive(Serialize)]
struct ProviderResponse {
    provider: CanonicalProvider,
    specialties: Vec<CanonicalSpecialty>,
}

#[derive(Deserialize)]
struct StatusQuery {
    service: Option<String>,
}

#[derive(Deserialize)]
struct SuggestQuery {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
struct ReportRequest {
    kind: ReportKind,
    comment: Option<String>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/providers/:id - One canonical provider
async fn get_provider(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let conn = match state.db() {
        Ok(conn) => conn,
        Err(response) => return response,
    };
    let index = match load_index(&conn) {
        Ok(index) => index,
        Err(e) => return internal_error(e),
    };

    match index.find_by_id(&id) {
        Some(provider) => {
            let specialties = provider
                .specialty_ids
                .iter()
                .filter_map(|sid| index.specialties().find_by_id(sid).cloned())
                .collect();
            let response = ProviderResponse {
                provider: provider.clone(),
                specialties,
            };
            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        None => error_response(StatusCode::NOT_FOUND, format!("Unknown provider: {}", id)),
    }
}

/// GET /api/providers/:id/status?service= - Fund availability as of now
async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let conn = match state.db() {
        Ok(conn) => conn,
        Err(response) => return response,
    };

    let now = Utc::now();
    let window = Duration::seconds((state.config.estimator.window_hours * 3600.0) as i64);
    let loaded = provider_funds::provider_exists(&conn, &id).and_then(|exists| {
        if !exists {
            return Ok(None);
        }
        let allocations = get_allocations(&conn, &id, now.year(), now.month())?;
        let reports = get_reports_since(&conn, &id, now - window)?;
        Ok(Some((allocations, reports)))
    });

    match loaded {
        Ok(Some((allocations, reports))) => {
            let merged = merge_allocations(
                &allocations,
                &id,
                now.year(),
                now.month(),
                query.service.as_deref().filter(|s| !s.trim().is_empty()),
            );
            let status: FundStatus = state.config.estimator().estimate(merged.as_ref(), &reports, now);
            (StatusCode::OK, Json(ApiResponse::ok(status))).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Unknown provider: {}", id)),
        Err(e) => internal_error(e),
    }
}

/// GET /api/suggest?q= - Typeahead suggestions
async fn suggest(State(state): State<AppState>, Query(query): Query<SuggestQuery>) -> Response {
    let conn = match state.db() {
        Ok(conn) => conn,
        Err(response) => return response,
    };

    match load_index(&conn) {
        Ok(index) => {
            let candidates = build_candidates(&index);
            let suggestions: Vec<Suggestion> = state.config.ranker().rank(&query.q, &candidates);
            (StatusCode::OK, Json(ApiResponse::ok(suggestions))).into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// POST /api/providers/:id/reports - Submit a community report
async fn submit_report(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
    Json(request): Json<ReportRequest>,
) -> Response {
    let conn = match state.db() {
        Ok(conn) => conn,
        Err(response) => return response,
    };
    let index = match load_index(&conn) {
        Ok(index) => index,
        Err(e) => return internal_error(e),
    };

    let now = Utc::now();
    let policy = state.config.report_policy();
    let existing = match get_reports_since(&conn, &id, now - policy.cooldown) {
        Ok(reports) => reports,
        Err(e) => return internal_error(e),
    };

    let report = UserReport::new(
        &id,
        request.kind,
        request.comment.as_deref(),
        &peer.ip().to_string(),
        &state.config.fingerprint_salt,
        now,
    );

    match policy.check(&index, &existing, &report) {
        Ok(()) => match insert_report(&conn, &report) {
            Ok(()) => {
                tracing::info!(provider_id = %id, kind = report.kind.as_str(), "report recorded");
                (StatusCode::CREATED, Json(ApiResponse::ok(report))).into_response()
            }
            Err(e) => internal_error(e),
        },
        Err(rejection @ ReportRejection::UnknownProvider { .. }) => {
            error_response(StatusCode::NOT_FOUND, rejection.to_string())
        }
        Err(rejection @ ReportRejection::DuplicateSubmission { .. }) => {
            error_response(StatusCode::TOO_MANY_REQUESTS, rejection.to_string())
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config);

    println!("🌐 Provider Funds - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = Connection::open(&config.database_path)?;
    setup_database(&conn)?;
    println!("✓ Database opened: {}", config.database_path);

    let bind = config.server_bind.clone();
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        config: Arc::new(config),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/providers/:id", get(get_provider))
        .route("/providers/:id/status", get(get_status))
        .route("/providers/:id/reports", post(submit_report))
        .route("/suggest", get(suggest))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = tokio::net::TcpListener::bind(&bind).await?;

    println!("\n🚀 Server running on http://{}", bind);
    println!("   API: http://{}/api/suggest?q=card", bind);
    println!("\n   Press Ctrl+C to stop\n");
    tracing::info!(%bind, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
