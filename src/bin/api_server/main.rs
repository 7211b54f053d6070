//! Thin HTTP façade over the orchestrator: emits job IDs, reports job
//! status, and drains the retry queue on demand. Auth is a single shared
//! `X-API-Key` header compared against configuration — no per-route
//! scoping, no sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use trackimmo_backend::address_api::AddressApiClient;
use trackimmo_backend::city_price::FantocciniMarketFetcher;
use trackimmo_backend::config::Config;
use trackimmo_backend::db;
use trackimmo_backend::dpe_api::DpeApiClient;
use trackimmo_backend::email::{EmailSender, SmtpEmailSender};
use trackimmo_backend::orchestrator::Orchestrator;
use trackimmo_backend::scrape::fetcher::FantocciniFetcher;

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    orchestrator: Orchestrator,
    api_key: String,
}

#[derive(Deserialize)]
struct ProcessClientRequest {
    client_id: Uuid,
}

#[derive(Serialize)]
struct ProcessClientResponse {
    success: bool,
    job_id: Option<Uuid>,
    client_id: Uuid,
    message: String,
}

#[derive(Serialize)]
struct ProcessRetryQueueResponse {
    success: bool,
    processed: usize,
    failed: usize,
    message: String,
}

#[derive(Serialize)]
struct JobStatusResponse {
    id: Uuid,
    client_id: Uuid,
    status: String,
    attempt_count: i32,
    last_attempt: Option<chrono::DateTime<chrono::Utc>>,
    next_attempt: Option<chrono::DateTime<chrono::Utc>>,
    error_message: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

fn check_api_key(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false)
}

async fn process_client(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProcessClientRequest>,
) -> Result<Json<ProcessClientResponse>, StatusCode> {
    if !check_api_key(&headers, &state.api_key) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    match state.orchestrator.submit(body.client_id).await {
        Ok(job_id) => Ok(Json(ProcessClientResponse {
            success: true,
            job_id: Some(job_id),
            client_id: body.client_id,
            message: "job submitted".to_string(),
        })),
        Err(e) => Ok(Json(ProcessClientResponse {
            success: false,
            job_id: None,
            client_id: body.client_id,
            message: e.to_string(),
        })),
    }
}

async fn process_retry_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProcessRetryQueueResponse>, StatusCode> {
    if !check_api_key(&headers, &state.api_key) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    match state.orchestrator.drain_retry_queue().await {
        Ok((processed, failed)) => Ok(Json(ProcessRetryQueueResponse {
            success: true,
            processed,
            failed,
            message: "retry queue drained".to_string(),
        })),
        Err(e) => Ok(Json(ProcessRetryQueueResponse {
            success: false,
            processed: 0,
            failed: 0,
            message: e.to_string(),
        })),
    }
}

async fn job_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    if !check_api_key(&headers, &state.api_key) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let job = db::jobs::get(&state.pool, job_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(JobStatusResponse {
        id: job.id,
        client_id: job.client_id,
        status: format!("{:?}", job.status).to_lowercase(),
        attempt_count: job.attempt_count,
        last_attempt: job.last_attempt,
        next_attempt: job.next_attempt,
        error_message: job.error_message,
        created_at: job.created_at,
        updated_at: job.updated_at,
    }))
}

async fn health_check() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::from_env()?);
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    let address_api = Arc::new(AddressApiClient::default_client());
    let dpe_api = Arc::new(DpeApiClient::new(config.dpe_cache_dir.clone()));
    let market_fetcher = Arc::new(FantocciniMarketFetcher::new(config.webdriver_url.clone()));
    let scrape_fetcher = Arc::new(FantocciniFetcher::new(config.webdriver_url.clone(), 10));
    let email: Arc<dyn EmailSender> = Arc::new(SmtpEmailSender::from_config(&config)?);

    let orchestrator = Orchestrator::new(
        pool.clone(),
        address_api,
        dpe_api,
        market_fetcher,
        scrape_fetcher,
        email,
        config.clone(),
    );

    let state = AppState {
        pool,
        orchestrator,
        api_key: config.api_key.clone(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/process-client", post(process_client))
        .route("/process-retry-queue", post(process_retry_queue))
        .route("/job-status/:job_id", get(job_status))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 3001));
    tracing::info!(%addr, "api-server: listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
