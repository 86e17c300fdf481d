//! Bundle Engine - HTTP host for the bundle pricing & lifecycle engine

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use bundle_engine::catalog::PgCatalog;
use bundle_engine::engine::{PromoDecision, ReservationOutcome};
use bundle_engine::service::{
    BundleList, BundleService, BundleView, CreateBundleRequest, DeleteResult, EventPublisher,
    ListBundlesQuery, PromoCheckRequest, ReserveRequest, UpdateBundleRequest, UpdateConfigRequest,
};
use bundle_engine::store::BundleStore;
use bundle_engine::{BundleConfig, EngineError};

#[derive(Clone)]
struct AppState {
    service: Arc<BundleService>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&std::env::var("DATABASE_URL")?)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match std::env::var("NATS_URL") {
        Ok(url) => async_nats::connect(&url).await.ok(),
        Err(_) => None,
    };

    let service = Arc::new(BundleService::new(
        BundleStore::new(db.clone()),
        Arc::new(PgCatalog::new(db)),
        EventPublisher::new(nats),
    ));
    let state = AppState { service };

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "bundle-engine"})) }))
        .route("/api/v1/bundles", get(list_bundles).post(create_bundle))
        .route("/api/v1/bundles/:id", get(get_bundle).put(update_bundle).delete(delete_bundle))
        .route("/api/v1/bundles/:id/publish", post(publish_bundle))
        .route("/api/v1/bundles/:id/restore", post(restore_bundle))
        .route("/api/v1/bundles/:id/archive", post(archive_bundle))
        .route("/api/v1/bundles/:id/reserve", post(reserve))
        .route("/api/v1/bundles/:id/release", post(release))
        .route("/api/v1/bundles/:id/promo-check", post(promo_check))
        .route("/api/v1/bundle-config", get(get_config).put(update_config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8084".to_string());
    tracing::info!("bundle-engine listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, String)>;

fn http_error(e: EngineError) -> (StatusCode, String) {
    let status = match &e {
        EngineError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::BundleNotFound | EngineError::VariantNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::StateTransition { .. } | EngineError::ConcurrencyConflict => StatusCode::CONFLICT,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

async fn list_bundles(State(s): State<AppState>, Query(q): Query<ListBundlesQuery>) -> ApiResult<BundleList> {
    s.service.list_bundles(q).await.map(Json).map_err(http_error)
}

async fn create_bundle(State(s): State<AppState>, Json(r): Json<CreateBundleRequest>) -> std::result::Result<(StatusCode, Json<BundleView>), (StatusCode, String)> {
    let view = s.service.create_bundle(r).await.map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_bundle(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<BundleView> {
    s.service.get_bundle(id).await.map(Json).map_err(http_error)
}

async fn update_bundle(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<UpdateBundleRequest>) -> ApiResult<BundleView> {
    s.service.update_bundle(id, r).await.map(Json).map_err(http_error)
}

async fn delete_bundle(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<DeleteResult> {
    s.service.delete_bundle(id).await.map(Json).map_err(http_error)
}

async fn publish_bundle(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<BundleView> {
    s.service.publish_bundle(id).await.map(Json).map_err(http_error)
}

async fn restore_bundle(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<BundleView> {
    s.service.restore_bundle(id).await.map(Json).map_err(http_error)
}

#[derive(Debug, Deserialize)]
struct ArchiveRequest {
    reason: Option<String>,
}

async fn archive_bundle(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ArchiveRequest>) -> ApiResult<BundleView> {
    let reason = r.reason.unwrap_or_else(|| "archived by administrator".to_string());
    s.service.archive_bundle(id, reason).await.map(Json).map_err(http_error)
}

async fn reserve(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ReserveRequest>) -> ApiResult<ReservationOutcome> {
    s.service.reserve(id, r).await.map(Json).map_err(http_error)
}

async fn release(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ReserveRequest>) -> ApiResult<ReservationOutcome> {
    s.service.release(id, r).await.map(Json).map_err(http_error)
}

async fn promo_check(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<PromoCheckRequest>) -> ApiResult<PromoDecision> {
    s.service.decide_promo(id, r).await.map(Json).map_err(http_error)
}

async fn get_config(State(s): State<AppState>) -> ApiResult<BundleConfig> {
    s.service.get_config().await.map(Json).map_err(http_error)
}

async fn update_config(State(s): State<AppState>, Json(r): Json<UpdateConfigRequest>) -> ApiResult<BundleConfig> {
    s.service.update_config(r).await.map(Json).map_err(http_error)
}
