use std::net::SocketAddr;
use std::sync::Arc;

use autoapply_control::auth;
use autoapply_control::poller::AutomationPoller;
use autoapply_control::request_meta::RequestMeta;
use autoapply_control::rpc;
use autoapply_control::security::{self, OriginPolicy};
use autoapply_control::state::AppState;
use autoapply_engine::{Engine, EngineConfig};
use autoapply_migration::MigratorTrait;
use axum::extract::State;
use axum::middleware;
use axum::{Json, Router, http::StatusCode, routing::get};
use sea_orm::ConnectionTrait;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    read_only: bool,
    db_ok: bool,
    db_error: Option<String>,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthzResponse>) {
    let db = state.engine.db();
    let ping = db
        .execute(sea_orm::Statement::from_string(
            db.get_database_backend(),
            "SELECT 1".to_string(),
        ))
        .await;
    let (code, db_ok, db_error) = match ping {
        Ok(_) => (StatusCode::OK, true, None),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, false, Some(e.to_string())),
    };

    (
        code,
        Json(HealthzResponse {
            status: if db_ok { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            read_only: std::env::var("AUTOAPPLY_READ_ONLY").is_ok_and(|v| {
                matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            }),
            db_ok,
            db_error,
        }),
    )
}

async fn init_db_and_migrate() -> anyhow::Result<AppState> {
    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?;
    let db = autoapply_db::connect(&database_url).await?;

    // Apply migrations on boot (idempotent).
    autoapply_migration::Migrator::up(&db, None).await?;

    let config = EngineConfig::from_env();
    tracing::info!(
        max_automations_per_user = config.max_automations_per_user,
        max_daily_limit = config.max_daily_limit,
        serialize_runs = config.serialize_runs,
        "engine configured"
    );

    Ok(AppState {
        engine: Engine::new(Arc::new(db), config),
    })
}

fn listen_addr() -> anyhow::Result<SocketAddr> {
    let raw = std::env::var("AUTOAPPLY_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid AUTOAPPLY_LISTEN_ADDR {raw:?}: {e}"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let state = init_db_and_migrate().await?;

    if let Some(poller) = AutomationPoller::from_env(state.engine.clone()) {
        poller.spawn();
    }

    let router = rpc::router();
    let (procedures, _types) = router
        .build()
        .map_err(|errs| anyhow::anyhow!("rspc build failed: {errs:?}"))?;

    // Protect /rspc procedures with the access cookie; ping stays public.
    let rspc_router = rspc_axum::endpoint(
        procedures,
        |axum::extract::State(state): axum::extract::State<AppState>,
         axum::extract::Extension(meta): axum::extract::Extension<RequestMeta>,
         user: Option<axum::Extension<rpc::AuthUser>>| {
            rpc::Ctx {
                engine: state.engine.clone(),
                user: user.map(|axum::Extension(u)| u),
                request_id: meta.request_id,
            }
        },
    )
    .layer(middleware::from_fn(security::rspc_auth_guard))
    .layer(middleware::from_fn_with_state(
        Arc::new(OriginPolicy::from_env()),
        security::csrf_and_origin,
    ));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/whoami", get(auth::whoami))
        .nest("/rspc", rspc_router)
        .layer(middleware::from_fn(security::request_id))
        .with_state(state);

    let addr = listen_addr()?;
    tracing::info!(%addr, "autoapply-control HTTP listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
