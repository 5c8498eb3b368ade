use std::sync::Arc;

use axum::middleware;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod auth;
mod cors;
mod error;
mod state;
mod storage;

use crate::cors::CorsPolicy;
use crate::state::AppState;

fn database_url() -> String {
    std::env::var("LARKMAIL_DATABASE_URL")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "postgres://localhost/larkmail".to_string())
}

fn listen_addr() -> String {
    std::env::var("LARKMAIL_LISTEN_ADDR")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "127.0.0.1:8080".to_string())
}

fn allowed_origins() -> Vec<String> {
    std::env::var("LARKMAIL_ALLOWED_ORIGINS")
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_else(|| vec!["http://localhost:3000".to_string()])
}

fn parent_domains() -> Vec<String> {
    std::env::var("LARKMAIL_PARENT_DOMAINS")
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_else(|| vec!["larkmail.app".to_string()])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&database_url())
        .await?;
    storage::ensure_schema(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("schema bootstrap failed: {e}"))?;

    let state = Arc::new(AppState {
        pool,
        cors: CorsPolicy::new(allowed_origins(), parent_domains()),
    });

    let app = api::router()
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            cors::origin_gate,
        ))
        .with_state(state);

    let addr = listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("larkmail-server listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}
