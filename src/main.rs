use axum::extract::FromRef;

mod app;
mod assessments;
mod auth;
mod clock;
mod config;
mod db;
mod error;
mod extract;
mod state;
mod users;

use crate::{auth::services::AuthService, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "disaster_intake=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let state = AppState::init().await?;

    if let Some(admin) = state.config.bootstrap_admin.clone() {
        AuthService::from_ref(&state)
            .ensure_bootstrap_admin(&admin)
            .await
            .map_err(|e| anyhow::anyhow!("bootstrap administrator: {e}"))?;
    } else {
        tracing::warn!("BOOTSTRAP_ADMIN_EMAIL/BOOTSTRAP_ADMIN_PASSWORD not set; no administrator is created");
    }

    app::serve(app::build_app(state)).await
}
