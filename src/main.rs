use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

mod agent_client;
mod command_center;
mod data_store;
mod db;
mod handlers;
mod middleware;
mod models;

use agent_client::HttpAgentClient;
use command_center::orchestrator::CommandCenter;
use command_center::session_store::PgSessionStore;
use data_store::PgDataStore;

/// AppState holds the database pool and the command-center pipeline
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub command_center: Arc<CommandCenter>,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize production-grade logging
    init_logging().expect("Failed to initialize logging");

    // Create the database connection pool
    let db_pool = db::create_pool()
        .await
        .expect("Failed to create database pool.");

    // The agent backend is an external service; without it the command
    // center still serves history, but turns will fail as agent_unavailable
    let agent_url = match std::env::var("AGENT_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::warn!("AGENT_URL not found. Using the local default.");
            tracing::info!("To point at the agent backend, set: AGENT_URL and AGENT_API_KEY");
            "http://localhost:8090".to_string()
        }
    };
    let agent_api_key = std::env::var("AGENT_API_KEY").ok();
    if agent_api_key.is_none() {
        tracing::warn!("AGENT_API_KEY not found. Agent calls will be unauthenticated.");
    }
    let agent = Arc::new(HttpAgentClient::new(agent_url, agent_api_key));

    let sessions = Arc::new(PgSessionStore::new(db_pool.clone()));
    let store = Arc::new(PgDataStore::new(db_pool.clone()));
    let command_center = Arc::new(CommandCenter::new(sessions, agent, store));

    let state = Arc::new(AppState {
        db_pool,
        command_center,
    });

    let app = Router::new()
        .merge(handlers::auth::auth_routes())
        .merge(handlers::command::command_routes())
        .layer(CorsLayer::permissive())
        .layer(Extension(state));

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("🚀 jurisflow command center listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind server address");
    axum::serve(listener, app)
        .await
        .expect("Server error");
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Get log level from environment or default to INFO for production
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,jurisflow=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,jurisflow=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    // JSON logging for production (easier for log aggregation)
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}
