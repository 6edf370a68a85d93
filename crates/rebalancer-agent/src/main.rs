//! Rebalancer Agent - Kubernetes Descheduler Service
//!
//! This is the main entry point for the descheduling agent.
//! It evicts pods that violate inter-pod affinity and provides health endpoints.
//!
//! # HTTP Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check, ready once a cycle has completed

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use rebalancer_agent::{AgentConfig, Descheduler, KubeCluster, Policy};
use rebalancer_evictions::KubeEvictionClient;
use rebalancer_framework::Registry;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    descheduler: Arc<Descheduler<KubeCluster>>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "rebalancer-agent",
    })
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.descheduler.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rebalancer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Rebalancer Agent");

    let config = AgentConfig::from_env();
    let policy = Policy::load(config.policy_file.as_deref())?;

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        dry_run = config.dry_run,
        node_selector = ?config.node_selector,
        limits = ?config.limits,
        strategies = policy.strategies.len(),
        "Loaded agent configuration"
    );

    let client = kube::Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let listen_addr = config.listen_addr;
    let descheduler = Arc::new(Descheduler::new(
        KubeCluster::new(client.clone(), config.node_selector.clone())?,
        Arc::new(KubeEvictionClient::new(client)),
        Registry::default(),
        policy,
        config,
    )?);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                signal_token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    // Start server
    let app = create_router(AppState {
        descheduler: Arc::clone(&descheduler),
    });
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    let server_token = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_token.cancelled().await })
            .await
    });

    let result = descheduler.run(shutdown.clone()).await;
    shutdown.cancel();
    server.await??;

    result?;
    tracing::info!("Rebalancer Agent stopped");
    Ok(())
}
