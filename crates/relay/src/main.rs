mod config;
mod dispatch;
mod heartbeat;
mod registry;
mod ws;

use anyhow::Context;
use axum::{http::StatusCode, routing::get, Router};
use config::RelayConfig;
use registry::Registry;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let registry = Registry::new(config.session_grace);
    heartbeat::spawn_pinger(registry.clone(), config.ping_interval);

    let app = build_router(registry, config.pong_timeout);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(
        listen_addr = %config.listen_addr,
        ping_interval_secs = config.ping_interval.as_secs(),
        session_grace_secs = config.session_grace.as_secs(),
        "starting scrimlink relay"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited unexpectedly")
}

fn build_router(registry: Registry, pong_timeout: Duration) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .merge(ws::router(registry, pong_timeout))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::{build_router, Registry};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = build_router(Registry::new(Duration::from_secs(120)), Duration::from_secs(75));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        assert_eq!(&body[..], &b"ok"[..]);
    }

    #[tokio::test]
    async fn websocket_route_rejects_plain_http() {
        let app = build_router(Registry::new(Duration::from_secs(120)), Duration::from_secs(75));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .body(Body::empty())
                    .expect("ws request should build"),
            )
            .await
            .expect("ws request should return a response");

        // Without an Upgrade handshake the route refuses the request.
        assert_ne!(response.status(), StatusCode::OK);
    }
}
