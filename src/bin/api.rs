use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use chainpipe::config;
use chainpipe::metrics;
use chainpipe::store::PgStore;
use chainpipe::telemetry::{self, TelemetryConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let _guard = telemetry::init_tracing(TelemetryConfig {
        service: "api",
        json: false,
        log_dir: None,
    });

    let settings = config::global();

    let store = match PgStore::connect(&settings.postgres_url()).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to connect to postgres");
            std::process::exit(1);
        }
    };
    if let Err(e) = store.migrate().await {
        error!(error = %e, "failed to run schema migration");
        std::process::exit(1);
    }
    let store = Arc::new(store);

    let app = chainpipe::api::router(store).route("/metrics", get(metrics_handler));

    let addr = format!("0.0.0.0:{}", settings.api_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr, "failed to bind api listener");
            std::process::exit(1);
        }
    };

    info!(addr, "api listening");

    let shutdown = async {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, closing api listener");
    };

    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "api server exited with error");
        std::process::exit(1);
    }
}

async fn metrics_handler() -> Vec<u8> {
    metrics::gather()
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
