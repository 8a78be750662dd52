use std::sync::Arc;
use std::time::Duration;

use chainpipe::chain::AlloyChainClient;
use chainpipe::config;
use chainpipe::redis_stream::{RedisCheckpoint, RedisStream, RedisStreamConfig};
use chainpipe::scanner::Scanner;
use chainpipe::telemetry::{self, TelemetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let _guard = telemetry::init_tracing(TelemetryConfig {
        service: "scanner",
        json: false,
        log_dir: None,
    });

    let settings = config::global();

    let client = match redis::Client::open(format!("redis://{}/{}", settings.redis_address, settings.redis_db)) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build redis client");
            std::process::exit(1);
        }
    };
    let conn = match client.get_connection_manager().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to connect to redis");
            std::process::exit(1);
        }
    };

    let stream = match RedisStream::new(RedisStreamConfig {
        client: conn.clone(),
        stream_name: settings.block_stream_name.clone(),
        group: None,
    })
    .await
    {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to initialize blocks stream producer");
            std::process::exit(1);
        }
    };

    let checkpoint = Arc::new(RedisCheckpoint::new(conn, "latest_block_number"));

    let chain = match AlloyChainClient::new(&settings.ethereum_rpc_url) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to initialize ethereum rpc client");
            std::process::exit(1);
        }
    };

    let scanner = Scanner::new(
        chain,
        stream,
        checkpoint,
        settings.scanner_start_block_number,
        settings.block_reorg_check_count as u64,
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining scanner");
        shutdown.cancel();
    });

    if let Err(e) = scanner
        .run(
            cancel,
            Duration::from_secs(settings.scanner_watch_interval_seconds),
        )
        .await
    {
        error!(error = %e, "scanner exited with error");
        std::process::exit(1);
    }
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
