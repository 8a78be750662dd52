use std::sync::Arc;
use std::time::Duration;

use chainpipe::chain::AlloyChainClient;
use chainpipe::config;
use chainpipe::redis_stream::{RedisStream, RedisStreamConfig};
use chainpipe::store::PgStore;
use chainpipe::telemetry::{self, TelemetryConfig};
use chainpipe::validator::Validator;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let _guard = telemetry::init_tracing(TelemetryConfig {
        service: "validator",
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

    let redis_client =
        match redis::Client::open(format!("redis://{}/{}", settings.redis_address, settings.redis_db)) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to build redis client");
                std::process::exit(1);
            }
        };
    let producer_conn = redis_client.get_connection_manager().await.unwrap_or_else(|e| {
        error!(error = %e, "failed to connect to redis");
        std::process::exit(1);
    });

    let blocks_producer = RedisStream::new(RedisStreamConfig {
        client: producer_conn,
        stream_name: settings.block_stream_name.clone(),
        group: None,
    })
    .await
    .unwrap_or_else(|e| {
        error!(error = %e, "failed to initialize blocks stream producer");
        std::process::exit(1);
    });

    let chain = match AlloyChainClient::new(&settings.ethereum_rpc_url) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to initialize ethereum rpc client");
            std::process::exit(1);
        }
    };

    let validator = Validator::new(
        chain,
        store,
        Arc::new(blocks_producer),
        settings.block_reorg_check_count,
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, finishing current validator iteration");
        shutdown.cancel();
    });

    if let Err(e) = validator
        .run(
            cancel,
            Duration::from_secs(settings.validator_watch_interval_seconds),
        )
        .await
    {
        error!(error = %e, "validator exited with error");
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
