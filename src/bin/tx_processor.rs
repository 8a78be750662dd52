use std::sync::Arc;

use chainpipe::chain::AlloyChainClient;
use chainpipe::config;
use chainpipe::redis_stream::{RedisStream, RedisStreamConfig};
use chainpipe::store::PgStore;
use chainpipe::telemetry::{self, TelemetryConfig};
use chainpipe::tx_processor::TxProcessor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let _guard = telemetry::init_tracing(TelemetryConfig {
        service: "tx-processor",
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
    let consumer_conn = redis_client.get_connection_manager().await.unwrap_or_else(|e| {
        error!(error = %e, "failed to connect to redis");
        std::process::exit(1);
    });

    let consumer_name = format!("tx-processor-{}", std::process::id());
    let txs_consumer = RedisStream::new(RedisStreamConfig {
        client: consumer_conn,
        stream_name: settings.transaction_stream_name.clone(),
        group: Some((
            settings.transaction_processor_consumer_group.clone(),
            consumer_name,
        )),
    })
    .await
    .unwrap_or_else(|e| {
        error!(error = %e, "failed to register transactions consumer group");
        std::process::exit(1);
    });

    let chain = match AlloyChainClient::new(&settings.ethereum_rpc_url) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to initialize ethereum rpc client");
            std::process::exit(1);
        }
    };

    let processor = Arc::new(TxProcessor::new(
        chain,
        store,
        Arc::new(txs_consumer),
        settings.transaction_processor_concurrent_count,
    ));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining tx processor");
        shutdown.cancel();
    });

    if let Err(e) = processor
        .run(
            cancel,
            settings.transaction_processor_batch_transaction_count,
        )
        .await
    {
        error!(error = %e, "tx processor exited with error");
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
