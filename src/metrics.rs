//! Prometheus metrics, scoped to this pipeline's own signals rather than
//! the teacher's UTXO/address-enrichment catalog (no counterpart here).
//! Same shape as the teacher's `metrics.rs`: one registry, lazily
//! constructed counters/gauges/histograms, exposed over `/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

lazy_static! {
    pub static ref BLOCKS_PROCESSED: IntCounterVec = register_int_counter_vec!(
        "chainpipe_blocks_processed_total",
        "Blocks persisted, by stage",
        &["stage"]
    )
    .unwrap();
    pub static ref TRANSACTIONS_PROCESSED: IntCounterVec = register_int_counter_vec!(
        "chainpipe_transactions_processed_total",
        "Transactions persisted, by stage",
        &["stage"]
    )
    .unwrap();
    pub static ref CHECKPOINT_HEIGHT: IntGaugeVec = register_int_gauge_vec!(
        "chainpipe_checkpoint_height",
        "Last height written to the scanner checkpoint",
        &["service"]
    )
    .unwrap();
    pub static ref REORGS_DETECTED: IntCounterVec = register_int_counter_vec!(
        "chainpipe_reorgs_detected_total",
        "Unfinalized blocks found to be uncled by the validator",
        &["service"]
    )
    .unwrap();
    pub static ref QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        "chainpipe_queue_depth",
        "In-flight jobs queued in a worker pool",
        &["stage"]
    )
    .unwrap();
    pub static ref RPC_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "chainpipe_rpc_call_duration_seconds",
        "Ethereum JSON-RPC call latency",
        &["method"]
    )
    .unwrap();
    pub static ref STORE_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "chainpipe_store_call_duration_seconds",
        "Postgres call latency",
        &["operation"]
    )
    .unwrap();
    pub static ref ACKS: IntCounterVec = register_int_counter_vec!(
        "chainpipe_stream_acks_total",
        "Stream messages acknowledged, by stream and outcome",
        &["stream", "outcome"]
    )
    .unwrap();
}

/// Renders the default registry in the Prometheus exposition format.
pub fn gather() -> Vec<u8> {
    let metric_families = prometheus::gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).ok();
    buffer
}
