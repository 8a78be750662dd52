//! Read-only HTTP surface over the same Postgres-backed store the
//! pipeline writes to (spec §6). Out of scope for the indexing design
//! itself, but shipped alongside it exactly as original_source ships
//! `cmd/api`.

mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::store::Store;

pub fn router<S: Store + 'static>(store: Arc<S>) -> Router {
    Router::new()
        .route("/blocks", get(handlers::list_blocks::<S>))
        .route("/blocks/{id}", get(handlers::get_block::<S>))
        .route("/transaction/{hash}", get(handlers::get_transaction::<S>))
        .layer(CorsLayer::permissive())
        .with_state(store)
}
