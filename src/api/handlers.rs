use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::model::{Block, Transaction};
use crate::store::Store;

const DEFAULT_BLOCKS_LIMIT: u32 = 20;
const MAX_BLOCKS_LIMIT: u32 = 200;

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl From<crate::errors::Error> for ApiError {
    fn from(e: crate::errors::Error) -> Self {
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

#[derive(Deserialize)]
pub struct ListBlocksParams {
    limit: Option<u32>,
}

#[derive(Serialize)]
struct BlockResponse {
    #[serde(flatten)]
    block: Block,
    transaction_hashes: Vec<String>,
}

pub async fn list_blocks<S: Store>(
    State(store): State<Arc<S>>,
    Query(params): Query<ListBlocksParams>,
) -> Result<Json<Vec<Block>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_BLOCKS_LIMIT)
        .min(MAX_BLOCKS_LIMIT);
    let blocks = store.recent_blocks(limit).await?;
    Ok(Json(blocks))
}

pub async fn get_block<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<String>,
) -> Result<Json<BlockResponse>, ApiError> {
    let block = match id.parse::<u64>() {
        Ok(number) => store.block_by_number(number).await?,
        Err(_) => store.block_by_hash(&id).await?,
    };
    let block = block.ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("block {id} not found")))?;
    let transaction_hashes = store.transactions_for_block(&block.hash).await?;
    Ok(Json(BlockResponse {
        block,
        transaction_hashes,
    }))
}

pub async fn get_transaction<S: Store>(
    State(store): State<Arc<S>>,
    Path(hash): Path<String>,
) -> Result<Json<Transaction>, ApiError> {
    let tx = store
        .transaction_by_hash(&hash)
        .await?
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("transaction {hash} not found")))?;
    Ok(Json(tx))
}
