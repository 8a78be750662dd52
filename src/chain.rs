//! Ethereum-compatible JSON-RPC client, per spec §6: `eth_blockNumber`,
//! `eth_getBlockByNumber` (full and headers-only), batched
//! `eth_getTransactionReceipt`, and transaction sender recovery.
//!
//! Grounded on the `alloy` provider stack used across the retrieval pack's
//! reth-family repos and the standalone indexer examples
//! (`other_examples/..atlas-indexer..`, `..untron-intents..`).

use async_trait::async_trait;

use crate::errors::Error;
#[cfg(not(test))]
use crate::metrics;
use crate::model::{Transaction, TransactionLog};

/// Just enough of a block header to compare against a persisted
/// `(number, hash)` row (validator's reorg check).
#[derive(Debug, Clone)]
pub struct ChainHeader {
    pub number: u64,
    pub hash: String,
}

/// A full block with its (sender-resolved) transactions.
#[derive(Debug, Clone)]
pub struct ChainBlock {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_blockNumber`.
    async fn block_number(&self) -> Result<u64, Error>;

    /// `eth_getBlockByNumber(number, full=true)`, with each transaction's
    /// sender resolved.
    async fn block_by_number(&self, number: u64) -> Result<ChainBlock, Error>;

    /// Batched `eth_getBlockByNumber(n, full=false)` for each of
    /// `numbers`, in the same order. `None` at an index means the node
    /// has no block at that height (should not happen for already-
    /// persisted heights, but defensive).
    async fn header_by_numbers(&self, numbers: &[u64]) -> Result<Vec<Option<ChainHeader>>, Error>;

    /// Batched `eth_getTransactionReceipt` for each of `hashes`, in the
    /// same order. A per-item failure is reported as `Err` at that index
    /// without failing the whole call.
    async fn transaction_receipts(
        &self,
        hashes: &[String],
    ) -> Result<Vec<Result<Vec<TransactionLog>, Error>>, Error>;
}

#[cfg(not(test))]
pub use production::AlloyChainClient;

#[cfg(not(test))]
mod production {
    use super::*;
    use alloy::consensus::Transaction as _;
    use alloy::eips::BlockNumberOrTag;
    use alloy::network::Ethereum;
    use alloy::primitives::{TxHash, U256};
    use alloy::providers::{Provider, ProviderBuilder, RootProvider};
    use alloy::rpc::types::{Block, BlockTransactionsKind};
    use alloy::transports::http::{Client as HttpClient, Http};

    type HttpProvider = RootProvider<Http<HttpClient>, Ethereum>;

    pub struct AlloyChainClient {
        provider: HttpProvider,
    }

    impl AlloyChainClient {
        pub fn new(rpc_url: &str) -> Result<Self, Error> {
            let url = rpc_url
                .parse()
                .map_err(|e| Error::rpc(format!("invalid rpc url {rpc_url}: {e}")))?;
            let provider = ProviderBuilder::new().on_http(url);
            Ok(Self { provider })
        }

        fn value_to_decimal_string(value: U256) -> String {
            value.to_string()
        }

        fn block_to_chain_block(block: Block) -> Result<ChainBlock, Error> {
            let header = &block.header;
            let number = header.number;
            let hash = format!("{:?}", header.hash);
            let parent_hash = format!("{:?}", header.parent_hash);
            let timestamp = header.timestamp;

            let mut transactions = Vec::new();
            if let Some(txs) = block.transactions.as_transactions() {
                for (index, tx) in txs.iter().enumerate() {
                    let inner = &tx.inner;
                    let to = inner.to().map(|addr| format!("{addr:?}"));
                    transactions.push(Transaction {
                        index: index as u64,
                        hash: format!("{:?}", inner.tx_hash()),
                        from: format!("{:?}", tx.from),
                        to,
                        nonce: inner.nonce(),
                        data: format!("0x{}", hex::encode(inner.input())),
                        value: Self::value_to_decimal_string(inner.value()),
                        logs: Vec::new(),
                        block_hash: hash.clone(),
                        block_number: number,
                    });
                }
            }

            Ok(ChainBlock {
                number,
                hash,
                parent_hash,
                timestamp,
                transactions,
            })
        }
    }

    #[async_trait]
    impl ChainClient for AlloyChainClient {
        async fn block_number(&self) -> Result<u64, Error> {
            let _timer = metrics::RPC_CALL_DURATION
                .with_label_values(&["eth_blockNumber"])
                .start_timer();
            self.provider.get_block_number().await.map_err(Error::rpc)
        }

        async fn block_by_number(&self, number: u64) -> Result<ChainBlock, Error> {
            let _timer = metrics::RPC_CALL_DURATION
                .with_label_values(&["eth_getBlockByNumber"])
                .start_timer();
            let block = self
                .provider
                .get_block_by_number(
                    BlockNumberOrTag::Number(number),
                    BlockTransactionsKind::Full,
                )
                .await
                .map_err(Error::rpc)?
                .ok_or_else(|| Error::rpc(format!("block {number} not found")))?;
            Self::block_to_chain_block(block)
        }

        async fn header_by_numbers(
            &self,
            numbers: &[u64],
        ) -> Result<Vec<Option<ChainHeader>>, Error> {
            let _timer = metrics::RPC_CALL_DURATION
                .with_label_values(&["eth_getBlockByNumber_batch"])
                .start_timer();
            let client = self.provider.client();
            let mut batch = client.new_batch();
            let mut waiters = Vec::with_capacity(numbers.len());
            for &n in numbers {
                let waiter = batch
                    .add_call::<_, Option<Block>>(
                        "eth_getBlockByNumber",
                        &(BlockNumberOrTag::Number(n), false),
                    )
                    .map_err(Error::rpc)?;
                waiters.push(waiter);
            }
            batch.send().await.map_err(Error::rpc)?;

            let mut out = Vec::with_capacity(numbers.len());
            for waiter in waiters {
                let block: Option<Block> = waiter.await.map_err(Error::rpc)?;
                out.push(block.map(|b| ChainHeader {
                    number: b.header.number,
                    hash: format!("{:?}", b.header.hash),
                }));
            }
            Ok(out)
        }

        async fn transaction_receipts(
            &self,
            hashes: &[String],
        ) -> Result<Vec<Result<Vec<TransactionLog>, Error>>, Error> {
            let _timer = metrics::RPC_CALL_DURATION
                .with_label_values(&["eth_getTransactionReceipt_batch"])
                .start_timer();
            let client = self.provider.client();
            let mut batch = client.new_batch();
            let mut waiters = Vec::with_capacity(hashes.len());
            for h in hashes {
                let tx_hash: TxHash = h
                    .parse()
                    .map_err(|e| Error::rpc(format!("invalid tx hash {h}: {e}")))?;
                let waiter = batch
                    .add_call::<_, Option<alloy::rpc::types::TransactionReceipt>>(
                        "eth_getTransactionReceipt",
                        &(tx_hash,),
                    )
                    .map_err(Error::rpc)?;
                waiters.push(waiter);
            }
            batch.send().await.map_err(Error::rpc)?;

            let mut out = Vec::with_capacity(hashes.len());
            for (h, waiter) in hashes.iter().zip(waiters) {
                let result = match waiter.await {
                    Ok(Some(receipt)) => {
                        let logs = receipt
                            .inner
                            .logs()
                            .iter()
                            .enumerate()
                            .map(|(i, log)| TransactionLog {
                                index: log.log_index.unwrap_or(i as u64) as u32,
                                data: format!("0x{}", hex::encode(log.data().data.as_ref())),
                            })
                            .collect();
                        Ok(logs)
                    }
                    Ok(None) => Err(Error::rpc(format!("no receipt for {h}"))),
                    Err(e) => Err(Error::rpc(e)),
                };
                out.push(result);
            }
            Ok(out)
        }
    }
}
