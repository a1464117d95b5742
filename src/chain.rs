// Ledger access over JSON-RPC using ethers-rs.
// No retries happen here: every failure goes back to the caller.

use crate::error::{OracleError, Result, Step};
use async_trait::async_trait;
use ethers::providers::{Http, JsonRpcClient, Middleware, Provider};
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: H256,
    /// 1 on success, 0 on revert.
    pub status: u64,
    pub gas_used: U256,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

/// The RPC primitives the oracle needs.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn block_number(&self) -> Result<u64>;

    async fn balance(&self, address: Address) -> Result<U256>;

    async fn gas_price(&self) -> Result<U256>;

    /// Transaction count at the latest block.
    async fn nonce(&self, address: Address) -> Result<U256>;

    /// Read-only `eth_call`.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256>;

    /// Poll until the transaction is mined or `timeout` elapses.
    async fn wait_for_receipt(&self, tx_hash: H256, timeout: Duration) -> Result<Receipt> {
        self.wait_for_any_receipt(&[tx_hash], timeout).await
    }

    /// Poll several transactions sharing a nonce until one of them is mined.
    /// Hashes are checked in order each round; the timeout error carries the last one.
    async fn wait_for_any_receipt(&self, tx_hashes: &[H256], timeout: Duration) -> Result<Receipt>;

    /// One-shot receipt lookup.
    async fn receipt(&self, tx_hash: H256) -> Result<Option<Receipt>>;
}

/// Ethereum RPC client for the oracle's network
pub struct RpcChainClient<P = Http> {
    provider: Provider<P>,
    chain_id: u64,
    poll_interval: Duration,
}

impl RpcChainClient<Http> {
    /// Connect and make sure the endpoint answers with a block height.
    pub async fn connect(rpc_url: &str, poll_interval: Duration) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| OracleError::Connection(format!("invalid RPC endpoint: {}", e)))?;
        Self::from_provider(provider, poll_interval).await
    }
}

impl<P: JsonRpcClient + 'static> RpcChainClient<P> {
    pub async fn from_provider(provider: Provider<P>, poll_interval: Duration) -> Result<Self> {
        let block = provider
            .get_block_number()
            .await
            .map_err(|e| OracleError::Connection(format!("no block height from endpoint: {}", e)))?;

        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| OracleError::Connection(format!("failed to read chain id: {}", e)))?
            .as_u64();

        info!(block = block.as_u64(), chain_id, "Connected to RPC endpoint");

        Ok(Self {
            provider,
            chain_id,
            poll_interval,
        })
    }

    fn to_receipt(receipt: ethers::types::TransactionReceipt) -> Receipt {
        Receipt {
            tx_hash: receipt.transaction_hash,
            status: receipt.status.map(|s| s.as_u64()).unwrap_or(0),
            gas_used: receipt.gas_used.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl<P: JsonRpcClient + 'static> ChainClient for RpcChainClient<P> {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| OracleError::Connection(e.to_string()))
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        self.provider
            .get_balance(address, None)
            .await
            .map_err(|e| OracleError::chain_call(Step::Scan, e))
    }

    async fn gas_price(&self) -> Result<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| OracleError::chain_call(Step::GasPrice, e))
    }

    async fn nonce(&self, address: Address) -> Result<U256> {
        self.provider
            .get_transaction_count(address, None)
            .await
            .map_err(|e| OracleError::chain_call(Step::Nonce, e))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx = TransactionRequest::new().to(to).data(data);
        self.provider
            .call(&tx.into(), None)
            .await
            .map_err(|e| OracleError::chain_call(Step::Scan, e))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| OracleError::chain_call(Step::Submit, e))?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_any_receipt(&self, tx_hashes: &[H256], timeout: Duration) -> Result<Receipt> {
        let tx_hash = tx_hashes.last().copied().unwrap_or_default();
        let started = Instant::now();
        loop {
            for hash in tx_hashes {
                if let Some(receipt) = self.receipt(*hash).await? {
                    return Ok(receipt);
                }
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(OracleError::TransactionTimeout { tx_hash, waited });
            }
            debug!(tx_hash = ?tx_hash, waited_secs = waited.as_secs(), "Receipt not available yet");
            sleep(self.poll_interval.min(timeout - waited)).await;
        }
    }

    async fn receipt(&self, tx_hash: H256) -> Result<Option<Receipt>> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map(|r| r.map(Self::to_receipt))
            .map_err(|e| OracleError::chain_call(Step::Confirm, e))
    }
}
