// Copyright 2023 TikBridge
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # EVM Client
//!
//! The facade over the target chain: pending-state nonce/balance reads, a
//! TTL-cached gas price, read-only contract calls, legacy transaction
//! submission and bounded receipt polling that refreshes the caller's
//! leases between attempts.

use std::time::Duration;

use ethers::abi::{ParamType, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockId, BlockNumber, Bytes, TransactionReceipt,
    TransactionRequest, H256, U256, U64,
};
use tkm_relayer_utils::{Error, Expirable, Keepalive, Result};
use tokio_util::sync::CancellationToken;

/// Per-call budget for target RPC requests.
pub const REQ_TIMEOUT: Duration = Duration::from_secs(5);

/// Gas limit used for contract calls and update transactions.
pub const DEFAULT_GAS: u64 = 10_000_000;

/// Receipt poll budget for a single transaction.
pub const RECEIPT_RETRIES: usize = 5;

/// Receipt poll budget for a transaction batch.
pub const BATCH_RECEIPT_RETRIES: usize = 12;

fn pending() -> Option<BlockId> {
    Some(BlockNumber::Pending.into())
}

/// Client of one target EVM chain.
#[derive(Debug)]
pub struct EvmClient {
    provider: Provider<Http>,
    chain_id: U256,
    is_tkm: bool,
    gas_price: Expirable<U256>,
    retry_interval: Duration,
}

impl EvmClient {
    /// Dials `endpoint`, reads the chain id (generous timeout, some chains
    /// answer slowly on the first call) and compares it against the
    /// expectation when one is configured.
    pub async fn connect(
        endpoint: &str,
        expected_chain_id: Option<U256>,
        gas_price_ttl: Duration,
        retry_interval: Duration,
        is_tkm: bool,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(endpoint).map_err(|e| {
            Error::Target(format!("connect TARGET@{endpoint} failed: {e}"))
        })?;
        let chain_id =
            tokio::time::timeout(REQ_TIMEOUT * 6, provider.get_chainid())
                .await??;
        if let Some(expected) = expected_chain_id {
            if expected != chain_id {
                return Err(Error::Target(format!(
                    "chain id not match, want:{expected} got:{chain_id}"
                )));
            }
        }
        tracing::info!(
            "TARGET@EthClient({endpoint}) ChainID:{chain_id} connected"
        );
        if is_tkm {
            tracing::info!("TARGET is a TKM chain");
        }
        Ok(Self {
            provider,
            chain_id,
            is_tkm,
            gas_price: Expirable::new(
                U256::zero(),
                gas_price_ttl.as_millis() as i64,
                0,
            ),
            retry_interval,
        })
    }

    /// The chain id reported by the node.
    pub fn chain_id(&self) -> U256 {
        self.chain_id
    }

    /// Whether the target is itself a TKM chain.
    pub fn is_tkm(&self) -> bool {
        self.is_tkm
    }

    /// Pending balance of `addr`.
    pub async fn balance(&self, addr: Address) -> Result<U256> {
        Ok(tokio::time::timeout(
            REQ_TIMEOUT,
            self.provider.get_balance(addr, pending()),
        )
        .await??)
    }

    /// Pending nonce of `addr`.
    pub async fn nonce(&self, addr: Address) -> Result<u64> {
        let n = tokio::time::timeout(
            REQ_TIMEOUT,
            self.provider.get_transaction_count(addr, pending()),
        )
        .await??;
        Ok(n.as_u64())
    }

    /// Pending nonce of `addr`, after asserting that the balance exceeds
    /// `must_have` when balance checking is enabled.
    pub async fn nonce_with_min_balance(
        &self,
        addr: Address,
        check_balance: bool,
        must_have: Option<U256>,
    ) -> Result<u64> {
        if check_balance {
            let balance = self.balance(addr).await?;
            let level = must_have.unwrap_or_default();
            if balance <= level {
                return Err(Error::Target(format!(
                    "balance of {addr:?} is less than {level}"
                )));
            }
        }
        self.nonce(addr).await
    }

    /// Deployed code at `addr` (pending state).
    pub async fn code_at(&self, addr: Address) -> Result<Bytes> {
        Ok(tokio::time::timeout(
            REQ_TIMEOUT,
            self.provider.get_code(addr, pending()),
        )
        .await??)
    }

    /// The suggested gas price, cached for the configured TTL.
    pub async fn suggest_gas_price(&self) -> Result<U256> {
        let (cached, fresh) = self.gas_price.get();
        if fresh {
            return Ok(cached);
        }
        let gp =
            tokio::time::timeout(REQ_TIMEOUT, self.provider.get_gas_price())
                .await??;
        self.gas_price.update(gp);
        tracing::debug!("suggest GasPrice={gp} get and cached");
        Ok(gp)
    }

    /// The gas limit for an update tx and the balance a sender must hold to
    /// pay for it; `None` when the node gave no usable gas price.
    pub async fn suggest_balance(&self) -> (u64, Option<U256>) {
        match self.suggest_gas_price().await {
            Ok(gp) if !gp.is_zero() => {
                (DEFAULT_GAS, Some(gp * U256::from(DEFAULT_GAS)))
            }
            _ => (DEFAULT_GAS, None),
        }
    }

    /// Read-only contract call against pending state.
    pub async fn call(
        &self,
        from: Address,
        to: Address,
        gas: u64,
        data: Vec<u8>,
    ) -> Result<Bytes> {
        let tx = TransactionRequest::new()
            .from(from)
            .to(to)
            .gas(gas)
            .data(data);
        let typed: TypedTransaction = tx.into();
        Ok(tokio::time::timeout(
            REQ_TIMEOUT,
            self.provider.call(&typed, pending()),
        )
        .await??)
    }

    /// Calls `to` with pre-encoded input and decodes the return data into
    /// the given types.
    pub async fn getter(
        &self,
        from: Address,
        to: Address,
        data: Vec<u8>,
        output: &[ParamType],
    ) -> Result<Vec<Token>> {
        let raw = self.call(from, to, DEFAULT_GAS, data).await?;
        Ok(ethers::abi::decode(output, &raw)?)
    }

    /// Signs and submits a legacy transaction. A missing gas price falls
    /// back to the cached suggestion, a missing value to zero. Submission
    /// errors surface without any receipt polling.
    pub async fn send_legacy_tx(
        &self,
        wallet: &LocalWallet,
        to: Address,
        nonce: u64,
        gas: u64,
        gas_price: Option<U256>,
        value: Option<U256>,
        data: Vec<u8>,
    ) -> Result<H256> {
        let gas_price = match gas_price {
            Some(gp) => gp,
            None => self.suggest_gas_price().await.map_err(|e| {
                Error::Target(format!("suggest gas price failed: {e}"))
            })?,
        };
        let value = value.unwrap_or_default();
        tracing::debug!(
            "trying to send: {{Nonce:{} GasPrice:{} Gas:{} To:{:?} Val:{} \
             len(Data):{}}}",
            nonce,
            gas_price,
            gas,
            to,
            value,
            data.len()
        );
        let tx = TransactionRequest::new()
            .from(wallet.address())
            .to(to)
            .nonce(nonce)
            .gas(gas)
            .gas_price(gas_price)
            .value(value)
            .data(data)
            .chain_id(U64::from(self.chain_id.as_u64()));
        let typed: TypedTransaction = tx.into();
        let signature = wallet.sign_transaction(&typed).await?;
        let raw = typed.rlp_signed(&signature);
        let pending_tx = tokio::time::timeout(
            REQ_TIMEOUT,
            self.provider.send_raw_transaction(raw),
        )
        .await??;
        Ok(pending_tx.tx_hash())
    }

    /// One receipt lookup, `Ok(None)` while the tx is still pending.
    pub async fn receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>> {
        tracing::debug!("try get receipt of txHash: {tx_hash:?}");
        Ok(tokio::time::timeout(
            REQ_TIMEOUT,
            self.provider.get_transaction_receipt(tx_hash),
        )
        .await??)
    }

    /// Polls for the receipt of one transaction, refreshing `keepalive`
    /// before every attempt. Returns [`Error::NoReceipt`] once the retry
    /// budget is exhausted and [`Error::Cancelled`] when the root context
    /// goes away mid-wait.
    pub async fn poll_receipt(
        &self,
        cancel: &CancellationToken,
        keepalive: &dyn Keepalive,
        tx_hash: H256,
    ) -> Result<TransactionReceipt> {
        for _ in 0..RECEIPT_RETRIES {
            keepalive.keep_alive().await;
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
            match self.receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!("receipt of {tx_hash:?} not ready: {e}")
                }
            }
        }
        Err(Error::NoReceipt)
    }

    /// Polls for the receipts of a batch, same loop shape as
    /// [`Self::poll_receipt`] but with the batch budget; stops early once
    /// every receipt is seen. The result keeps the input order, `None`
    /// where no receipt showed up.
    pub async fn poll_receipts(
        &self,
        cancel: &CancellationToken,
        keepalive: &dyn Keepalive,
        tx_hashes: &[H256],
    ) -> Result<Vec<Option<TransactionReceipt>>> {
        if tx_hashes.is_empty() {
            return Ok(Vec::new());
        }
        let mut found: Vec<Option<TransactionReceipt>> =
            vec![None; tx_hashes.len()];
        for _ in 0..BATCH_RECEIPT_RETRIES {
            keepalive.keep_alive().await;
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
            for (i, tx_hash) in tx_hashes.iter().enumerate() {
                if found[i].is_some() {
                    continue;
                }
                match self.receipt(*tx_hash).await {
                    Ok(Some(receipt)) => found[i] = Some(receipt),
                    Ok(None) => {}
                    Err(e) => tracing::debug!(
                        "receipt of {tx_hash:?} not ready: {e}"
                    ),
                }
            }
            if found.iter().all(Option::is_some) {
                break;
            }
        }
        Ok(found)
    }
}

/// Whether a receipt reports success.
pub fn receipt_success(receipt: &TransactionReceipt) -> bool {
    receipt.status == Some(U64::one())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_requires_status_one() {
        let mut r = TransactionReceipt::default();
        assert!(!receipt_success(&r));
        r.status = Some(U64::one());
        assert!(receipt_success(&r));
        r.status = Some(U64::zero());
        assert!(!receipt_success(&r));
    }

    // Talks to a live node; run manually against a dev chain.
    #[tokio::test]
    #[ignore = "needs a running EVM node at localhost:8545"]
    async fn connects_and_reads_gas_price() {
        let client = EvmClient::connect(
            "http://127.0.0.1:8545",
            None,
            Duration::from_secs(600),
            Duration::from_secs(5),
            false,
        )
        .await
        .expect("connect");
        let gp = client.suggest_gas_price().await.expect("gas price");
        // second read must come from the cache
        assert_eq!(client.suggest_gas_price().await.expect("cached"), gp);
    }
}
