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

//! # Source Client
//!
//! The view of a TKM source node the relayer needs: block batches, tx
//! proofs, committees and chain statistics. The engine and the mode
//! handlers only ever see the [`SourceClient`] trait; the HTTP
//! implementation speaks JSON-RPC whose payloads are hex-encoded SCALE
//! streams.

use std::time::Duration;

use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use parity_scale_codec::Decode;
use tkm_relayer_types::{
    AccountInfo, ChainId, ChainStats, Committee, Confirmeds, EpochNum, Hash,
    Height, NodeId, RpcBlocks, TxFinalProof,
};
use tkm_relayer_utils::{Error, Result};

/// Per-call budget for source RPC requests.
pub const REQ_TIMEOUT: Duration = Duration::from_secs(5);

/// The source-chain operations the relay engine consumes.
#[async_trait::async_trait]
pub trait SourceClient: Send + Sync {
    /// A batch of blocks starting at `from`, together with the node's
    /// current tip. `None` when the node has nothing to serve yet.
    async fn get_blocks(
        &self,
        chain: ChainId,
        from: Height,
    ) -> Result<Option<RpcBlocks>>;

    /// The finalized proof of `tx_hash`, anchored at (or before) the given
    /// main-chain height.
    async fn tx_final_proof(
        &self,
        chain: ChainId,
        tx_hash: Hash,
        anchor_main_height: Height,
    ) -> Result<TxFinalProof>;

    /// The local (non-finalized) proof of `tx_hash`.
    async fn tx_local_proof(
        &self,
        chain: ChainId,
        tx_hash: Hash,
    ) -> Result<TxFinalProof>;

    /// Liveness statistics of the node.
    async fn chain_stats(&self) -> Result<ChainStats>;

    /// The committee elected for `epoch`.
    async fn committee(&self, epoch: EpochNum) -> Result<Vec<NodeId>>;

    /// The sub-chain confirmations visible from `main_chain` at `height`
    /// (nil height means the current tip).
    async fn last_confirmeds_at(
        &self,
        main_chain: ChainId,
        height: Height,
    ) -> Result<Confirmeds>;

    /// Account state, used to check that a watched contract exists.
    async fn account(&self, addr: tkm_relayer_types::Address)
        -> Result<AccountInfo>;
}

/// Fetches the committee of `epoch` and requires it to be available.
pub async fn fetch_committee(
    src: &dyn SourceClient,
    epoch: EpochNum,
) -> Result<Committee> {
    let nids = src.committee(epoch).await.map_err(|e| {
        Error::Source(format!("get committee of Epoch:{epoch} failed: {e}"))
    })?;
    let comm = Committee::new(nids);
    if !comm.is_available() {
        return Err(Error::Source("committee not available".into()));
    }
    Ok(comm)
}

fn decode_stream<T: Decode>(stream: &str) -> Result<T> {
    let raw = hex::decode(stream.trim_start_matches("0x"))?;
    Ok(T::decode(&mut raw.as_slice())?)
}

/// JSON-RPC client against one TKM node.
#[derive(Debug, Clone)]
pub struct HttpSourceClient {
    client: HttpClient,
    endpoint: String,
}

impl HttpSourceClient {
    /// Dials `endpoint` and checks that the node serves `expected_chain`.
    pub async fn connect(
        endpoint: &str,
        expected_chain: ChainId,
    ) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .request_timeout(REQ_TIMEOUT)
            .build(endpoint)?;
        let this = Self {
            client,
            endpoint: endpoint.to_string(),
        };
        let stats = this.chain_stats().await.map_err(|e| {
            Error::Source(format!("connect TKM @{endpoint} failed: {e}"))
        })?;
        if stats.chain_id != expected_chain {
            return Err(Error::Source(format!(
                "TKM@{endpoint} ChainID:{expected_chain} required, but {stats}"
            )));
        }
        tracing::info!("TKM@{} connected: {}", endpoint, stats);
        Ok(this)
    }

    /// The endpoint this client dials.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call_stream<T: Decode>(
        &self,
        method: &str,
        params: jsonrpsee::core::params::ArrayParams,
    ) -> Result<T> {
        let stream: String = tokio::time::timeout(
            REQ_TIMEOUT,
            self.client.request(method, params),
        )
        .await??;
        decode_stream(&stream)
    }
}

#[async_trait::async_trait]
impl SourceClient for HttpSourceClient {
    async fn get_blocks(
        &self,
        chain: ChainId,
        from: Height,
    ) -> Result<Option<RpcBlocks>> {
        let stream: Option<String> = tokio::time::timeout(
            REQ_TIMEOUT,
            self.client
                .request("tkm_getBlocks", rpc_params![chain.0, from.0]),
        )
        .await?
        .map_err(|e| {
            Error::Source(format!(
                "get blocks starting at {from} failed: {e}"
            ))
        })?;
        match stream {
            None => Ok(None),
            Some(s) => {
                let blocks: RpcBlocks = decode_stream(&s)?;
                if blocks.blocks.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(blocks))
                }
            }
        }
    }

    async fn tx_final_proof(
        &self,
        chain: ChainId,
        tx_hash: Hash,
        anchor_main_height: Height,
    ) -> Result<TxFinalProof> {
        self.call_stream(
            "tkm_getTxFinalProof",
            rpc_params![
                chain.0,
                format!("{tx_hash:#x}"),
                anchor_main_height.0
            ],
        )
        .await
        .map_err(|e| {
            Error::Source(format!(
                "TxFinalProof: ChainID:{chain} TxHash:{tx_hash:#x} \
                 Anchor:{anchor_main_height} failed: {e}"
            ))
        })
    }

    async fn tx_local_proof(
        &self,
        chain: ChainId,
        tx_hash: Hash,
    ) -> Result<TxFinalProof> {
        self.call_stream(
            "tkm_getTxLocalProof",
            rpc_params![chain.0, format!("{tx_hash:#x}")],
        )
        .await
        .map_err(|e| {
            Error::Source(format!(
                "TxLocalProof: ChainID:{chain} TxHash:{tx_hash:#x} failed: {e}"
            ))
        })
    }

    async fn chain_stats(&self) -> Result<ChainStats> {
        self.call_stream("tkm_chainStats", rpc_params![]).await
    }

    async fn committee(&self, epoch: EpochNum) -> Result<Vec<NodeId>> {
        self.call_stream("tkm_committee", rpc_params![epoch.0]).await
    }

    async fn last_confirmeds_at(
        &self,
        main_chain: ChainId,
        height: Height,
    ) -> Result<Confirmeds> {
        self.call_stream(
            "tkm_lastConfirmedsAt",
            rpc_params![main_chain.0, height.0],
        )
        .await
    }

    async fn account(
        &self,
        addr: tkm_relayer_types::Address,
    ) -> Result<AccountInfo> {
        self.call_stream("tkm_account", rpc_params![format!("{addr:#x}")])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_scale_codec::Encode;

    #[test]
    fn stream_decoding_accepts_both_hex_forms() {
        let blocks = RpcBlocks {
            chain_id: ChainId(3),
            current: Height(120),
            blocks: vec![Default::default()],
        };
        let encoded = hex::encode(blocks.encode());
        let plain: RpcBlocks = decode_stream(&encoded).expect("plain hex");
        let prefixed: RpcBlocks =
            decode_stream(&format!("0x{encoded}")).expect("0x hex");
        assert_eq!(plain, blocks);
        assert_eq!(prefixed, blocks);
    }

    #[test]
    fn garbage_stream_is_a_decode_error() {
        assert!(decode_stream::<RpcBlocks>("0xzz").is_err());
        assert!(decode_stream::<RpcBlocks>("00").is_err());
    }
}
