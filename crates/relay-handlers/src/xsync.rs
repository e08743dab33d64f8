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

//! X-Relay sync mode: like sync, but the source is an X-Relay chain that
//! already aggregated the events, so proofs are local (no main-chain
//! anchor), the provable window comes from the X light-client's
//! `endsOfEpoch[1]`, and events destined for other chains are skipped.

use ethers::types::U256;
use tkm_evm_client::receipt_success;
use tkm_proofs::{builder, locate_log};
use tkm_relayer_config::XSyncConfig;
use tkm_relayer_engine::{BlockHandler, RelayContext};
use tkm_relayer_types::{Block, EpochNum, Hash, Height, TxFinalProof};
use tkm_relayer_utils::{
    exit_code, probe, Error, Expirable, Keepalive, Result,
};

use crate::contracts::{self, mcs, xlight_client};
use crate::{fetch_sending_lock, read_contract, target_chain_id};

/// The xsync mode policy.
pub struct XSyncer {
    cfg: XSyncConfig,
    target_name: String,
    watch_topic: Hash,
    max_provable: Expirable<Option<Height>>,
}

impl XSyncer {
    /// The mode tag used in store keys.
    pub const MODE: &'static str = "xsync";

    /// Builds the policy from its validated config section.
    pub fn new(cfg: XSyncConfig, target_name: impl Into<String>) -> Self {
        let ttl_ms = cfg.maxheightttl as i64 * 1000;
        Self {
            cfg,
            target_name: target_name.into(),
            watch_topic: mcs::transfer_out_topic(),
            max_provable: Expirable::new(None, ttl_ms, 0),
        }
    }

    /// The highest X-Relay height the light-client can verify: the last
    /// height of `endsOfEpoch[1]`.
    async fn max_validatable_from_lc(
        &self,
        ctx: &RelayContext,
    ) -> Result<Height> {
        let out = read_contract(
            ctx,
            self.cfg.targetlc,
            xlight_client::encode_ends_of_epoch(1),
            &xlight_client::ends_of_epoch_outputs(),
        )
        .await
        .map_err(|e| {
            Error::LightClient(format!("getter XLC.endsOfEpoch failed: {e}"))
        })?;
        let last_epoch = out
            .first()
            .map(contracts::epoch_from_token)
            .unwrap_or(EpochNum::NIL);
        if last_epoch.is_nil() {
            return Err(Error::exit(
                exit_code::LIGHT_CLIENT,
                "unavailable last epoch in LC",
            ));
        }
        Ok(last_epoch.last_height(ctx.blocks_in_epoch()))
    }

    async fn max_provable_height(
        &self,
        ctx: &RelayContext,
    ) -> Result<Height> {
        let (cached, fresh) = self.max_provable.get();
        if fresh {
            if let Some(height) = cached {
                return Ok(height);
            }
        }
        tracing::debug!("provable height cache missed, try get");
        let max = self.max_validatable_from_lc(ctx).await?;
        self.max_provable.update(Some(max));
        tracing::warn!("provable height cache put: {max}");
        Ok(max)
    }

    async fn order_exists(
        &self,
        ctx: &RelayContext,
        order_id: Hash,
    ) -> Result<bool> {
        let out = read_contract(
            ctx,
            self.cfg.targetmcs,
            mcs::encode_order_list(order_id),
            &mcs::order_list_outputs(),
        )
        .await
        .map_err(|e| {
            Error::Target(format!("getter target.MCS.orderList failed: {e}"))
        })?;
        match out.first() {
            Some(ethers::abi::Token::Bool(exists)) => Ok(*exists),
            other => Err(Error::Target(format!(
                "parse orderList output failed: {other:?}"
            ))),
        }
    }

    async fn collect_proofs(
        &self,
        ctx: &RelayContext,
        block: &Block,
    ) -> Result<Vec<TxFinalProof>> {
        let src = ctx.source()?;
        let target_chain = target_chain_id(ctx);
        let mut proofs = Vec::new();
        for tx in &block.body.txs {
            if tx.to.is_none() || tx.input.is_empty() {
                continue;
            }
            let _ = ctx.running_lock.refresh().await;
            let tx_hash = tx.hash();
            let proof = src
                .tx_local_proof(ctx.src_chain(), tx_hash)
                .await
                .map_err(|e| {
                    Error::Source(format!(
                        "get local proof of TxHash:{tx_hash:?} failed: {e}"
                    ))
                })?;
            if !proof.receipt.success() {
                tracing::debug!("{tx} failed");
                continue;
            }
            builder::verify_local(&proof).map_err(|e| {
                Error::Proof(format!(
                    "local proof {proof} verify failed: {e}"
                ))
            })?;
            let Some((_, log)) = locate_log(
                &proof.receipt.logs,
                self.cfg.mcs,
                self.watch_topic,
            ) else {
                continue;
            };
            let out = mcs::decode_transfer_out(log)?;
            if out.to_chain != target_chain {
                tracing::warn!(
                    "{out} found, but TargetChainID:{target_chain} not match"
                );
                continue;
            }
            tracing::info!("{out} found");
            if self.order_exists(ctx, out.order_id).await? {
                tracing::warn!("{out} already in order list");
                continue;
            }
            tracing::debug!("try to send {}: {proof}", proofs.len() + 1);
            proofs.push(proof);
        }
        Ok(proofs)
    }

    async fn send_proofs(
        &self,
        ctx: &RelayContext,
        proofs: Vec<TxFinalProof>,
    ) -> Result<()> {
        if proofs.is_empty() {
            return Ok(());
        }
        fetch_sending_lock(ctx).await?;
        let result = self.send_proofs_locked(ctx, proofs).await;
        ctx.sending_lock.release().await;
        result
    }

    async fn send_proofs_locked(
        &self,
        ctx: &RelayContext,
        proofs: Vec<TxFinalProof>,
    ) -> Result<()> {
        let target = ctx.target()?;
        let locks = ctx.locks();
        locks.keep_alive().await;
        let (gas, must_have) = target.suggest_balance().await;
        let mut nonce = target
            .nonce_with_min_balance(
                ctx.sender(),
                ctx.config.target.checkbalance,
                must_have,
            )
            .await?;

        let bie = ctx.blocks_in_epoch();
        let mut tx_hashes = Vec::with_capacity(proofs.len());
        for (i, proof) in proofs.iter().enumerate() {
            let record = builder::receipt_data(
                proof,
                self.cfg.mcs,
                self.watch_topic,
                proof.header.height.epoch(bie),
            )?;
            let data = tkm_proofs::records::encode_record(&record);
            let input = mcs::encode_transfer_in(
                U256::from(self.cfg.chainid),
                data,
            );
            let tx_hash = target
                .send_legacy_tx(
                    ctx.wallet(),
                    self.cfg.targetmcs,
                    nonce,
                    gas,
                    None,
                    None,
                    input,
                )
                .await
                .map_err(|e| {
                    Error::Target(format!("send tx failed: {e}"))
                })?;
            tx_hashes.push(tx_hash);
            nonce += 1;
            if i > 0 && i % 10 == 0 {
                locks.keep_alive().await;
            }
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::TxSubmit,
                tx = %format!("{tx_hash:?}"),
                nonce = nonce - 1,
                xrelay = true,
            );
        }

        let receipts = target
            .poll_receipts(&ctx.cancel_token(), &locks, &tx_hashes)
            .await?;
        let mut successes = Vec::new();
        let mut faileds = Vec::new();
        for (i, receipt) in receipts.iter().enumerate() {
            match receipt {
                Some(r) if receipt_success(r) => {
                    successes.push(tx_hashes[i]);
                }
                _ => faileds.push(tx_hashes[i]),
            }
        }
        if !successes.is_empty() {
            tracing::info!("MCS Success: {successes:?}");
        }
        if !faileds.is_empty() {
            tracing::error!("MCS failed: {faileds:?}");
            return Err(Error::Target(format!(
                "transfer failed occurs: {} successed, {} failed",
                successes.len(),
                faileds.len()
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlockHandler for XSyncer {
    fn name(&self) -> String {
        format!("XSYNC_{}", self.target_name)
    }

    async fn confirm(&self, ctx: &RelayContext) -> Result<()> {
        let acc = ctx
            .source()?
            .account(self.cfg.mcs)
            .await
            .map_err(|e| Error::Source(format!("get account failed: {e}")))?;
        if acc.code.is_empty() {
            return Err(Error::Source(format!(
                "X-Relay MCS contract at {:?} not found",
                self.cfg.mcs
            )));
        }
        let code = ctx.target()?.code_at(self.cfg.targetmcs).await?;
        if code.is_empty() {
            return Err(Error::Target(format!(
                "target MCS address {:?} not a contract",
                self.cfg.targetmcs
            )));
        }
        tracing::info!(
            "watching: Address:{:?} EventTopic:{:x}",
            self.cfg.mcs,
            self.watch_topic
        );
        Ok(())
    }

    async fn prepare_to_get(
        &self,
        ctx: &RelayContext,
        start: Height,
    ) -> Result<()> {
        let max = self.max_provable_height(ctx).await?;
        if start > max {
            return Err(Error::Backpressure(format!(
                "max provable height exceeded: Max:{max}, but start:{start}"
            )));
        }
        Ok(())
    }

    async fn process_block(
        &self,
        ctx: &RelayContext,
        block: &Block,
    ) -> Result<()> {
        let max = self.max_provable_height(ctx).await?;
        if block.header.height > max {
            return Err(Error::Backpressure(format!(
                "max provable height exceeded: Max:{max}, but \
                 Block.Height:{}",
                block.header.height
            )));
        }
        let proofs = self.collect_proofs(ctx, block).await?;
        self.send_proofs(ctx, proofs)
            .await
            .map_err(|e| match e {
                e if e.is_fatal() => e,
                other => Error::Target(format!("MCS proof failed: {other}")),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tkm_relayer_types::Address;

    #[test]
    fn name_carries_the_target() {
        let x = XSyncer::new(
            XSyncConfig {
                chainid: 70002,
                mcs: Address::repeat_byte(1),
                targetmcs: Address::repeat_byte(2),
                targetlc: Address::repeat_byte(3),
                maxheightttl: 60,
            },
            "HECO",
        );
        assert_eq!(x.name(), "XSYNC_HECO");
        assert_eq!(x.watch_topic, mcs::transfer_out_topic());
    }
}
