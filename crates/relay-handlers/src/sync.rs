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

//! Sync mode: relay `mapTransferOut` events from a TKM sub-chain into the
//! target MCS contract, each one backed by a receipt+log Merkle proof
//! anchored at a main-chain height the light-client already trusts.
//!
//! The provable window is the backpressure valve of this mode: when the
//! cursor catches up with what the light-client can verify, the stream
//! pauses without giving up leadership.

use ethers::types::U256;
use tkm_evm_client::receipt_success;
use tkm_proofs::{builder, locate_log};
use tkm_relayer_config::SyncConfig;
use tkm_relayer_engine::{BlockHandler, RelayContext};
use tkm_relayer_types::{
    Block, ChainId, EpochNum, Hash, Height, TxFinalProof,
};
use tkm_relayer_utils::{
    exit_code, probe, Error, Expirable, Keepalive, Result,
};

use crate::contracts::{self, light_client, mcs, updatable};
use crate::{fetch_sending_lock, read_contract};

/// The highest heights currently provable through the target light-client:
/// the trusted main-chain height and the sub-chain height confirmed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProvableHeights {
    pub main: Height,
    pub sub: Height,
}

/// The sync mode policy.
pub struct Syncer {
    cfg: SyncConfig,
    target_name: String,
    watch_topic: Hash,
    max_provable: Expirable<Option<ProvableHeights>>,
}

impl Syncer {
    /// The mode tag used in store keys.
    pub const MODE: &'static str = "sync";

    /// Builds the policy from its validated config section.
    pub fn new(cfg: SyncConfig, target_name: impl Into<String>) -> Self {
        let ttl_ms = cfg.maxheightttl as i64 * 1000;
        Self {
            cfg,
            target_name: target_name.into(),
            watch_topic: mcs::transfer_out_topic(),
            max_provable: Expirable::new(None, ttl_ms, 0),
        }
    }

    /// The highest main-chain height the light-client can already verify
    /// against: for the updatable flavour one past the last stored epoch,
    /// for the plain flavour the end of the epoch after `lastHeight`.
    async fn max_validatable_from_lc(
        &self,
        ctx: &RelayContext,
    ) -> Result<Height> {
        let bie = ctx.blocks_in_epoch();
        if self.cfg.updatablelc {
            let out = read_contract(
                ctx,
                self.cfg.targetlc,
                updatable::encode_last_epoch(),
                &updatable::last_epoch_outputs(),
            )
            .await
            .map_err(|e| {
                Error::LightClient(format!("UpdatableLC.lastEpoch failed: {e}"))
            })?;
            let epoch = out
                .first()
                .map(contracts::epoch_from_token)
                .unwrap_or(EpochNum::NIL);
            if epoch.is_nil() {
                return Err(Error::exit(
                    exit_code::LIGHT_CLIENT,
                    "unavailable last epoch in LC",
                ));
            }
            Ok(epoch.last_height(bie))
        } else {
            let out = read_contract(
                ctx,
                self.cfg.targetlc,
                light_client::encode_last_height(),
                &light_client::last_height_outputs(),
            )
            .await
            .map_err(|e| {
                Error::LightClient(format!("LC.lastHeight failed: {e}"))
            })?;
            let height = out
                .first()
                .map(contracts::height_from_token)
                .unwrap_or(Height::NIL);
            if height.is_nil() {
                return Err(Error::exit(
                    exit_code::LIGHT_CLIENT,
                    "unavailable last height in LC",
                ));
            }
            Ok(height.epoch(bie).next().last_height(bie))
        }
    }

    /// Resolves the sub-chain height confirmed by the main chain at or
    /// before `max_validatable`.
    async fn last_confirmed_by_main(
        &self,
        ctx: &RelayContext,
        max_validatable: Height,
    ) -> Result<ProvableHeights> {
        let src = ctx.source()?;
        let confirmeds = src
            .last_confirmeds_at(ChainId::MAIN, Height::NIL)
            .await
            .map_err(|e| {
                Error::Source(format!(
                    "get confirmeds of main-chain failed: {e}"
                ))
            })?;

        let check = |cs: tkm_relayer_types::Confirmeds| -> Result<ProvableHeights> {
            for info in &cs.data {
                if info.chain_id == ctx.src_chain() {
                    return match info.height {
                        Some(sub) => Ok(ProvableHeights { main: cs.at, sub }),
                        None => Err(Error::Source(
                            "no confirmed block yet".into(),
                        )),
                    };
                }
            }
            Err(Error::Source("no confirmed info yet".into()))
        };

        if confirmeds.at <= max_validatable {
            if ctx.src_chain().is_main() {
                return Ok(ProvableHeights {
                    main: confirmeds.at,
                    sub: confirmeds.at,
                });
            }
            check(confirmeds)
        } else {
            if ctx.src_chain().is_main() {
                return Ok(ProvableHeights {
                    main: max_validatable,
                    sub: max_validatable,
                });
            }
            let pinned = src
                .last_confirmeds_at(ChainId::MAIN, max_validatable)
                .await
                .map_err(|e| {
                    Error::Source(format!(
                        "get confirmeds of main-chain \
                         MaxValidatable:{max_validatable} failed: {e}"
                    ))
                })?;
            check(pinned)
        }
    }

    async fn max_provable_heights(
        &self,
        ctx: &RelayContext,
    ) -> Result<ProvableHeights> {
        let (cached, fresh) = self.max_provable.get();
        if fresh {
            if let Some(heights) = cached {
                return Ok(heights);
            }
        }
        tracing::debug!("provable height cache missed, try get");
        let max_validatable = self.max_validatable_from_lc(ctx).await?;
        let heights =
            self.last_confirmed_by_main(ctx, max_validatable).await?;
        self.max_provable.update(Some(heights));
        tracing::debug!("provable height cache put: {heights:?}");
        Ok(heights)
    }

    /// Whether `order_id` was already transferred in on the target MCS.
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
            Error::Target(format!("call orderList failed: {e}"))
        })?;
        match out.first() {
            Some(ethers::abi::Token::Bool(exists)) => Ok(*exists),
            other => Err(Error::Target(format!(
                "parse orderList output failed: {other:?}"
            ))),
        }
    }

    /// Collects the provable transfer-out events of one block.
    async fn collect_proofs(
        &self,
        ctx: &RelayContext,
        block: &Block,
        anchor_main: Height,
    ) -> Result<Vec<TxFinalProof>> {
        let src = ctx.source()?;
        let mut proofs = Vec::new();
        for tx in &block.body.txs {
            if tx.to.is_none() || tx.input.is_empty() {
                continue;
            }
            let _ = ctx.running_lock.refresh().await;
            let tx_hash = tx.hash();
            let proof = src
                .tx_final_proof(ctx.src_chain(), tx_hash, anchor_main)
                .await
                .map_err(|e| {
                    Error::Source(format!(
                        "get final proof of TxHash:{tx_hash:?} failed: {e}"
                    ))
                })?;
            if !proof.receipt.success() {
                tracing::debug!("{tx} failed");
                continue;
            }
            builder::verify_final(&proof).map_err(|e| {
                Error::Proof(format!(
                    "final proof {proof} verify failed: {e}"
                ))
            })?;
            let Some((_, log)) = locate_log(
                &proof.receipt.logs,
                self.cfg.tkmmcs,
                self.watch_topic,
            ) else {
                continue;
            };
            let out = mcs::decode_transfer_out(log)?;
            tracing::info!("{out} found");
            if self.order_exists(ctx, out.order_id).await? {
                tracing::warn!("{out} already in order list");
                continue;
            }
            tracing::debug!(
                "try to send {}: {proof}",
                proofs.len() + 1
            );
            proofs.push(proof);
        }
        Ok(proofs)
    }

    /// Submits one `transferIn` per proof with consecutive nonces, then
    /// polls all receipts. A single failed receipt fails the block.
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

        let mut tx_hashes = Vec::with_capacity(proofs.len());
        for (i, proof) in proofs.iter().enumerate() {
            let record = builder::receipt_proof(
                proof,
                self.cfg.tkmmcs,
                self.watch_topic,
            )?;
            let data = tkm_proofs::records::encode_record(&record);
            let input = mcs::encode_transfer_in(
                U256::from(self.cfg.tkmchainid),
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
impl BlockHandler for Syncer {
    fn name(&self) -> String {
        format!("SYNC_{}", self.target_name)
    }

    async fn confirm(&self, ctx: &RelayContext) -> Result<()> {
        let acc = ctx
            .source()?
            .account(self.cfg.tkmmcs)
            .await
            .map_err(|e| Error::Source(format!("get account failed: {e}")))?;
        if acc.code.is_empty() {
            return Err(Error::Source(format!(
                "TKM MCS contract at {:?} not found",
                self.cfg.tkmmcs
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
            self.cfg.tkmmcs,
            self.watch_topic
        );
        Ok(())
    }

    async fn prepare_to_get(
        &self,
        ctx: &RelayContext,
        start: Height,
    ) -> Result<()> {
        let heights = self.max_provable_heights(ctx).await?;
        if start > heights.sub {
            return Err(Error::Backpressure(format!(
                "max provable height exceeded: Main:{}, Sub:{}, but \
                 start:{start}",
                heights.main, heights.sub
            )));
        }
        Ok(())
    }

    async fn process_block(
        &self,
        ctx: &RelayContext,
        block: &Block,
    ) -> Result<()> {
        let heights = self.max_provable_heights(ctx).await?;
        if block.header.height > heights.sub {
            return Err(Error::Backpressure(format!(
                "max provable height exceeded: Main:{}, Sub:{}, but \
                 Block.Height:{}",
                heights.main, heights.sub, block.header.height
            )));
        }
        let proofs =
            self.collect_proofs(ctx, block, heights.main).await?;
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

    fn syncer() -> Syncer {
        Syncer::new(
            SyncConfig {
                tkmchainid: 70001,
                tkmmcs: Address::repeat_byte(0x01),
                targetmcs: Address::repeat_byte(0x02),
                targetlc: Address::repeat_byte(0x03),
                updatablelc: false,
                maxheightttl: 60,
            },
            "BSC",
        )
    }

    #[test]
    fn provable_cache_starts_cold() {
        let s = syncer();
        let (v, fresh) = s.max_provable.get();
        assert_eq!(v, None);
        assert!(!fresh);
        s.max_provable.update(Some(ProvableHeights {
            main: Height(10),
            sub: Height(5),
        }));
        let (v, fresh) = s.max_provable.get();
        assert!(fresh);
        assert_eq!(
            v,
            Some(ProvableHeights {
                main: Height(10),
                sub: Height(5)
            })
        );
    }

    #[test]
    fn name_carries_the_target() {
        assert_eq!(syncer().name(), "SYNC_BSC");
    }
}
