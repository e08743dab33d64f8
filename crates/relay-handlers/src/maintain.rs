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

//! Maintain mode: watch the TKM main chain for committee rotations and push
//! each one to the light-client contract on the target chain, asserting the
//! emitted update event afterwards.

use tkm_proofs::CommitteeProof;
use tkm_relayer_config::MaintainConfig;
use tkm_relayer_engine::{BlockHandler, RelayContext};
use tkm_relayer_types::{Block, Committee, EpochNum};
use tkm_relayer_utils::{probe, Error, Result};
use tkm_source_client::fetch_committee;

use crate::contracts::{self, light_client};
use crate::{
    assert_rotation_event, fetch_sending_lock, read_contract,
    reconcile_cursor, send_and_wait,
};

/// The maintain mode policy.
pub struct Maintainer {
    cfg: MaintainConfig,
    target_name: String,
}

impl Maintainer {
    /// The mode tag used in store keys.
    pub const MODE: &'static str = "maintain";

    /// Builds the policy from its validated config section.
    pub fn new(cfg: MaintainConfig, target_name: impl Into<String>) -> Self {
        Self {
            cfg,
            target_name: target_name.into(),
        }
    }

    /// Picks the committee a block announces, preferring the regular
    /// election over the fallback one. `Ok(None)` when the block carries
    /// no election at all.
    pub(crate) fn announced_committee(
        block: &Block,
    ) -> Result<Option<Committee>> {
        let next = block.body.next_committee.as_ref();
        let real = block.body.next_real_committee.as_ref();
        if next.is_none() && real.is_none() {
            return Ok(None);
        }
        if let Some(comm) = next.filter(|c| c.is_available()) {
            return Ok(Some(comm.clone()));
        }
        if let Some(comm) = real.filter(|c| c.is_available()) {
            return Ok(Some(comm.clone()));
        }
        Err(Error::Proof("no available committee found".into()))
    }

    async fn update_committee(
        &self,
        ctx: &RelayContext,
        proof: &CommitteeProof,
    ) -> Result<()> {
        proof.verify(true)?;
        fetch_sending_lock(ctx).await?;
        let result = self.send_update(ctx, proof).await;
        ctx.sending_lock.release().await;
        result
    }

    async fn send_update(
        &self,
        ctx: &RelayContext,
        proof: &CommitteeProof,
    ) -> Result<()> {
        let input =
            light_client::encode_update_committee(&proof.for_abi());
        let receipt =
            send_and_wait(ctx, self.cfg.targetlc, input).await?;
        let event = contracts::find_update_event(&receipt.logs)?;
        assert_rotation_event(
            &event,
            proof.header.epoch(ctx.blocks_in_epoch()),
            proof.header.elected_next_root,
        )?;
        tracing::info!("{} updated {}", proof.comm, event);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Committee,
            epoch = event.epoch.0,
        );
        Ok(())
    }

    /// Reads the light-client's `lastHeight`.
    async fn last_height(
        &self,
        ctx: &RelayContext,
    ) -> Result<tkm_relayer_types::Height> {
        let out = read_contract(
            ctx,
            self.cfg.targetlc,
            light_client::encode_last_height(),
            &light_client::last_height_outputs(),
        )
        .await
        .map_err(|e| {
            Error::LightClient(format!("lightnode.lastHeight() failed: {e}"))
        })?;
        out.first()
            .map(contracts::height_from_token)
            .ok_or_else(|| Error::LightClient("empty lastHeight".into()))
    }

    async fn check_one_latest_epoch(
        &self,
        ctx: &RelayContext,
        index: u64,
    ) -> Result<()> {
        let out = read_contract(
            ctx,
            self.cfg.targetlc,
            light_client::encode_latest2_epoch(index),
            &light_client::latest2_epoch_outputs(),
        )
        .await
        .map_err(|e| {
            Error::LightClient(format!("latest2Epoch[{index}] failed: {e}"))
        })?;
        let epoch = out
            .first()
            .map(contracts::epoch_from_token)
            .unwrap_or(EpochNum::NIL);
        if epoch.is_nil() {
            tracing::warn!("target.latest2Epoch[{index}] not set");
            return Ok(());
        }
        let comm_out = read_contract(
            ctx,
            self.cfg.targetlc,
            light_client::encode_check_epoch_committee(epoch),
            &light_client::check_epoch_committee_outputs(),
        )
        .await
        .map_err(|e| {
            Error::LightClient(format!(
                "checkEpochCommittee(epoch:{epoch}) failed: {e}"
            ))
        })?;
        let addrs = comm_out
            .first()
            .map(crate::addresses_from_token)
            .unwrap_or_default();
        if addrs.is_empty() {
            return Err(Error::LightClient(format!(
                "latest2Epoch[{index}] -> checkEpochCommittee(epoch:{epoch}) \
                 got nothing"
            )));
        }
        let src_comm = fetch_committee(ctx.source()?.as_ref(), epoch).await?;
        if !src_comm.equals_addresses(&addrs) {
            return Err(Error::LightClient(format!(
                "latest2Epoch[{index}]=epoch:{epoch} addrs not match with \
                 {src_comm}"
            )));
        }
        tracing::info!(
            "latest2Epoch[{index}]=epoch:{epoch} matches {src_comm}"
        );
        Ok(())
    }

    /// One-shot cross-check of the light-client's two most recent committee
    /// sets against the source chain (`--checkLNComm`).
    pub async fn check_comms(&self, ctx: &RelayContext) -> Result<()> {
        self.check_one_latest_epoch(ctx, 0).await?;
        self.check_one_latest_epoch(ctx, 1).await
    }
}

#[async_trait::async_trait]
impl BlockHandler for Maintainer {
    fn name(&self) -> String {
        format!("MAINTAIN_{}", self.target_name)
    }

    async fn confirm(&self, ctx: &RelayContext) -> Result<()> {
        let last_height = self.last_height(ctx).await?;
        tracing::info!("lastHeight of light-node: {last_height}");
        reconcile_cursor(ctx, last_height).await
    }

    async fn process_block(
        &self,
        ctx: &RelayContext,
        block: &Block,
    ) -> Result<()> {
        if ctx.config.source.ignoreblocks {
            // elections only land near the end of an epoch
            let bie = ctx.blocks_in_epoch();
            if block.header.height.0 % bie < bie.saturating_sub(100) {
                return Ok(());
            }
        }
        let comm = match Self::announced_committee(block) {
            Ok(Some(comm)) => comm,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!("processing {block} warned: {e}");
                return Ok(());
            }
        };
        let proof = CommitteeProof {
            header: block.header.clone(),
            comm,
            pass: block.pass.clone(),
            syncing_epoch: EpochNum::NIL,
        };
        tracing::info!("found: {proof}");
        self.update_committee(ctx, &proof)
            .await
            .map_err(|e| match e {
                e if e.is_fatal() => e,
                other => {
                    Error::Target(format!("update {proof} failed: {other}"))
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tkm_relayer_types::{BlockHeader, NodeId};

    fn committee(n: u8) -> Committee {
        Committee::new(vec![NodeId([n; 64])])
    }

    #[test]
    fn prefers_the_regular_election() {
        let block = Block {
            header: BlockHeader::default(),
            body: tkm_relayer_types::BlockBody {
                next_committee: Some(committee(1)),
                next_real_committee: Some(committee(2)),
                txs: vec![],
            },
            pass: vec![],
        };
        let comm = Maintainer::announced_committee(&block)
            .expect("ok")
            .expect("present");
        assert_eq!(comm, committee(1));
    }

    #[test]
    fn falls_back_to_the_real_election() {
        let block = Block {
            body: tkm_relayer_types::BlockBody {
                next_committee: Some(Committee::default()),
                next_real_committee: Some(committee(2)),
                txs: vec![],
            },
            ..Default::default()
        };
        let comm = Maintainer::announced_committee(&block)
            .expect("ok")
            .expect("present");
        assert_eq!(comm, committee(2));
    }

    #[test]
    fn no_election_is_not_an_error() {
        let block = Block::default();
        assert!(Maintainer::announced_committee(&block)
            .expect("ok")
            .is_none());
    }

    #[test]
    fn unavailable_elections_are_flagged() {
        let block = Block {
            body: tkm_relayer_types::BlockBody {
                next_committee: Some(Committee::default()),
                next_real_committee: None,
                txs: vec![],
            },
            ..Default::default()
        };
        assert!(Maintainer::announced_committee(&block).is_err());
    }
}
