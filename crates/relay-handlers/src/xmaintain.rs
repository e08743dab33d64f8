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

//! X-Relay maintain mode: committee rotations from an X-Relay chain into
//! the X light-client. Structurally the maintain flow, with two twists:
//! the update record replaces the header by an elected-next-root proof, and
//! it carries the paired xsync stream's current epoch so the light-client
//! can drop committees nobody will prove against anymore.
//!
//! The paired xsync process must use the same src.chainid and target.name,
//! otherwise the syncing-epoch hint reads the wrong cursor.

use tkm_proofs::CommitteeProof;
use tkm_relayer_config::XMaintainConfig;
use tkm_relayer_engine::{BlockHandler, RelayContext};
use tkm_relayer_store::RuntimeKeys;
use tkm_relayer_types::{Block, EpochNum, Height};
use tkm_relayer_utils::{probe, Error, Result};
use tkm_source_client::fetch_committee;

use crate::contracts::{self, xlight_client};
use crate::maintain::Maintainer;
use crate::{
    assert_rotation_event, fetch_sending_lock, read_contract,
    reconcile_cursor, send_and_wait,
};

/// The xmaintain mode policy.
pub struct XMaintainer {
    cfg: XMaintainConfig,
    target_name: String,
    sync_cursor_key: String,
}

impl XMaintainer {
    /// The mode tag used in store keys.
    pub const MODE: &'static str = "xmaintain";

    /// Builds the policy; the sync cursor key is derived from the same
    /// `(target, chain)` pair this process runs with.
    pub fn new(
        cfg: XMaintainConfig,
        target_name: impl Into<String>,
        src_chain: tkm_relayer_types::ChainId,
    ) -> Self {
        let target_name = target_name.into();
        let sync_cursor_key =
            RuntimeKeys::xsync_cursor(&target_name, src_chain);
        tracing::info!("SyncStartHeightKey: {sync_cursor_key}");
        Self {
            cfg,
            target_name,
            sync_cursor_key,
        }
    }

    /// The epoch the paired xsync stream currently relays, from its cursor
    /// key. A missing key downgrades to epoch 0 with a warning: the
    /// light-client then simply keeps everything.
    async fn syncing_epoch(&self, ctx: &RelayContext) -> EpochNum {
        match ctx.store.get_u64(&self.sync_cursor_key).await {
            Ok(Some(h)) => Height(h).epoch(ctx.blocks_in_epoch()),
            Ok(None) => {
                tracing::warn!(
                    "get Syncing Epoch of XSYNC:{} failed: key missing",
                    self.sync_cursor_key
                );
                EpochNum(0)
            }
            Err(e) => {
                tracing::warn!(
                    "get Syncing Epoch of XSYNC:{} failed: {e}",
                    self.sync_cursor_key
                );
                EpochNum(0)
            }
        }
    }

    async fn last_height(
        &self,
        ctx: &RelayContext,
    ) -> Result<Height> {
        let out = read_contract(
            ctx,
            self.cfg.targetlc,
            xlight_client::encode_last_height(),
            &xlight_client::last_height_outputs(),
        )
        .await
        .map_err(|e| {
            Error::LightClient(format!(
                "xlightnode.lastHeight() failed: {e}"
            ))
        })?;
        out.first()
            .map(contracts::height_from_token)
            .ok_or_else(|| Error::LightClient("empty lastHeight".into()))
    }

    async fn update_committee(
        &self,
        ctx: &RelayContext,
        proof: &CommitteeProof,
    ) -> Result<()> {
        proof.verify(false)?;
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
        let record = proof.for_x_data_abi()?;
        let input = xlight_client::encode_update_committee(&record);
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
            xrelay = true,
        );
        Ok(())
    }

    /// One-shot cross-check of the light-client's last verifiable epoch
    /// against the source chain (`--checkLNComm`).
    pub async fn check_latest_comm(&self, ctx: &RelayContext) -> Result<()> {
        let out = read_contract(
            ctx,
            self.cfg.targetlc,
            xlight_client::encode_ends_of_epoch(1),
            &xlight_client::ends_of_epoch_outputs(),
        )
        .await
        .map_err(|e| {
            Error::LightClient(format!("endsOfEpoch[1] failed: {e}"))
        })?;
        let epoch = out
            .first()
            .map(contracts::epoch_from_token)
            .unwrap_or(EpochNum::NIL);
        if epoch.is_nil() {
            return Err(Error::LightClient(
                "last epoch not found".into(),
            ));
        }
        let comm_out = read_contract(
            ctx,
            self.cfg.targetlc,
            xlight_client::encode_check_epoch_committee(epoch),
            &xlight_client::check_epoch_committee_outputs(),
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
                "endsOfEpoch[1] -> checkEpochCommittee(epoch:{epoch}) got \
                 nothing"
            )));
        }
        let src_comm = fetch_committee(ctx.source()?.as_ref(), epoch).await?;
        if !src_comm.equals_addresses(&addrs) {
            return Err(Error::LightClient(format!(
                "endsOfEpoch[1]=epoch:{epoch} addrs not match with {src_comm}"
            )));
        }
        tracing::info!("endsOfEpoch[1]=epoch:{epoch} matches {src_comm}");
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlockHandler for XMaintainer {
    fn name(&self) -> String {
        format!("XMAINTAIN_{}", self.target_name)
    }

    async fn confirm(&self, ctx: &RelayContext) -> Result<()> {
        let last_height = self.last_height(ctx).await?;
        tracing::info!("lastHeight of X-light-node: {last_height}");
        reconcile_cursor(ctx, last_height).await
    }

    async fn process_block(
        &self,
        ctx: &RelayContext,
        block: &Block,
    ) -> Result<()> {
        let comm = match Maintainer::announced_committee(block) {
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
            syncing_epoch: self.syncing_epoch(ctx).await,
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
    use tkm_relayer_types::{Address, ChainId};

    #[test]
    fn sync_cursor_key_tracks_target_and_chain() {
        let x = XMaintainer::new(
            XMaintainConfig {
                targetlc: Address::repeat_byte(9),
            },
            "HECO",
            ChainId(100),
        );
        assert_eq!(x.sync_cursor_key, "xsync_heco_start_100");
        assert_eq!(x.name(), "XMAINTAIN_HECO");
    }
}
