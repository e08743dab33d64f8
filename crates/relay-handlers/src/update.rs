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

//! Update mode: no cursor, no proofs. On a canonical-time schedule (or once
//! for a forced epoch) the current source committee is pushed through the
//! admin entry point of the updatable light-client.
//!
//! Canonical time is `now - (now % interval)`: every replica computes the
//! same window boundaries, so whichever one holds the lease pushes and the
//! others find the persisted timestamp already advanced.

use std::time::Duration;

use tkm_relayer_config::UpdateConfig;
use tkm_relayer_engine::RelayContext;
use tkm_relayer_types::{Committee, EpochNum};
use tkm_relayer_utils::{exit_code, probe, Error, Result};
use tkm_source_client::fetch_committee;

use crate::contracts::{self, updatable};
use crate::{fetch_sending_lock, read_contract, send_and_wait};

fn now_secs() -> i64 {
    tkm_relayer_utils::expirable::now_millis() / 1000
}

/// The update mode policy.
pub struct Updater {
    cfg: UpdateConfig,
    target_name: String,
}

impl Updater {
    /// The mode tag used in store keys.
    pub const MODE: &'static str = "update";

    /// Builds the policy from its validated config section.
    pub fn new(cfg: UpdateConfig, target_name: impl Into<String>) -> Self {
        Self {
            cfg,
            target_name: target_name.into(),
        }
    }

    /// Handler tag for the logs.
    pub fn name(&self) -> String {
        format!("UPDATE_{}", self.target_name)
    }

    /// Startup checks: the light-client answers `lastEpoch` and the store
    /// serves the last-update timestamp.
    pub async fn confirm(&self, ctx: &RelayContext) -> Result<()> {
        if ctx.target().is_ok() {
            let last_epoch = self.last_epoch_in_lc(ctx).await?;
            tracing::info!(
                "lastEpoch of updatable light-node: {last_epoch}"
            );
        }
        let last_time = self.last_update_time(ctx).await?;
        tracing::info!("last update time: {last_time}");
        Ok(())
    }

    /// Runs the mode: postpone and force-epoch are one-shots, otherwise the
    /// canonical-time loop ticks until cancellation.
    pub async fn run(&self, ctx: &RelayContext) -> Result<()> {
        if let Some(postpone) = self.cfg.postpone {
            return self.postpone(ctx, postpone).await;
        }
        if let Some(epoch) = self.cfg.epoch {
            return self.force_epoch_once(ctx, EpochNum(epoch)).await;
        }
        if self.cfg.interval <= 1 {
            ctx.running_lock.fetch().await.map_err(|e| {
                Error::exit(
                    exit_code::RUNNING_LEASE,
                    format!("fetch {} failed: {e}", ctx.running_lock),
                )
            })?;
            let result = self.once(ctx).await;
            ctx.running_lock.release().await;
            return result;
        }
        self.canonical_loop(ctx).await
    }

    async fn canonical_loop(&self, ctx: &RelayContext) -> Result<()> {
        let interval = Duration::from_secs(ctx.config.interval);
        let cancel = ctx.cancel_token();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    ctx.release_locks().await;
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(interval) => {}
            }
            if let Err(e) = ctx.running_lock.fetch_or_refresh().await {
                tracing::debug!(
                    "fetch-refresh {} failed: {e}",
                    ctx.running_lock
                );
                continue;
            }
            match self.once(ctx).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    ctx.release_locks().await;
                    return Err(e);
                }
                Err(e) if e.keeps_leases() => {
                    tracing::warn!("update failed and not release locks: {e}");
                }
                Err(e) => {
                    tracing::error!("update failed and release locks: {e}");
                    ctx.release_locks().await;
                }
            }
        }
    }

    /// Adds `seconds` to the persisted last-update time without touching
    /// any chain; defers the next push window operationally.
    async fn postpone(&self, ctx: &RelayContext, seconds: u64) -> Result<()> {
        if seconds >= i64::MAX as u64 {
            return Err(Error::Input("too big for unix time".into()));
        }
        let last = self.last_update_time(ctx).await?;
        let updated = last.checked_add(seconds as i64).ok_or_else(|| {
            Error::Input("unix time overflow".into())
        })?;
        self.set_last_update_time(ctx, updated).await?;
        tracing::info!(
            "last update time from: {last} update to: {updated}"
        );
        Ok(())
    }

    async fn force_epoch_once(
        &self,
        ctx: &RelayContext,
        epoch: EpochNum,
    ) -> Result<()> {
        if epoch.is_nil() {
            return Err(Error::Input("nil epoch".into()));
        }
        ctx.running_lock.fetch().await.map_err(|e| {
            Error::exit(
                exit_code::RUNNING_LEASE,
                format!("fetch {} failed: {e}", ctx.running_lock),
            )
        })?;
        let result = async {
            let comm =
                fetch_committee(ctx.source()?.as_ref(), epoch).await?;
            self.force_update(ctx, epoch, &comm).await
        }
        .await;
        ctx.running_lock.release().await;
        result
    }

    /// One canonical-time check: push when the current window is newer than
    /// the persisted timestamp, rest otherwise.
    pub async fn once(&self, ctx: &RelayContext) -> Result<()> {
        let last = self.last_update_time(ctx).await?;
        let now = self.canonical_time();
        if now > last {
            let (epoch, comm) = self.current_committee(ctx).await?;
            self.force_update(ctx, epoch, &comm).await
        } else {
            tracing::debug!(
                "lastUpdate: {last}, canonical now: {now} next: {}, \
                 ignoring update",
                now + self.cfg.interval as i64
            );
            Ok(())
        }
    }

    fn canonical_time(&self) -> i64 {
        let now = now_secs();
        let interval = self.cfg.interval as i64;
        if interval <= 1 {
            now
        } else {
            now - now % interval
        }
    }

    async fn current_committee(
        &self,
        ctx: &RelayContext,
    ) -> Result<(EpochNum, Committee)> {
        let stats = ctx.source()?.chain_stats().await.map_err(|e| {
            Error::Source(format!("tkm stats failed: {e}"))
        })?;
        let epoch = stats.current_height.epoch(ctx.blocks_in_epoch());
        if epoch.is_nil() {
            return Err(Error::Source("invalid epoch".into()));
        }
        let comm = Committee::new(stats.current_comm);
        if !comm.is_available() {
            return Err(Error::Source(format!("invalid committee: {comm}")));
        }
        Ok((epoch, comm))
    }

    async fn last_epoch_in_lc(&self, ctx: &RelayContext) -> Result<EpochNum> {
        let out = read_contract(
            ctx,
            self.cfg.targetlc,
            updatable::encode_last_epoch(),
            &updatable::last_epoch_outputs(),
        )
        .await
        .map_err(|e| {
            Error::LightClient(format!(
                "updatable lightnode.lastEpoch failed: {e}"
            ))
        })?;
        Ok(out
            .first()
            .map(contracts::epoch_from_token)
            .unwrap_or(EpochNum::NIL))
    }

    async fn committee_in_lc(
        &self,
        ctx: &RelayContext,
        epoch: EpochNum,
    ) -> Result<Vec<tkm_relayer_types::Address>> {
        let out = read_contract(
            ctx,
            self.cfg.targetlc,
            updatable::encode_check_epoch_committee(epoch),
            &updatable::check_epoch_committee_outputs(),
        )
        .await
        .map_err(|e| {
            Error::LightClient(format!(
                "updatable lightnode.checkEpochCommittee failed: {e}"
            ))
        })?;
        Ok(out
            .first()
            .map(crate::addresses_from_token)
            .unwrap_or_default())
    }

    /// Pushes `(epoch, comm)` unless the light-client already stores the
    /// same committee for that epoch; either way the rest window advances.
    async fn force_update(
        &self,
        ctx: &RelayContext,
        epoch: EpochNum,
        comm: &Committee,
    ) -> Result<()> {
        if epoch.is_nil() || !comm.is_available() {
            return Err(Error::Source(format!(
                "{{Epoch:{epoch} {comm}}} not available"
            )));
        }
        tracing::info!("about to update {{Epoch:{epoch} {comm}}} to target");
        match self.last_epoch_in_lc(ctx).await {
            Err(e) => tracing::warn!("check target last epoch failed: {e}"),
            Ok(last_epoch) if last_epoch > epoch && !last_epoch.is_nil() => {
                tracing::warn!(
                    "updating an older data {{Epoch:{epoch} {comm}}} to \
                     LC.lastEpoch:{last_epoch}"
                );
            }
            Ok(last_epoch) if last_epoch == epoch => {
                match self.committee_in_lc(ctx, epoch).await {
                    Err(e) => tracing::warn!(
                        "check target last committee on Epoch:{epoch} \
                         failed: {e}"
                    ),
                    Ok(addrs) if comm.equals_addresses(&addrs) => {
                        tracing::warn!(
                            "{{Epoch:{epoch} {comm}}} equals data in LC, \
                             ignoring update"
                        );
                        return self.advance_rest_window(ctx).await;
                    }
                    Ok(_) => tracing::warn!(
                        "epoch same but Comm not match: {comm}"
                    ),
                }
            }
            Ok(_) => {}
        }
        self.update_committee(ctx, epoch, comm)
            .await
            .map_err(|e| match e {
                e if e.is_fatal() => e,
                other => Error::Target(format!(
                    "update current comm failed: {other}"
                )),
            })?;
        self.advance_rest_window(ctx).await
    }

    async fn update_committee(
        &self,
        ctx: &RelayContext,
        epoch: EpochNum,
        comm: &Committee,
    ) -> Result<()> {
        fetch_sending_lock(ctx).await?;
        let result = async {
            let input = updatable::encode_update_committee(
                epoch,
                &comm.members,
            );
            let receipt =
                send_and_wait(ctx, self.cfg.targetlc, input).await?;
            let event = contracts::find_update_event(&receipt.logs)?;
            if event.epoch != epoch {
                return Err(Error::EventMismatch(format!(
                    "want Epoch:{epoch}, got:{event}"
                )));
            }
            let comm_hash = comm.hash();
            if event.comm_hash != comm_hash {
                return Err(Error::EventMismatch(format!(
                    "want Comm:{comm_hash:x}, got:{event}"
                )));
            }
            tracing::info!("{{Epoch:{epoch} {comm}}} updated {event}");
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Committee,
                epoch = epoch.0,
                admin = true,
            );
            Ok(())
        }
        .await;
        ctx.sending_lock.release().await;
        result
    }

    // persisted with a small cushion so the window that just closed cannot
    // re-fire on a clock wobble
    async fn advance_rest_window(&self, ctx: &RelayContext) -> Result<()> {
        let updated = now_secs() + 10;
        self.set_last_update_time(ctx, updated).await?;
        tracing::info!("last update time set to: {updated}");
        Ok(())
    }

    /// The persisted last-update timestamp, 0 when absent.
    async fn last_update_time(&self, ctx: &RelayContext) -> Result<i64> {
        Ok(ctx
            .store
            .get_i64(&ctx.keys.last_update)
            .await
            .map_err(|e| {
                Error::exit(
                    exit_code::STORE,
                    format!("get last time failed: {e}"),
                )
            })?
            .unwrap_or(0))
    }

    async fn set_last_update_time(
        &self,
        ctx: &RelayContext,
        value: i64,
    ) -> Result<()> {
        ctx.store
            .set_i64(&ctx.keys.last_update, value)
            .await
            .map_err(|e| {
                Error::exit(
                    exit_code::STORE,
                    format!("last update time failed in setting: {e}"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tkm_relayer_types::Address;

    fn updater(interval: u64) -> Updater {
        Updater::new(
            UpdateConfig {
                interval,
                targetlc: Address::repeat_byte(0x0c),
                epoch: None,
                postpone: None,
            },
            "BSC",
        )
    }

    #[test]
    fn canonical_time_is_window_aligned() {
        let u = updater(3600);
        let t = u.canonical_time();
        assert_eq!(t % 3600, 0);
        assert!(t <= now_secs());
        assert!(now_secs() - t < 3600);
    }

    #[test]
    fn tiny_interval_means_now() {
        let u = updater(1);
        let before = now_secs();
        let t = u.canonical_time();
        assert!(t >= before && t <= now_secs());
    }
}
