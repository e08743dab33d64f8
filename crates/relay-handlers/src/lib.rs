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

//! # Relay Handlers
//!
//! The five relay mode policies. Four of them (`maintain`, `sync`,
//! `xmaintain`, `xsync`) plug into the shared cursor engine as
//! [`BlockHandler`](tkm_relayer_engine::BlockHandler)s; `update` drives its
//! own canonical-time loop without a cursor.

use ethers::abi::Token;
use ethers::types::{TransactionReceipt, U256};
use tkm_evm_client::receipt_success;
use tkm_relayer_engine::RelayContext;
use tkm_relayer_types::{Address, EpochNum, Hash, Height};
use tkm_relayer_utils::{Error, Result};

/// Call data and event plumbing for the target contracts.
pub mod contracts;
/// Committee rotations from the TKM main chain.
pub mod maintain;
/// Transfer-event relay from a TKM sub-chain.
pub mod sync;
/// Periodic admin committee pushes.
pub mod update;
/// Committee rotations from an X-Relay chain.
pub mod xmaintain;
/// Transfer-event relay from an X-Relay chain.
pub mod xsync;

pub use maintain::Maintainer;
pub use sync::Syncer;
pub use update::Updater;
pub use xmaintain::XMaintainer;
pub use xsync::XSyncer;

/// The target chain id this deployment relays into.
pub(crate) fn target_chain_id(ctx: &RelayContext) -> U256 {
    match ctx.config.target.chainid {
        Some(id) => U256::from(id),
        None => ctx
            .target()
            .map(|t| t.chain_id())
            .unwrap_or_default(),
    }
}

/// Takes the sender lease, translating contention into a block-level target
/// error (release-and-retry class).
pub(crate) async fn fetch_sending_lock(ctx: &RelayContext) -> Result<()> {
    ctx.sending_lock.fetch().await.map_err(|e| match e {
        Error::LeaseBusy { key, holder } => Error::Target(format!(
            "[{holder}] is sending, fetch Lease{{{key}}} failed"
        )),
        other => other,
    })
}

/// Reads a contract from the sender account.
pub(crate) async fn read_contract(
    ctx: &RelayContext,
    to: Address,
    data: Vec<u8>,
    outputs: &[ethers::abi::ParamType],
) -> Result<Vec<Token>> {
    ctx.target()?
        .getter(ctx.sender(), to, data, outputs)
        .await
}

/// Decodes an `address[]` return value.
pub(crate) fn addresses_from_token(token: &Token) -> Vec<Address> {
    match token {
        Token::Array(items) => items
            .iter()
            .filter_map(|t| match t {
                Token::Address(a) => Some(*a),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Submits `input` to `to` as one legacy tx and waits for its receipt while
/// keeping both leases alive. The caller must hold the sender lease.
pub(crate) async fn send_and_wait(
    ctx: &RelayContext,
    to: Address,
    input: Vec<u8>,
) -> Result<TransactionReceipt> {
    let target = ctx.target()?;
    let (gas, must_have) = target.suggest_balance().await;
    let nonce = target
        .nonce_with_min_balance(
            ctx.sender(),
            ctx.config.target.checkbalance,
            must_have,
        )
        .await?;
    let tx_hash = target
        .send_legacy_tx(ctx.wallet(), to, nonce, gas, None, None, input)
        .await
        .map_err(|e| Error::Target(format!("send tx failed: {e}")))?;
    tracing::info!("update comm TxHash: {tx_hash:?}");
    let locks = ctx.locks();
    let receipt = target
        .poll_receipt(&ctx.cancel_token(), &locks, tx_hash)
        .await
        .map_err(|e| match e {
            Error::Cancelled => Error::Cancelled,
            other => Error::Target(format!("get receipt failed: {other}")),
        })?;
    if !receipt_success(&receipt) {
        return Err(Error::TxFailed(tx_hash));
    }
    Ok(receipt)
}

/// Asserts that a rotation moved the light-client exactly one epoch past
/// the electing header and stored the elected committee.
pub(crate) fn assert_rotation_event(
    event: &contracts::UpdateEvent,
    header_epoch: EpochNum,
    elected_next_root: Option<Hash>,
) -> Result<()> {
    if event.epoch != header_epoch.next() {
        return Err(Error::EventMismatch(format!(
            "want Epoch:{}, got:{event}",
            header_epoch
        )));
    }
    if elected_next_root != Some(event.comm_hash) {
        return Err(Error::EventMismatch(format!(
            "want Comm:{:?}, got:{event}",
            elected_next_root
        )));
    }
    Ok(())
}

/// Aligns the persisted cursor with the light-client's `lastHeight` at
/// startup: a cursor behind `lastHeight + 1` is advanced with a warning, a
/// cursor a full epoch ahead of it fails startup.
pub(crate) async fn reconcile_cursor(
    ctx: &RelayContext,
    last_height: Height,
) -> Result<()> {
    let new_height = last_height.add(1);
    let start = ctx.cursor().await;
    let (diff, cmp) = start.diff(new_height);
    match cmp {
        std::cmp::Ordering::Less => {
            tracing::warn!(
                "replace start height from:{start} to \
                 light-node.lastHeight+1: {new_height}"
            );
            ctx.set_cursor(new_height).await.map_err(|e| {
                Error::Store(format!(
                    "update start height ({new_height}) failed: {e}"
                ))
            })?;
        }
        std::cmp::Ordering::Greater
            if diff >= ctx.blocks_in_epoch() =>
        {
            return Err(Error::LightClient(format!(
                "startHeight:{start} but light-node.lastHeight:{last_height}"
            )));
        }
        _ => {}
    }
    tracing::info!("start height: {}", ctx.cursor().await);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::core::k256::ecdsa::SigningKey;
    use ethers::signers::LocalWallet;
    use std::sync::Arc;
    use tkm_relayer_config::RelayerConfig;
    use tkm_relayer_store::InMemoryStore;
    use tkm_relayer_types::keccak256;

    #[test]
    fn rotation_event_assertions() {
        let root = keccak256(b"comm");
        let event = contracts::UpdateEvent {
            epoch: EpochNum(8),
            comm_hash: root,
        };
        assert!(assert_rotation_event(&event, EpochNum(7), Some(root)).is_ok());
        // wrong epoch distance
        assert!(
            assert_rotation_event(&event, EpochNum(8), Some(root)).is_err()
        );
        assert!(
            assert_rotation_event(&event, EpochNum(6), Some(root)).is_err()
        );
        // wrong committee hash
        assert!(assert_rotation_event(
            &event,
            EpochNum(7),
            Some(keccak256(b"other"))
        )
        .is_err());
        assert!(assert_rotation_event(&event, EpochNum(7), None).is_err());
    }

    fn context() -> RelayContext {
        let mut config = RelayerConfig::seed();
        config.source.start = 100;
        config.target.name = "BSC".into();
        config.target.chainid = Some(56);
        let wallet =
            LocalWallet::from(SigningKey::from_slice(&[5u8; 32]).unwrap());
        RelayContext::new(
            "maintain",
            config,
            Arc::new(InMemoryStore::default()),
            None,
            None,
            wallet,
        )
    }

    #[tokio::test]
    async fn startup_cursor_jumps_to_light_client_head() {
        let ctx = context();
        // no cursor yet, the light-client is already at 120
        reconcile_cursor(&ctx, Height(120)).await.expect("reconcile");
        assert_eq!(ctx.cursor().await, Height(121));
    }

    #[tokio::test]
    async fn cursor_slightly_ahead_is_left_alone() {
        let ctx = context();
        ctx.set_cursor(Height(500)).await.unwrap();
        reconcile_cursor(&ctx, Height(120)).await.expect("reconcile");
        assert_eq!(ctx.cursor().await, Height(500));
    }

    #[tokio::test]
    async fn cursor_a_full_epoch_ahead_fails_startup() {
        let ctx = context();
        ctx.set_cursor(Height(1200)).await.unwrap();
        let err = reconcile_cursor(&ctx, Height(120)).await.unwrap_err();
        assert!(matches!(err, Error::LightClient(_)));
    }

    #[test]
    fn address_array_decoding_ignores_junk() {
        let token = Token::Array(vec![
            Token::Address(Address::repeat_byte(1)),
            Token::Bool(true),
            Token::Address(Address::repeat_byte(2)),
        ]);
        let addrs = addresses_from_token(&token);
        assert_eq!(
            addrs,
            vec![Address::repeat_byte(1), Address::repeat_byte(2)]
        );
        assert!(addresses_from_token(&Token::Bool(false)).is_empty());
    }
}
