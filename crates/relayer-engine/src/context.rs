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

use std::sync::Arc;
use std::time::Duration;

use ethers::signers::{LocalWallet, Signer};
use tkm_evm_client::EvmClient;
use tkm_relayer_config::RelayerConfig;
use tkm_relayer_store::{CompoundLease, Lease, LockStore, RuntimeKeys};
use tkm_relayer_types::{Address, ChainId, Height};
use tkm_relayer_utils::{Error, Result};
use tkm_source_client::SourceClient;
use tokio_util::sync::CancellationToken;

/// Everything one relay process holds for the lifetime of its mode: the
/// configuration, the store with the two leases, the chain clients, the
/// signer and the root cancellation token.
///
/// Depending on the mode not every collaborator is connected (a `postpone`
/// run touches only the store); the accessors make a missing one a target or
/// source error instead of a panic.
pub struct RelayContext {
    /// The immutable configuration.
    pub config: RelayerConfig,
    /// The key/lock store.
    pub store: Arc<dyn LockStore>,
    /// The derived store keys of this stream.
    pub keys: RuntimeKeys,
    /// The runner lease guarding cursor advancement.
    pub running_lock: Arc<Lease>,
    /// The sender lease serializing tx submission for this signer.
    pub sending_lock: Arc<Lease>,
    source: Option<Arc<dyn SourceClient>>,
    target: Option<Arc<EvmClient>>,
    wallet: LocalWallet,
    cancel: CancellationToken,
}

impl RelayContext {
    /// Builds the context for `mode`, deriving the store keys and leases.
    pub fn new(
        mode: &str,
        config: RelayerConfig,
        store: Arc<dyn LockStore>,
        source: Option<Arc<dyn SourceClient>>,
        target: Option<Arc<EvmClient>>,
        wallet: LocalWallet,
    ) -> Self {
        let target_chain = config
            .target
            .chainid
            .or_else(|| {
                target.as_ref().map(|t| t.chain_id().as_u64())
            })
            .unwrap_or_default();
        let keys = RuntimeKeys::derive(
            mode,
            &config.target.name,
            config.source.chain_id(),
            target_chain,
            wallet.address(),
        );
        tracing::info!("{keys}");
        let running_lock = Arc::new(Lease::new(
            store.clone(),
            keys.runner_lock.clone(),
            keys.runner_token.clone(),
            Duration::from_secs(config.running_lock_ttl),
        ));
        let sending_lock = Arc::new(Lease::new(
            store.clone(),
            keys.sender_lock.clone(),
            keys.runner_token.clone(),
            Duration::from_secs(config.sending_lock_ttl),
        ));
        Self {
            config,
            store,
            keys,
            running_lock,
            sending_lock,
            source,
            target,
            wallet,
            cancel: CancellationToken::new(),
        }
    }

    /// The source client; a source error when this mode runs without one.
    pub fn source(&self) -> Result<&Arc<dyn SourceClient>> {
        self.source
            .as_ref()
            .ok_or_else(|| Error::Source("source not connected".into()))
    }

    /// The target client; a target error when this mode runs without one.
    pub fn target(&self) -> Result<&Arc<EvmClient>> {
        self.target
            .as_ref()
            .ok_or_else(|| Error::Target("target not connected".into()))
    }

    /// The signing wallet.
    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }

    /// The sender address of this process.
    pub fn sender(&self) -> Address {
        self.wallet.address()
    }

    /// The source chain this stream reads.
    pub fn src_chain(&self) -> ChainId {
        self.config.source.chain_id()
    }

    /// Blocks per epoch on the source chain.
    pub fn blocks_in_epoch(&self) -> u64 {
        self.config.source.blocksinepoch
    }

    /// The root cancellation token; cloned into every long wait.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the process is shutting down.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels the root context; every blocking wait unwinds.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Both leases bundled for receipt-poll keepalive.
    pub fn locks(&self) -> CompoundLease {
        CompoundLease::new(vec![
            self.running_lock.clone(),
            self.sending_lock.clone(),
        ])
    }

    /// The persisted cursor, or the configured start height when the store
    /// has no (readable) value.
    pub async fn cursor(&self) -> Height {
        match self.store.get_u64(&self.keys.cursor).await {
            Ok(Some(h)) => Height(h),
            _ => Height(self.config.source.start),
        }
    }

    /// Persists the cursor.
    pub async fn set_cursor(&self, height: Height) -> Result<()> {
        self.store.set_u64(&self.keys.cursor, height.0).await
    }

    /// Releases both leases so a peer can take over.
    pub async fn release_locks(&self) {
        self.running_lock.release().await;
        self.sending_lock.release().await;
    }
}
