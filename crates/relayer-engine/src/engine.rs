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

use tkm_relayer_types::{Block, Height, RpcBlocks};
use tkm_relayer_utils::{probe, Error, Result};

use crate::context::RelayContext;

/// The per-mode policy consumed by the [`Engine`]: what to check before a
/// batch is fetched and what to do with each block.
#[async_trait::async_trait]
pub trait BlockHandler: Send + Sync {
    /// Handler tag for the logs, e.g. `MAINTAIN_BSC`.
    fn name(&self) -> String;

    /// Startup checks once all connections exist. Runs before the first
    /// tick; a failure here terminates the process.
    async fn confirm(&self, ctx: &RelayContext) -> Result<()>;

    /// Guard before fetching a batch at `start`. A
    /// [`Error::Backpressure`] here skips the tick while keeping the
    /// leases.
    async fn prepare_to_get(
        &self,
        _ctx: &RelayContext,
        _start: Height,
    ) -> Result<()> {
        Ok(())
    }

    /// Whether the batch should be processed at all.
    async fn prepare_blocks(
        &self,
        _ctx: &RelayContext,
        _blocks: &RpcBlocks,
    ) -> Result<bool> {
        Ok(true)
    }

    /// One block. An error fails the iteration; the engine's error routing
    /// decides about the leases. Handlers log-and-swallow conditions that
    /// must not stop the cursor.
    async fn process_block(
        &self,
        ctx: &RelayContext,
        block: &Block,
    ) -> Result<()>;
}

/// The cursor loop: under the runner lease, advance a per-stream height
/// cursor across the source chain and feed every block to the handler.
pub struct Engine<H: BlockHandler> {
    ctx: Arc<RelayContext>,
    handler: H,
}

impl<H: BlockHandler> Engine<H> {
    /// Wires a handler to its context.
    pub fn new(ctx: Arc<RelayContext>, handler: H) -> Self {
        Self { ctx, handler }
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<RelayContext> {
        &self.ctx
    }

    /// The mode handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Runs the mode until cancellation or a fatal error. Startup checks
    /// run first; afterwards every `interval` seconds one tick attempts to
    /// take (or keep) leadership and iterate blocks.
    pub async fn run(&self) -> Result<()> {
        self.handler.confirm(&self.ctx).await?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            handler = %self.handler.name(),
            started = true,
        );
        let interval = Duration::from_secs(self.ctx.config.interval);
        let cancel = self.ctx.cancel_token();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.ctx.release_locks().await;
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(interval) => {}
            }
            if let Some(fatal) = self.tick().await {
                self.ctx.release_locks().await;
                return Err(fatal);
            }
        }
    }

    /// One timer firing: take or keep the runner lease, then iterate.
    /// Returns the error only when it must terminate the process.
    pub async fn tick(&self) -> Option<Error> {
        if let Err(e) = self.ctx.running_lock.fetch_or_refresh().await {
            tracing::debug!(
                "fetch-refresh {} failed: {e}",
                self.ctx.running_lock
            );
            return None;
        }
        match self.iterate_blocks().await {
            Ok(()) => None,
            Err(e) if e.is_fatal() => Some(e),
            Err(e) if e.keeps_leases() => {
                tracing::warn!(
                    "iterate blocks failed and not release locks: {e}"
                );
                None
            }
            Err(e) => {
                tracing::error!("iterate blocks failed and release locks: {e}");
                // release so another replica can take over, or so this one
                // rejoins cleanly once its connection recovers
                self.ctx.release_locks().await;
                None
            }
        }
    }

    /// Fetches and processes batches from the persisted cursor until the
    /// stream catches up with the source tip.
    async fn iterate_blocks(&self) -> Result<()> {
        let mut start = self.ctx.cursor().await;
        if start.is_nil() {
            start = Height(0);
        }
        loop {
            if self.ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let _ = self.ctx.running_lock.refresh().await;
            self.handler.prepare_to_get(&self.ctx, start).await?;
            let batch = self
                .ctx
                .source()?
                .get_blocks(self.ctx.src_chain(), start)
                .await?;
            let Some(blocks) = batch else {
                return Ok(());
            };
            tracing::info!("get {} starting at {}", blocks, start);
            let next = self.process_blocks(&blocks).await?;
            if next.is_nil() {
                return Ok(());
            }
            if next >= start {
                start = next;
                if let Err(e) = self.ctx.set_cursor(start).await {
                    tracing::warn!(
                        "update start height to {start} failed: {e}"
                    );
                }
            } else {
                tracing::warn!(
                    "handler next height ({next}) less than start ({start})"
                );
            }
            if start > blocks.current {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Processes one batch block by block, persisting the cursor after
    /// every handled block so a crash loses at most the current block's
    /// (idempotent) work.
    async fn process_blocks(&self, blocks: &RpcBlocks) -> Result<Height> {
        if !self.handler.prepare_blocks(&self.ctx, blocks).await? {
            return Ok(Height::NIL);
        }
        if blocks.blocks.is_empty() {
            return Ok(Height::NIL);
        }
        let mut start = blocks.blocks[0].header.height;
        let total = blocks.blocks.len();
        for (i, block) in blocks.blocks.iter().enumerate() {
            if self.ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.handler.process_block(&self.ctx, block).await.map_err(
                |e| match e {
                    // backpressure and exit-class errors bubble untouched,
                    // the tick routing must still see their class
                    Error::Backpressure(_) => e,
                    e if e.is_fatal() => e,
                    other => Error::Source(format!(
                        "processing {i}/{total} {block} fatal: {other}"
                    )),
                },
            )?;
            start = block.header.height.add(1);
            if let Err(e) = self.ctx.set_cursor(start).await {
                tracing::warn!(
                    "{i}/{total}: update start height to {start} failed: {e}"
                );
            }
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::TRACE,
                kind = %probe::Kind::RelayLoop,
                height = block.header.height.0,
                cursor = start.0,
            );
        }
        Ok(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::core::k256::ecdsa::SigningKey;
    use ethers::signers::LocalWallet;
    use parking_lot::Mutex;
    use tkm_relayer_config::RelayerConfig;
    use tkm_relayer_store::{InMemoryStore, LockStore};
    use tkm_relayer_types::{
        AccountInfo, BlockHeader, ChainId, ChainStats, Confirmeds, EpochNum,
        Hash, NodeId, TxFinalProof,
    };
    use tkm_source_client::SourceClient;

    fn config() -> RelayerConfig {
        let yaml = r#"
source:
  rpc: "http://127.0.0.1:9001"
  chainid: 3
  start: 100
target:
  name: "BSC"
  api: "http://127.0.0.1:8545"
  chainid: 56
  senderkey: "unused-in-tests"
"#;
        serde_yaml::from_str(yaml).expect("config")
    }

    fn wallet() -> LocalWallet {
        LocalWallet::from(SigningKey::from_slice(&[7u8; 32]).unwrap())
    }

    fn block(chain: u32, height: u64) -> Block {
        Block {
            header: BlockHeader {
                chain_id: ChainId(chain),
                height: Height(height),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Serves pre-loaded batches keyed by the requested start height.
    #[derive(Default)]
    struct MockSource {
        batches: Mutex<Vec<RpcBlocks>>,
    }

    #[async_trait::async_trait]
    impl SourceClient for MockSource {
        async fn get_blocks(
            &self,
            _chain: ChainId,
            from: Height,
        ) -> Result<Option<RpcBlocks>> {
            let mut batches = self.batches.lock();
            match batches.first() {
                Some(b) if b.blocks[0].header.height <= from => {
                    Ok(Some(batches.remove(0)))
                }
                _ => Ok(None),
            }
        }

        async fn tx_final_proof(
            &self,
            _: ChainId,
            _: Hash,
            _: Height,
        ) -> Result<TxFinalProof> {
            unimplemented!("not used by the engine")
        }

        async fn tx_local_proof(
            &self,
            _: ChainId,
            _: Hash,
        ) -> Result<TxFinalProof> {
            unimplemented!("not used by the engine")
        }

        async fn chain_stats(&self) -> Result<ChainStats> {
            Ok(ChainStats::default())
        }

        async fn committee(&self, _: EpochNum) -> Result<Vec<NodeId>> {
            Ok(Vec::new())
        }

        async fn last_confirmeds_at(
            &self,
            _: ChainId,
            _: Height,
        ) -> Result<Confirmeds> {
            Ok(Confirmeds::default())
        }

        async fn account(
            &self,
            _: tkm_relayer_types::Address,
        ) -> Result<AccountInfo> {
            Ok(AccountInfo::default())
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<u64>>,
        /// heights at or above this value trigger backpressure
        max_provable: Option<u64>,
        /// fail processing of exactly this height
        fail_at: Option<u64>,
    }

    #[async_trait::async_trait]
    impl BlockHandler for RecordingHandler {
        fn name(&self) -> String {
            "TEST_ENGINE".into()
        }

        async fn confirm(&self, _ctx: &RelayContext) -> Result<()> {
            Ok(())
        }

        async fn prepare_to_get(
            &self,
            _ctx: &RelayContext,
            start: Height,
        ) -> Result<()> {
            if let Some(max) = self.max_provable {
                if start.0 > max {
                    return Err(Error::Backpressure(format!(
                        "max provable height exceeded: Max:{max}, \
                         but start:{start}"
                    )));
                }
            }
            Ok(())
        }

        async fn process_block(
            &self,
            _ctx: &RelayContext,
            block: &Block,
        ) -> Result<()> {
            if self.fail_at == Some(block.header.height.0) {
                return Err(Error::Target("send tx failed".into()));
            }
            self.seen.lock().push(block.header.height.0);
            Ok(())
        }
    }

    fn engine_with(
        store: Arc<InMemoryStore>,
        source: MockSource,
        handler: RecordingHandler,
    ) -> Engine<RecordingHandler> {
        let ctx = RelayContext::new(
            "TEST",
            config(),
            store,
            Some(Arc::new(source)),
            None,
            wallet(),
        );
        Engine::new(Arc::new(ctx), handler)
    }

    #[tokio::test]
    async fn cursor_advances_past_each_processed_block() {
        let store = Arc::new(InMemoryStore::default());
        let source = MockSource::default();
        source.batches.lock().push(RpcBlocks {
            chain_id: ChainId(3),
            current: Height(102),
            blocks: vec![block(3, 100), block(3, 101), block(3, 102)],
        });
        let engine = engine_with(store.clone(), source, Default::default());

        assert!(engine.tick().await.is_none());
        assert_eq!(*engine.handler().seen.lock(), vec![100, 101, 102]);
        let cursor = store
            .get_u64(&engine.context().keys.cursor)
            .await
            .unwrap();
        assert_eq!(cursor, Some(103));
        // leader keeps its lease after a clean iteration
        assert!(engine.context().running_lock.is_held().await);
    }

    #[tokio::test]
    async fn cursor_is_monotonic_across_ticks() {
        let store = Arc::new(InMemoryStore::default());
        let source = MockSource::default();
        {
            let mut batches = source.batches.lock();
            batches.push(RpcBlocks {
                chain_id: ChainId(3),
                current: Height(101),
                blocks: vec![block(3, 100), block(3, 101)],
            });
            batches.push(RpcBlocks {
                chain_id: ChainId(3),
                current: Height(102),
                blocks: vec![block(3, 102)],
            });
        }
        let engine = engine_with(store.clone(), source, Default::default());
        let key = engine.context().keys.cursor.clone();

        let mut last = 0u64;
        for _ in 0..3 {
            assert!(engine.tick().await.is_none());
            let cursor =
                store.get_u64(&key).await.unwrap().unwrap_or_default();
            assert!(cursor >= last, "cursor went backwards: {cursor} < {last}");
            last = cursor;
        }
        assert_eq!(last, 103);
    }

    #[tokio::test]
    async fn backpressure_keeps_leases_and_cursor() {
        let store = Arc::new(InMemoryStore::default());
        let source = MockSource::default();
        source.batches.lock().push(RpcBlocks {
            chain_id: ChainId(3),
            current: Height(200),
            blocks: vec![block(3, 100)],
        });
        let handler = RecordingHandler {
            max_provable: Some(99),
            ..Default::default()
        };
        let engine = engine_with(store.clone(), source, handler);

        assert!(engine.tick().await.is_none());
        // nothing processed, nothing persisted, lease retained
        assert!(engine.handler().seen.lock().is_empty());
        let cursor = store
            .get_u64(&engine.context().keys.cursor)
            .await
            .unwrap();
        assert_eq!(cursor, None);
        assert!(engine.context().running_lock.is_held().await);
    }

    #[tokio::test]
    async fn block_failure_releases_leases_but_keeps_progress() {
        let store = Arc::new(InMemoryStore::default());
        let source = MockSource::default();
        source.batches.lock().push(RpcBlocks {
            chain_id: ChainId(3),
            current: Height(102),
            blocks: vec![block(3, 100), block(3, 101), block(3, 102)],
        });
        let handler = RecordingHandler {
            fail_at: Some(101),
            ..Default::default()
        };
        let engine = engine_with(store.clone(), source, handler);

        assert!(engine.tick().await.is_none());
        // the first block's work survived the failure
        assert_eq!(*engine.handler().seen.lock(), vec![100]);
        let cursor = store
            .get_u64(&engine.context().keys.cursor)
            .await
            .unwrap();
        assert_eq!(cursor, Some(101));
        // both leases were released so a peer can take over
        assert!(!engine.context().running_lock.is_held().await);
        assert!(!engine.context().sending_lock.is_held().await);
    }

    #[tokio::test]
    async fn busy_runner_lease_skips_the_tick() {
        let store = Arc::new(InMemoryStore::default());
        let source = MockSource::default();
        source.batches.lock().push(RpcBlocks {
            chain_id: ChainId(3),
            current: Height(100),
            blocks: vec![block(3, 100)],
        });
        let engine = engine_with(store.clone(), source, Default::default());
        // another replica owns the runner lease
        let key = engine.context().keys.runner_lock.clone();
        assert!(store
            .obtain_lease(&key, "10.9.9.9@1", Duration::from_secs(30))
            .await
            .unwrap());

        assert!(engine.tick().await.is_none());
        assert!(engine.handler().seen.lock().is_empty());
    }

    #[tokio::test]
    async fn takeover_continues_from_persisted_cursor() {
        let store = Arc::new(InMemoryStore::default());

        // replica A processes the first batch, then dies (lease released)
        let source_a = MockSource::default();
        source_a.batches.lock().push(RpcBlocks {
            chain_id: ChainId(3),
            current: Height(150),
            blocks: vec![block(3, 100), block(3, 101)],
        });
        let a = engine_with(store.clone(), source_a, Default::default());
        assert!(a.tick().await.is_none());
        a.context().release_locks().await;

        // replica B starts at A's cursor, not at the configured start
        let source_b = MockSource::default();
        source_b.batches.lock().push(RpcBlocks {
            chain_id: ChainId(3),
            current: Height(150),
            blocks: vec![block(3, 102)],
        });
        let b = engine_with(store.clone(), source_b, Default::default());
        assert!(b.tick().await.is_none());
        assert_eq!(*b.handler().seen.lock(), vec![102]);
    }

    #[tokio::test]
    async fn cancellation_is_fatal() {
        let store = Arc::new(InMemoryStore::default());
        let source = MockSource::default();
        source.batches.lock().push(RpcBlocks {
            chain_id: ChainId(3),
            current: Height(100),
            blocks: vec![block(3, 100)],
        });
        let engine = engine_with(store, source, Default::default());
        engine.context().shutdown();
        match engine.tick().await {
            Some(Error::Cancelled) => {}
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
}
