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

//! Wires one subcommand into a running mode: config overlay, logger,
//! connections, context, signal handling, then hands over to the engine or
//! the updater loop.

use std::sync::Arc;
use std::time::Duration;

use ethers::signers::Signer;
use ethers::types::U256;
use tkm_evm_client::EvmClient;
use tkm_relay_handlers::{
    Maintainer, Syncer, Updater, XMaintainer, XSyncer,
};
use tkm_relayer_config::{setup_logger, RelayerConfig};
use tkm_relayer_engine::{BlockHandler, Engine, RelayContext};
use tkm_relayer_store::{LockStore, RedisStore};
use tkm_relayer_utils::{exit_code, probe, Error, Result};
use tkm_source_client::{HttpSourceClient, SourceClient};

use crate::cli::{Cli, Command};
use crate::pem;

/// Runs the parsed command line to completion.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Maintain(args) => maintain(args).await,
        Command::Sync(args) => sync(args).await,
        Command::Update(args) => update(args).await,
        Command::Xmaintain(args) => xmaintain(args).await,
        Command::Xsync(args) => xsync(args).await,
        Command::Pem(args) => {
            setup_logger(None, "")?;
            pem::run(args)
        }
    }
}

async fn maintain(args: crate::cli::MaintainArgs) -> Result<()> {
    let config = args.common.build_config()?;
    setup_logger(config.log.as_deref(), "tkm_probe=debug")?;
    let section = args.section(&config)?;
    let handler = Maintainer::new(section, config.target.name.as_str());
    let ctx = build_context(Maintainer::MODE, config, true, true).await?;
    if args.common.check_ln_comm {
        handler.confirm(&ctx).await?;
        handler.check_comms(&ctx).await.map_err(|e| {
            Error::exit(exit_code::LIGHT_CLIENT, e.to_string())
        })?;
        return Err(Error::exit(0, "comms checked"));
    }
    Engine::new(ctx, handler).run().await
}

async fn sync(args: crate::cli::SyncArgs) -> Result<()> {
    let config = args.common.build_config()?;
    setup_logger(config.log.as_deref(), "tkm_probe=debug")?;
    let section = args.section(&config)?;
    let handler = Syncer::new(section, config.target.name.as_str());
    let ctx = build_context(Syncer::MODE, config, true, true).await?;
    Engine::new(ctx, handler).run().await
}

async fn update(args: crate::cli::UpdateArgs) -> Result<()> {
    let config = args.common.build_config()?;
    setup_logger(config.log.as_deref(), "tkm_probe=debug")?;
    let section = args.section(&config)?;
    // a pure postpone run only needs the store
    let needs_chains = section.postpone.is_none();
    let target_name = config.target.name.clone();
    let ctx =
        build_context(Updater::MODE, config, needs_chains, needs_chains)
            .await?;
    let updater = Updater::new(section, target_name);
    updater.confirm(&ctx).await?;
    updater.run(&ctx).await
}

async fn xmaintain(args: crate::cli::XMaintainArgs) -> Result<()> {
    let config = args.common.build_config()?;
    setup_logger(config.log.as_deref(), "tkm_probe=debug")?;
    let section = args.section(&config)?;
    let handler = XMaintainer::new(
        section,
        config.target.name.as_str(),
        config.source.chain_id(),
    );
    let ctx = build_context(XMaintainer::MODE, config, true, true).await?;
    if args.common.check_ln_comm {
        handler.confirm(&ctx).await?;
        handler.check_latest_comm(&ctx).await.map_err(|e| {
            Error::exit(exit_code::LIGHT_CLIENT, e.to_string())
        })?;
        return Err(Error::exit(0, "comms checked"));
    }
    Engine::new(ctx, handler).run().await
}

async fn xsync(args: crate::cli::XSyncArgs) -> Result<()> {
    let config = args.common.build_config()?;
    setup_logger(config.log.as_deref(), "tkm_probe=debug")?;
    let section = args.section(&config)?;
    let handler = XSyncer::new(section, config.target.name.as_str());
    let ctx = build_context(XSyncer::MODE, config, true, true).await?;
    Engine::new(ctx, handler).run().await
}

/// Connects everything a mode needs and assembles its context.
async fn build_context(
    mode: &str,
    config: RelayerConfig,
    need_source: bool,
    need_target: bool,
) -> Result<Arc<RelayContext>> {
    let wallet = pem::load_sender(&config.target)?;
    tracing::info!("target.sender: {:?}", wallet.address());

    let store = Arc::new(
        RedisStore::connect(&config.redis).await.map_err(|e| {
            Error::exit(
                exit_code::STORE,
                format!("connect redis at {} failed: {e}", config.redis),
            )
        })?,
    );
    tracing::info!("store server: {}", store.ping().await?);

    let source: Option<Arc<dyn SourceClient>> = if need_source {
        let client = HttpSourceClient::connect(
            &config.source.rpc,
            config.source.chain_id(),
        )
        .await
        .map_err(|e| Error::exit(exit_code::SOURCE, e.to_string()))?;
        Some(Arc::new(client))
    } else {
        None
    };

    let target = if need_target {
        let client = EvmClient::connect(
            &config.target.api,
            config.target.chainid.map(U256::from),
            Duration::from_secs(config.target.gpttl),
            Duration::from_secs(config.retry_interval),
            config.target.istkm,
        )
        .await
        .map_err(|e| Error::exit(exit_code::TARGET, e.to_string()))?;
        Some(Arc::new(client))
    } else {
        None
    };

    // EIP-155 signing needs the actual chain id on the wallet
    let wallet = match &target {
        Some(t) => wallet.with_chain_id(t.chain_id().as_u64()),
        None => wallet,
    };

    let ctx = Arc::new(RelayContext::new(
        mode, config, store, source, target, wallet,
    ));
    spawn_signal_handler(ctx.clone());
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        mode,
        token = %ctx.keys.runner_token,
    );
    Ok(ctx)
}

// SIGINT/SIGTERM cancel the root context; every blocking wait honors it
fn spawn_signal_handler(ctx: Arc<RelayContext>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let interrupt = signal(SignalKind::interrupt());
        let terminate = signal(SignalKind::terminate());
        let (mut interrupt, mut terminate) = match (interrupt, terminate) {
            (Ok(i), Ok(t)) => (i, t),
            _ => {
                tracing::error!("installing signal handlers failed");
                return;
            }
        };
        tokio::select! {
            _ = interrupt.recv() => {
                tracing::warn!("Interrupted (Ctrl+C) ...");
            }
            _ = terminate.recv() => {
                tracing::warn!("Got Terminate signal ...");
            }
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            shutdown = true,
        );
        ctx.shutdown();
    });
}
