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

//! The command line surface: six subcommands sharing the BASIC / SOURCE /
//! TARGET flag groups, each mirroring one section of the YAML config file.
//! Flags override file values.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tkm_relayer_config::{
    MaintainConfig, RelayerConfig, SyncConfig, UpdateConfig, XMaintainConfig,
    XSyncConfig,
};
use tkm_relayer_types::Address;
use tkm_relayer_utils::{Error, Result};

/// Maintain light-node or mcs on ethereum-like chains.
#[derive(Debug, Parser)]
#[command(name = "tkm-relayer", version, about)]
pub struct Cli {
    /// The mode to run.
    #[command(subcommand)]
    pub command: Command,
}

/// One process runs exactly one mode.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Maintain the TKM Light Node on Ethereum-like chains.
    #[command(visible_alias = "mt")]
    Maintain(MaintainArgs),
    /// Synchronize TKM txs carrying the mapTransferOut event to
    /// Ethereum-like chains.
    #[command(visible_alias = "sc")]
    Sync(SyncArgs),
    /// Use the admin account to update committee info in the updatable TKM
    /// Light Node.
    #[command(visible_alias = "u")]
    Update(UpdateArgs),
    /// Maintain the X-Relay Light Node on Ethereum-like 3rd-party chains.
    #[command(visible_alias = "xm")]
    Xmaintain(XMaintainArgs),
    /// Synchronize X-Relay txs carrying the mapTransferOut event to
    /// Ethereum-like 3rd-party chains.
    #[command(visible_alias = "xs")]
    Xsync(XSyncArgs),
    /// Generate or inspect a PEM-encoded PKCS#8 private key file.
    #[command(visible_alias = "p")]
    Pem(PemArgs),
}

/// BASIC / SOURCE / TARGET flags shared by every relay mode.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Configuration FILE in YAML format.
    #[arg(short = 'f', long = "config", value_name = "FILE", help_heading = "BASIC")]
    pub config: Option<PathBuf>,

    /// Redis server address.
    #[arg(long, value_name = "URI", help_heading = "BASIC")]
    pub redis: Option<String>,

    /// TTL of the runner lease in redis (seconds).
    #[arg(long = "runningLockTTL", value_name = "SECONDS", help_heading = "BASIC")]
    pub running_lock_ttl: Option<u64>,

    /// TTL of the sender lease in redis (seconds).
    #[arg(long = "sendingLockTTL", value_name = "SECONDS", help_heading = "BASIC")]
    pub sending_lock_ttl: Option<u64>,

    /// The interval for reading block information from the source chain
    /// (seconds).
    #[arg(long, value_name = "SECONDS", help_heading = "BASIC")]
    pub interval: Option<u64>,

    /// The interval for repeatedly reading receipts on the target chain
    /// (seconds).
    #[arg(long = "retryInterval", value_name = "SECONDS", help_heading = "BASIC")]
    pub retry_interval: Option<u64>,

    /// Log to PATH (the pid is appended).
    #[arg(short = 'l', long, value_name = "PATH", help_heading = "BASIC")]
    pub log: Option<String>,

    /// Check that the committees in the target Light-Node match the source
    /// chain, then exit. Only works for maintain/xmaintain.
    #[arg(long = "checkLNComm", visible_alias = "cc", help_heading = "BASIC")]
    pub check_ln_comm: bool,

    /// RPC address of the source chain node.
    #[arg(long = "src.rpc", value_name = "ADDR", help_heading = "SOURCE")]
    pub src_rpc: Option<String>,

    /// TKM chain id of the source chain.
    #[arg(long = "src.chainid", value_name = "N", help_heading = "SOURCE")]
    pub src_chainid: Option<u32>,

    /// Source ETH-style base chain id, when not the default.
    #[arg(long = "src.basechainid", value_name = "N", help_heading = "SOURCE")]
    pub src_basechainid: Option<u64>,

    /// Blocks per epoch on the source chain, when not the default.
    #[arg(long = "src.blocksinepoch", value_name = "N", help_heading = "SOURCE")]
    pub src_blocksinepoch: Option<u64>,

    /// Starting height of the source chain.
    #[arg(long = "src.start", value_name = "N", help_heading = "SOURCE")]
    pub src_start: Option<u64>,

    /// Ignore blocks early in an epoch while maintaining.
    #[arg(long = "src.ignoreblocks", help_heading = "SOURCE")]
    pub src_ignoreblocks: bool,

    /// UNIQUE_NAME distinguishing processes of the same type with different
    /// targets; same target and type must use the same name.
    #[arg(long = "target.name", value_name = "NAME", help_heading = "TARGET")]
    pub target_name: Option<String>,

    /// Ethereum-like API address of the target chain.
    #[arg(long = "target.api", value_name = "URL", help_heading = "TARGET")]
    pub target_api: Option<String>,

    /// Target Ethereum-like chain id.
    #[arg(long = "target.chainid", value_name = "N", help_heading = "TARGET")]
    pub target_chainid: Option<u64>,

    /// Hex private key used for sending transactions on the target chain;
    /// overrides target.senderpem.
    #[arg(long = "target.senderkey", value_name = "HEX", help_heading = "TARGET")]
    pub target_senderkey: Option<String>,

    /// PEM-encoded PKCS#8 private key file.
    #[arg(long = "target.senderpem", value_name = "PEM_FILE_PATH", help_heading = "TARGET")]
    pub target_senderpem: Option<String>,

    /// Password of the private key file.
    #[arg(
        long = "target.senderpempwd",
        visible_alias = "pwd",
        value_name = "PASSWORD",
        help_heading = "TARGET"
    )]
    pub target_senderpempwd: Option<String>,

    /// Whether the target chain is a TKM chain (for testing).
    #[arg(long = "target.istkm", help_heading = "TARGET")]
    pub target_istkm: bool,

    /// TTL of the target chain gas price cache (seconds).
    #[arg(long = "target.gpttl", value_name = "SECONDS", help_heading = "TARGET")]
    pub target_gpttl: Option<u64>,

    /// Whether to check the sender balance before sending transactions.
    #[arg(long = "target.checkbalance", value_name = "BOOL", help_heading = "TARGET")]
    pub target_checkbalance: Option<bool>,
}

impl CommonArgs {
    /// Loads the config file (or a seed) and overlays the flags.
    pub fn build_config(&self) -> Result<RelayerConfig> {
        let mut config = match &self.config {
            Some(path) => RelayerConfig::load(path)?,
            None => RelayerConfig::seed(),
        };
        if let Some(v) = &self.redis {
            config.redis = v.clone();
        }
        if let Some(v) = self.running_lock_ttl {
            config.running_lock_ttl = v;
        }
        if let Some(v) = self.sending_lock_ttl {
            config.sending_lock_ttl = v;
        }
        if let Some(v) = self.interval {
            config.interval = v;
        }
        if let Some(v) = self.retry_interval {
            config.retry_interval = v;
        }
        if let Some(v) = &self.log {
            config.log = Some(v.clone());
        }
        if let Some(v) = &self.src_rpc {
            config.source.rpc = v.clone();
        }
        if let Some(v) = self.src_chainid {
            config.source.chainid = v;
        }
        if let Some(v) = self.src_basechainid {
            config.source.basechainid = Some(v);
        }
        if let Some(v) = self.src_blocksinepoch {
            config.source.blocksinepoch = v;
        }
        if let Some(v) = self.src_start {
            config.source.start = v;
        }
        if self.src_ignoreblocks {
            config.source.ignoreblocks = true;
        }
        if let Some(v) = &self.target_name {
            config.target.name = v.clone();
        }
        // key/cursor scoping relies on one canonical casing
        config.target.name = config.target.name.to_uppercase();
        if let Some(v) = &self.target_api {
            config.target.api = v.clone();
        }
        if let Some(v) = self.target_chainid {
            config.target.chainid = Some(v);
        }
        if let Some(v) = &self.target_senderkey {
            config.target.senderkey = Some(v.clone());
        }
        if let Some(v) = &self.target_senderpem {
            config.target.senderpem = Some(v.clone());
        }
        if let Some(v) = &self.target_senderpempwd {
            config.target.senderpempwd = Some(v.clone());
        }
        if self.target_istkm {
            config.target.istkm = true;
        }
        if let Some(v) = self.target_gpttl {
            config.target.gpttl = v;
        }
        if let Some(v) = self.target_checkbalance {
            config.target.checkbalance = v;
        }
        config.validate_common()?;
        Ok(config)
    }
}

/// Parses a 20-byte contract address from hex (0x optional).
pub fn parse_address(name: &str, value: &str) -> Result<Address> {
    let raw = hex::decode(value.trim_start_matches("0x"))
        .map_err(|_| Error::Config(format!("invalid {name}")))?;
    if raw.len() != 20 {
        return Err(Error::Config(format!("invalid {name}")));
    }
    Ok(Address::from_slice(&raw))
}

/// MAINTAIN flags.
#[derive(Debug, Args)]
pub struct MaintainArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// The address of the TKM Light-Client contract on the target chain.
    #[arg(long = "maintain.targetlc", value_name = "HEX", help_heading = "MAINTAIN")]
    pub targetlc: Option<String>,
}

impl MaintainArgs {
    /// The merged and validated maintain section.
    pub fn section(&self, config: &RelayerConfig) -> Result<MaintainConfig> {
        let mut section = config.maintain.clone().unwrap_or(MaintainConfig {
            targetlc: Address::zero(),
        });
        if let Some(v) = &self.targetlc {
            section.targetlc = parse_address("maintain.targetlc", v)?;
        }
        section.validate()?;
        Ok(section)
    }
}

/// SYNCHRONIZE flags.
#[derive(Debug, Args)]
pub struct SyncArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// The TKM ETH-style chain id used for the target mcs.transferIn call.
    #[arg(long = "sync.tkmchainid", value_name = "N", help_heading = "SYNCHRONIZE")]
    pub tkmchainid: Option<u64>,

    /// The address of the Map-Cross-Chain-Service contract on the source
    /// TKM chain.
    #[arg(long = "sync.tkmmcs", value_name = "HEX", help_heading = "SYNCHRONIZE")]
    pub tkmmcs: Option<String>,

    /// The address of the Map-Cross-Chain-Service contract on the target
    /// chain.
    #[arg(long = "sync.targetmcs", value_name = "HEX", help_heading = "SYNCHRONIZE")]
    pub targetmcs: Option<String>,

    /// The address of the TKM Light-Client contract on the target chain.
    #[arg(long = "sync.targetlc", value_name = "HEX", help_heading = "SYNCHRONIZE")]
    pub targetlc: Option<String>,

    /// Whether the TKM Light-Client is updatable by an admin.
    #[arg(long = "sync.updatablelc", help_heading = "SYNCHRONIZE")]
    pub updatablelc: bool,

    /// TTL of the max validatable sub-chain height cache (seconds).
    #[arg(long = "sync.maxheightttl", value_name = "SECONDS", help_heading = "SYNCHRONIZE")]
    pub maxheightttl: Option<u64>,
}

impl SyncArgs {
    /// The merged and validated sync section.
    pub fn section(&self, config: &RelayerConfig) -> Result<SyncConfig> {
        let mut section = config.sync.clone().unwrap_or(SyncConfig {
            tkmchainid: 0,
            tkmmcs: Address::zero(),
            targetmcs: Address::zero(),
            targetlc: Address::zero(),
            updatablelc: false,
            maxheightttl: tkm_relayer_config::defaults::max_height_ttl(),
        });
        if let Some(v) = self.tkmchainid {
            section.tkmchainid = v;
        }
        if let Some(v) = &self.tkmmcs {
            section.tkmmcs = parse_address("sync.tkmmcs", v)?;
        }
        if let Some(v) = &self.targetmcs {
            section.targetmcs = parse_address("sync.targetmcs", v)?;
        }
        if let Some(v) = &self.targetlc {
            section.targetlc = parse_address("sync.targetlc", v)?;
        }
        if self.updatablelc {
            section.updatablelc = true;
        }
        if let Some(v) = self.maxheightttl {
            section.maxheightttl = v;
        }
        section.validate()?;
        Ok(section)
    }
}

/// UPDATE flags.
#[derive(Debug, Args)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// The address of the updatable TKM Light-Client contract on the target
    /// chain.
    #[arg(long = "update.targetlc", value_name = "HEX", help_heading = "UPDATE")]
    pub targetlc: Option<String>,

    /// Interval in seconds between committee pushes.
    #[arg(id = "update_interval", long = "update.interval", value_name = "SECONDS", help_heading = "UPDATE")]
    pub interval: Option<u64>,

    /// Force-update EPOCH's committee to the Light-Client, then exit.
    #[arg(
        long = "update.epoch",
        visible_alias = "ep",
        value_name = "EPOCH",
        help_heading = "UPDATE"
    )]
    pub epoch: Option<u64>,

    /// Postpone the next update window by POSTPONE seconds, then exit.
    #[arg(
        short = 'p',
        long = "postpone",
        value_name = "POSTPONE",
        help_heading = "UPDATE"
    )]
    pub postpone: Option<u64>,
}

impl UpdateArgs {
    /// The merged and validated update section.
    pub fn section(&self, config: &RelayerConfig) -> Result<UpdateConfig> {
        let mut section = config.update.clone().unwrap_or(UpdateConfig {
            interval: tkm_relayer_config::defaults::update_interval(),
            targetlc: Address::zero(),
            epoch: None,
            postpone: None,
        });
        if let Some(v) = &self.targetlc {
            section.targetlc = parse_address("update.targetlc", v)?;
        }
        if let Some(v) = self.interval {
            section.interval = v;
        }
        if let Some(v) = self.epoch {
            section.epoch = Some(v);
        }
        if let Some(v) = self.postpone {
            section.postpone = Some(v);
        }
        // a pure postpone run never touches the chain, the address may be
        // absent there
        if section.postpone.is_none() {
            section.validate()?;
        }
        Ok(section)
    }
}

/// X-RELAY MAINTAIN flags.
#[derive(Debug, Args)]
pub struct XMaintainArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// The address of the X-Relay Light-Client contract on the target
    /// chain.
    #[arg(long = "xmaintain.targetlc", value_name = "HEX", help_heading = "X-RELAY MAINTAIN")]
    pub targetlc: Option<String>,
}

impl XMaintainArgs {
    /// The merged and validated xmaintain section.
    pub fn section(&self, config: &RelayerConfig) -> Result<XMaintainConfig> {
        let mut section =
            config.xmaintain.clone().unwrap_or(XMaintainConfig {
                targetlc: Address::zero(),
            });
        if let Some(v) = &self.targetlc {
            section.targetlc = parse_address("xmaintain.targetlc", v)?;
        }
        section.validate()?;
        Ok(section)
    }
}

/// X-RELAY SYNCHRONIZE flags.
#[derive(Debug, Args)]
pub struct XSyncArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// The X-Relay ETH-style chain id used for the target mcs.transferIn
    /// call.
    #[arg(long = "xsync.chainid", value_name = "N", help_heading = "X-RELAY SYNCHRONIZE")]
    pub chainid: Option<u64>,

    /// The address of the Map-Cross-Chain-Service-Relay contract on the
    /// X-Relay chain.
    #[arg(long = "xsync.mcs", value_name = "HEX", help_heading = "X-RELAY SYNCHRONIZE")]
    pub mcs: Option<String>,

    /// The address of the Map-Cross-Chain-Service contract on the target
    /// chain.
    #[arg(long = "xsync.targetmcs", value_name = "HEX", help_heading = "X-RELAY SYNCHRONIZE")]
    pub targetmcs: Option<String>,

    /// The address of the X-Relay Light-Client contract on the target
    /// chain.
    #[arg(long = "xsync.targetlc", value_name = "HEX", help_heading = "X-RELAY SYNCHRONIZE")]
    pub targetlc: Option<String>,

    /// TTL of the max validatable X-Relay height cache (seconds).
    #[arg(long = "xsync.maxheightttl", value_name = "SECONDS", help_heading = "X-RELAY SYNCHRONIZE")]
    pub maxheightttl: Option<u64>,
}

impl XSyncArgs {
    /// The merged and validated xsync section.
    pub fn section(&self, config: &RelayerConfig) -> Result<XSyncConfig> {
        let mut section = config.xsync.clone().unwrap_or(XSyncConfig {
            chainid: 0,
            mcs: Address::zero(),
            targetmcs: Address::zero(),
            targetlc: Address::zero(),
            maxheightttl: tkm_relayer_config::defaults::max_height_ttl(),
        });
        if let Some(v) = self.chainid {
            section.chainid = v;
        }
        if let Some(v) = &self.mcs {
            section.mcs = parse_address("xsync.mcs", v)?;
        }
        if let Some(v) = &self.targetmcs {
            section.targetmcs = parse_address("xsync.targetmcs", v)?;
        }
        if let Some(v) = &self.targetlc {
            section.targetlc = parse_address("xsync.targetlc", v)?;
        }
        if let Some(v) = self.maxheightttl {
            section.maxheightttl = v;
        }
        section.validate()?;
        Ok(section)
    }
}

/// PEM utility flags.
#[derive(Debug, Args)]
pub struct PemArgs {
    /// Output PEM FILE_PATH (export a hex key into a protected file).
    #[arg(short = 'o', long, value_name = "FILE_PATH")]
    pub output: Option<PathBuf>,

    /// Input PEM FILE_PATH (print the hex key of a file).
    #[arg(short = 'i', long, value_name = "FILE_PATH")]
    pub input: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_sections() {
        let cli = Cli::parse_from([
            "tkm-relayer",
            "sync",
            "--src.rpc",
            "http://127.0.0.1:9001",
            "--src.chainid",
            "3",
            "--target.name",
            "bsc",
            "--target.api",
            "http://127.0.0.1:8545",
            "--target.senderkey",
            "0b",
            "--sync.tkmchainid",
            "70001",
            "--sync.tkmmcs",
            "0x00000000000000000000000000000000746b6d01",
            "--sync.targetmcs",
            "00000000000000000000000000000000da000001",
            "--sync.targetlc",
            "0x00000000000000000000000000000000da000002",
        ]);
        let Command::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        let config = args.common.build_config().expect("config");
        assert_eq!(config.target.name, "BSC");
        assert_eq!(config.source.chainid, 3);
        let section = args.section(&config).expect("section");
        assert_eq!(section.tkmchainid, 70001);
        assert!(!section.tkmmcs.is_zero());
    }

    #[test]
    fn bad_addresses_are_config_errors() {
        assert!(parse_address("x", "0x1234").is_err());
        assert!(parse_address("x", "zz").is_err());
        assert!(parse_address(
            "x",
            "0x00000000000000000000000000000000da000001"
        )
        .is_ok());
    }
}
