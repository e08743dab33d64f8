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

//! # Relayer Config
//!
//! The configuration model of the relayer: one YAML file (kebab-case keys)
//! mirrored by CLI flags, immutable after startup. Every mode section
//! validates that its contract addresses are present and non-zero before a
//! single connection is made.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tkm_relayer_types::{Address, ChainId};
use tkm_relayer_utils::{Error, Result};

/// Serde defaults for the optional knobs.
pub mod defaults;
/// Logger installation.
pub mod logger;

pub use logger::setup_logger;

/// Top-level configuration, immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RelayerConfig {
    /// Redis server address.
    #[serde(default = "defaults::redis")]
    pub redis: String,
    /// TTL of the runner lease in seconds.
    #[serde(default = "defaults::lock_ttl")]
    pub running_lock_ttl: u64,
    /// TTL of the sender lease in seconds.
    #[serde(default = "defaults::lock_ttl")]
    pub sending_lock_ttl: u64,
    /// Seconds between source fetch ticks.
    #[serde(default = "defaults::interval")]
    pub interval: u64,
    /// Seconds between receipt poll attempts on the target chain.
    #[serde(default = "defaults::retry_interval")]
    pub retry_interval: u64,
    /// Log file path; stderr when unset.
    #[serde(default)]
    pub log: Option<String>,
    /// The source chain.
    pub source: SourceConfig,
    /// The target chain.
    pub target: TargetConfig,
    /// Maintain mode section.
    #[serde(default)]
    pub maintain: Option<MaintainConfig>,
    /// Sync mode section.
    #[serde(default)]
    pub sync: Option<SyncConfig>,
    /// Update mode section.
    #[serde(default)]
    pub update: Option<UpdateConfig>,
    /// X-Relay maintain mode section.
    #[serde(default)]
    pub xmaintain: Option<XMaintainConfig>,
    /// X-Relay sync mode section.
    #[serde(default)]
    pub xsync: Option<XSyncConfig>,
}

/// The TKM (or X-Relay) chain blocks are read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SourceConfig {
    /// RPC address of the source node.
    pub rpc: String,
    /// TKM chain id of the source chain.
    pub chainid: u32,
    /// ETH-style chain id base, when the deployment overrides the default.
    #[serde(default)]
    pub basechainid: Option<u64>,
    /// Blocks per epoch on the source chain.
    #[serde(default = "defaults::blocks_in_epoch")]
    pub blocksinepoch: u64,
    /// Starting height when the store has no cursor yet.
    #[serde(default)]
    pub start: u64,
    /// Skip blocks early in an epoch while maintaining.
    #[serde(default)]
    pub ignoreblocks: bool,
}

impl SourceConfig {
    /// The typed source chain id.
    pub fn chain_id(&self) -> ChainId {
        ChainId(self.chainid)
    }

    fn validate(&self) -> Result<()> {
        if self.rpc.is_empty() {
            return Err(Error::Config("src.rpc required".into()));
        }
        if self.blocksinepoch == 0 {
            return Err(Error::Config("src.blocksinepoch must be > 0".into()));
        }
        Ok(())
    }
}

/// The EVM chain proofs and committee updates are submitted to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TargetConfig {
    /// Stable deployment name; scopes every store key. Required.
    pub name: String,
    /// Ethereum-like API address of the target chain.
    pub api: String,
    /// Target chain id; read from the node when unset.
    #[serde(default)]
    pub chainid: Option<u64>,
    /// Hex private key of the sender account.
    #[serde(default, skip_serializing)]
    pub senderkey: Option<String>,
    /// PEM-encoded PKCS#8 private key file of the sender account.
    #[serde(default)]
    pub senderpem: Option<String>,
    /// Password of the key file.
    #[serde(default, skip_serializing)]
    pub senderpempwd: Option<String>,
    /// Whether the target chain is itself a TKM chain.
    #[serde(default)]
    pub istkm: bool,
    /// TTL of the gas price cache in seconds.
    #[serde(default = "defaults::gas_price_ttl")]
    pub gpttl: u64,
    /// Whether to check the sender balance before sending.
    #[serde(default = "defaults::check_balance")]
    pub checkbalance: bool,
}

impl TargetConfig {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("target.name required".into()));
        }
        if self.api.is_empty() {
            return Err(Error::Config("target.api required".into()));
        }
        if self.senderkey.is_none() && self.senderpem.is_none() {
            return Err(Error::Config("sender is missing".into()));
        }
        Ok(())
    }
}

fn require_address(addr: Address, what: &str) -> Result<()> {
    if addr.is_zero() {
        return Err(Error::Config(format!("{what} is missing")));
    }
    Ok(())
}

/// Maintain mode: push committee rotations to the TKM light-client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MaintainConfig {
    /// The TKM light-client contract on the target chain.
    pub targetlc: Address,
}

impl MaintainConfig {
    /// Checks the section for completeness.
    pub fn validate(&self) -> Result<()> {
        require_address(
            self.targetlc,
            "target light-client contract address",
        )
    }
}

/// Sync mode: relay transfer-out events with receipt proofs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SyncConfig {
    /// The ETH-style chain id passed to the target MCS `transferIn`.
    pub tkmchainid: u64,
    /// The MCS contract on the source TKM chain.
    pub tkmmcs: Address,
    /// The MCS contract on the target chain.
    pub targetmcs: Address,
    /// The TKM light-client contract on the target chain.
    pub targetlc: Address,
    /// Whether the light-client is the admin-updatable variant.
    #[serde(default)]
    pub updatablelc: bool,
    /// TTL of the provable-height cache in seconds.
    #[serde(default = "defaults::max_height_ttl")]
    pub maxheightttl: u64,
}

impl SyncConfig {
    /// Checks the section for completeness.
    pub fn validate(&self) -> Result<()> {
        require_address(
            self.tkmmcs,
            "TKM MapCrossChainService contract address",
        )?;
        require_address(
            self.targetmcs,
            "target MapCrossChainService contract address",
        )?;
        require_address(
            self.targetlc,
            "target light-client contract address",
        )
    }
}

/// Update mode: periodic admin committee pushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct UpdateConfig {
    /// Seconds between committee pushes.
    #[serde(default = "defaults::update_interval")]
    pub interval: u64,
    /// The updatable light-client contract on the target chain.
    pub targetlc: Address,
    /// One-shot push of this epoch's committee, then exit.
    #[serde(default)]
    pub epoch: Option<u64>,
    /// Push the next update window this many seconds into the future, then
    /// exit. No chain access.
    #[serde(default)]
    pub postpone: Option<u64>,
}

impl UpdateConfig {
    /// Checks the section for completeness.
    pub fn validate(&self) -> Result<()> {
        if self.interval > i64::MAX as u64 {
            return Err(Error::Config("update.interval too big".into()));
        }
        require_address(
            self.targetlc,
            "target updatable light-client contract address",
        )
    }
}

/// X-Relay maintain mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct XMaintainConfig {
    /// The X-Relay light-client contract on the target chain.
    pub targetlc: Address,
}

impl XMaintainConfig {
    /// Checks the section for completeness.
    pub fn validate(&self) -> Result<()> {
        require_address(
            self.targetlc,
            "target X light-client contract address",
        )
    }
}

/// X-Relay sync mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct XSyncConfig {
    /// The ETH-style chain id passed to the target MCS `transferIn`.
    pub chainid: u64,
    /// The MCS relay contract on the X-Relay chain.
    pub mcs: Address,
    /// The MCS contract on the target chain.
    pub targetmcs: Address,
    /// The X light-client contract on the target chain.
    pub targetlc: Address,
    /// TTL of the provable-height cache in seconds.
    #[serde(default = "defaults::max_height_ttl")]
    pub maxheightttl: u64,
}

impl XSyncConfig {
    /// Checks the section for completeness.
    pub fn validate(&self) -> Result<()> {
        require_address(
            self.mcs,
            "X-Relay MapCrossChainServiceRelay contract address",
        )?;
        require_address(
            self.targetmcs,
            "target MapCrossChainService contract address",
        )?;
        require_address(
            self.targetlc,
            "target X light-client contract address",
        )
    }
}

impl RelayerConfig {
    /// An all-defaults configuration to overlay CLI flags onto when no
    /// config file is given. Not valid until the required fields are set.
    pub fn seed() -> Self {
        Self {
            redis: defaults::redis(),
            running_lock_ttl: defaults::lock_ttl(),
            sending_lock_ttl: defaults::lock_ttl(),
            interval: defaults::interval(),
            retry_interval: defaults::retry_interval(),
            log: None,
            source: SourceConfig {
                rpc: String::new(),
                chainid: 0,
                basechainid: None,
                blocksinepoch: defaults::blocks_in_epoch(),
                start: 0,
                ignoreblocks: false,
            },
            target: TargetConfig {
                name: String::new(),
                api: String::new(),
                chainid: None,
                senderkey: None,
                senderpem: None,
                senderpempwd: None,
                istkm: false,
                gpttl: defaults::gas_price_ttl(),
                checkbalance: defaults::check_balance(),
            },
            maintain: None,
            sync: None,
            update: None,
            xmaintain: None,
            xsync: None,
        }
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: RelayerConfig = serde_yaml::from_str(&raw)?;
        config.validate_common()?;
        Ok(config)
    }

    /// The cross-mode validations; mode sections validate when the mode
    /// starts.
    pub fn validate_common(&self) -> Result<()> {
        self.source.validate()?;
        self.target.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
source:
  rpc: "http://127.0.0.1:9001"
  chainid: 3
target:
  name: "BSC"
  api: "http://127.0.0.1:8545"
  senderkey: "0a0b0c"
sync:
  tkmchainid: 70001
  tkmmcs: "0x00000000000000000000000000000000746b6d01"
  targetmcs: "0x00000000000000000000000000000000da000001"
  targetlc: "0x00000000000000000000000000000000da000002"
"#;

    #[test]
    fn minimal_yaml_loads_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tmp");
        file.write_all(MINIMAL.as_bytes()).expect("write");
        let config = RelayerConfig::load(file.path()).expect("load");
        assert_eq!(config.redis, defaults::redis());
        assert_eq!(config.running_lock_ttl, 30);
        assert_eq!(config.interval, 10);
        assert_eq!(config.retry_interval, 5);
        assert_eq!(config.source.blocksinepoch, 1000);
        assert!(config.target.checkbalance);
        let sync = config.sync.expect("sync section");
        sync.validate().expect("valid sync section");
        assert_eq!(sync.maxheightttl, 60);
    }

    #[test]
    fn zero_addresses_fail_validation() {
        let m = MaintainConfig {
            targetlc: Address::zero(),
        };
        assert!(m.validate().is_err());
        let x = XSyncConfig {
            chainid: 1,
            mcs: Address::repeat_byte(1),
            targetmcs: Address::zero(),
            targetlc: Address::repeat_byte(2),
            maxheightttl: 60,
        };
        assert!(x.validate().is_err());
    }

    #[test]
    fn missing_sender_is_a_config_error() {
        let t = TargetConfig {
            name: "BSC".into(),
            api: "http://x".into(),
            chainid: None,
            senderkey: None,
            senderpem: None,
            senderpempwd: None,
            istkm: false,
            gpttl: 600,
            checkbalance: true,
        };
        assert!(t.validate().is_err());
    }
}
