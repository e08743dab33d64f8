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

//! # Relayer Utils
//!
//! Common error types, exit codes and small utilities shared by every crate
//! of the TKM bridge relayer.

use ethers::types::H256;

/// TTL-bounded single-value cache.
pub mod expirable;
/// The lease keepalive collaborator of long-running waits.
pub mod keepalive;
/// A module used for debugging relayer lifecycle and sync state.
pub mod probe;

pub use expirable::Expirable;
pub use keepalive::Keepalive;

/// Process exit codes surfaced to the operator and to wrapper scripts.
pub mod exit_code {
    /// Unclassified failure.
    pub const UNKNOWN: i32 = 0xff;
    /// Invalid operator input (bad flag value, bad key material).
    pub const INPUT: i32 = 0x40;
    /// Root context cancelled (signal received).
    pub const CONTEXT: i32 = 0x41;
    /// Could not work with the runner lease.
    pub const RUNNING_LEASE: i32 = 0x42;
    /// The target light-client contract is unusable.
    pub const LIGHT_CLIENT: i32 = 0x43;
    /// Invalid or incomplete configuration.
    pub const CONFIG: i32 = 0x44;
    /// Source chain RPC failure.
    pub const SOURCE: i32 = 0x51;
    /// Target chain RPC failure.
    pub const TARGET: i32 = 0x52;
    /// Key/lock store failure.
    pub const STORE: i32 = 0x53;
    /// No basic handler wired into the runner.
    pub const BASIC_HANDLER: i32 = 0x54;
    /// No block handler wired into the relay loop.
    pub const LOOP_HANDLER: i32 = 0x55;
}

/// An enum of all possible errors that could be encountered during the
/// execution of the relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// YAML config parse error.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    /// Hex decoding error.
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// SCALE decoding error on a source RPC stream.
    #[error(transparent)]
    Scale(#[from] parity_scale_codec::Error),
    /// Key/lock store error.
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    /// Source chain RPC transport error.
    #[error(transparent)]
    SourceRpc(#[from] jsonrpsee::core::Error),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Ether wallet errors.
    #[error(transparent)]
    EtherWallet(#[from] ethers::signers::WalletError),
    /// ABI encoding/decoding error.
    #[error(transparent)]
    Abi(#[from] ethers::abi::Error),
    /// Signature recovery error.
    #[error(transparent)]
    Signature(#[from] ethers::types::SignatureError),
    /// A store or RPC call exceeded its per-call budget.
    #[error(transparent)]
    Timeout(#[from] tokio::time::error::Elapsed),
    /// Invalid operator input.
    #[error("invalid input: {0}")]
    Input(String),
    /// Error while loading or validating the configuration.
    #[error("config error: {0}")]
    Config(String),
    /// The root context was cancelled by a signal.
    #[error("context cancelled")]
    Cancelled,
    /// The target light-client contract is missing or unusable.
    #[error("light-client error: {0}")]
    LightClient(String),
    /// Source chain failure that is not a plain transport error.
    #[error("source error: {0}")]
    Source(String),
    /// Target chain failure that is not a plain transport error.
    #[error("target error: {0}")]
    Target(String),
    /// Key/lock store failure that is not a plain transport error.
    #[error("store error: {0}")]
    Store(String),
    /// Another process holds the lease.
    #[error("lease {key} held by [{holder}]")]
    LeaseBusy {
        /// The contended lease key.
        key: String,
        /// Token of the current holder (`ip@pid`), if readable.
        holder: String,
    },
    /// Fetch called on a lease this process already holds.
    #[error("lease already fetched")]
    LeaseAlreadyHeld,
    /// Refresh called on a lease this process does not hold.
    #[error("lease not fetched")]
    LeaseNotHeld,
    /// The cursor caught up with the provable window of the light-client.
    /// The leader keeps its leases and retries on the next tick.
    #[error("{0}")]
    Backpressure(String),
    /// No receipt observed within the polling budget.
    #[error("no receipt found within retry budget")]
    NoReceipt,
    /// A submitted transaction landed with a failed status.
    #[error("tx {0:?} failed on target chain")]
    TxFailed(H256),
    /// The receipt carried no log matching the watched contract and topic.
    #[error("no target log found in receipt")]
    NoTargetLog,
    /// Malformed or unverifiable proof material.
    #[error("proof error: {0}")]
    Proof(String),
    /// Post-submission event did not match the submitted update.
    #[error("updates are not performing as expected: {0}")]
    EventMismatch(String),
    /// An explicitly coded exit, bubbled unchanged to the CLI edge.
    #[error("{msg}")]
    Exit {
        /// The process exit code.
        code: i32,
        /// Human readable reason.
        msg: String,
    },
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
}

impl Error {
    /// The process exit code for this error when it reaches the CLI edge.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Input(_) => exit_code::INPUT,
            Self::Cancelled => exit_code::CONTEXT,
            Self::LeaseBusy { .. }
            | Self::LeaseAlreadyHeld
            | Self::LeaseNotHeld => exit_code::RUNNING_LEASE,
            Self::LightClient(_) => exit_code::LIGHT_CLIENT,
            Self::Config(_) | Self::Yaml(_) => exit_code::CONFIG,
            Self::SourceRpc(_) | Self::Scale(_) | Self::Source(_) => {
                exit_code::SOURCE
            }
            Self::EthersProvider(_)
            | Self::EtherWallet(_)
            | Self::Abi(_)
            | Self::Signature(_)
            | Self::Target(_)
            | Self::NoReceipt
            | Self::TxFailed(_) => exit_code::TARGET,
            Self::Redis(_) | Self::Store(_) => exit_code::STORE,
            Self::Exit { code, .. } => *code,
            _ => exit_code::UNKNOWN,
        }
    }

    /// Whether the relay loop should keep its leases when this error
    /// surfaces. Backpressure is the only class where the leader must stay
    /// the leader.
    pub fn keeps_leases(&self) -> bool {
        matches!(self, Self::Backpressure(_))
    }

    /// Whether this error terminates the process instead of being retried
    /// on the next tick. Light-client and chain errors are deliberately not
    /// in this set: at runtime they release the leases and retry, and during
    /// startup checks every error terminates anyway.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Input(_)
                | Self::Config(_)
                | Self::Yaml(_)
                | Self::Exit { .. }
        )
    }

    /// Shorthand for an [`Error::Exit`] with the given code.
    pub fn exit(code: i32, msg: impl Into<String>) -> Self {
        Self::Exit {
            code,
            msg: msg.into(),
        }
    }
}

/// A type alias for the result used all over the relayer.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_route_by_class() {
        assert_eq!(Error::Config("x".into()).exit_code(), exit_code::CONFIG);
        assert_eq!(Error::Cancelled.exit_code(), exit_code::CONTEXT);
        assert_eq!(Error::Source("boom".into()).exit_code(), exit_code::SOURCE);
        assert_eq!(Error::NoReceipt.exit_code(), exit_code::TARGET);
        assert_eq!(
            Error::exit(exit_code::LIGHT_CLIENT, "lc").exit_code(),
            exit_code::LIGHT_CLIENT
        );
        assert_eq!(Error::Generic("?").exit_code(), exit_code::UNKNOWN);
    }

    #[test]
    fn backpressure_keeps_leases() {
        assert!(Error::Backpressure("max provable height exceeded".into())
            .keeps_leases());
        assert!(!Error::NoReceipt.keeps_leases());
        assert!(!Error::Backpressure("x".into()).is_fatal());
    }
}
