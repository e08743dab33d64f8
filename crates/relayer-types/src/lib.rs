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

//! # Relayer Types
//!
//! The data model of the TKM source chain as the relayer sees it: heights,
//! epochs, committees, block headers/bodies and receipt proofs.
//!
//! All chain-level values hash as `keccak256(scale_encode(value))`, and the
//! source RPC ships them as SCALE streams, so every type here derives
//! [`Encode`]/[`Decode`](parity_scale_codec::Decode).

pub mod block;
pub mod committee;
pub mod primitives;
pub mod receipt;

pub use block::{
    AccountInfo, Block, BlockBody, BlockHeader, ChainStats, ConfirmedInfo,
    Confirmeds, RpcBlocks,
};
pub use committee::{Committee, PubAndSig};
pub use primitives::{keccak256, Address, ChainId, EpochNum, Hash, Height, NodeId};
pub use receipt::{
    Log, ProofNode, Receipt, Transaction, TxFinalProof,
    RECEIPT_STATUS_SUCCESS, RECEIPT_V2,
};

/// Number of blocks per epoch when not overridden by configuration.
pub const DEFAULT_BLOCKS_IN_EPOCH: u64 = 1000;
