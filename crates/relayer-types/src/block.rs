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

use std::fmt;

use ethereum_types::U256;
use parity_scale_codec::{Decode, Encode};

use crate::committee::{Committee, PubAndSig};
use crate::primitives::{Address, ChainId, EpochNum, Hash, Height};
use crate::receipt::Transaction;

/// A TKM block header.
///
/// Only the fields the relayer and the light-client records consume are
/// carried; the optional roots stay `None` on empty blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct BlockHeader {
    /// Hash of the previous block on the same chain.
    pub previous_hash: Hash,
    /// Rolling hash of the chain history.
    pub hash_history: Hash,
    /// The chain this header belongs to.
    pub chain_id: ChainId,
    /// Block height.
    pub height: Height,
    /// Whether the block is empty.
    pub empty: bool,
    /// Height of the parent (main-chain) block.
    pub parent_height: Height,
    /// Hash of the parent (main-chain) block.
    pub parent_hash: Option<Hash>,
    /// Proposer reward address.
    pub reward_address: Address,
    /// Attendance record root.
    pub attendance_hash: Option<Hash>,
    /// Hash of the committee that produced this block.
    pub committee_hash: Option<Hash>,
    /// Root committing to the next elected committee.
    pub elected_next_root: Option<Hash>,
    /// Seed for the next election.
    pub seed: Option<Hash>,
    /// World state root.
    pub state_root: Hash,
    /// Chain registry root.
    pub chain_info_root: Option<Hash>,
    /// Cross-shard waterline root.
    pub waterlines_root: Option<Hash>,
    /// Value-cross-chain root.
    pub vcc_root: Option<Hash>,
    /// Cashed cheque root.
    pub cashed_root: Option<Hash>,
    /// Transaction trie root.
    pub transaction_root: Option<Hash>,
    /// Receipt trie root.
    pub receipt_root: Option<Hash>,
    /// Sub-chain header summary root.
    pub hds_root: Option<Hash>,
    /// Block timestamp (unix seconds).
    pub time_stamp: u64,
    /// Election result root.
    pub elect_result_root: Option<Hash>,
    /// Pre-election root.
    pub pre_elect_root: Option<Hash>,
    /// Root of confirmed sub-chain blocks (main chain only).
    pub confirmed_root: Option<Hash>,
    /// Header version.
    pub version: u16,
}

impl BlockHeader {
    /// The epoch this block belongs to.
    pub fn epoch(&self, blocks_in_epoch: u64) -> EpochNum {
        self.height.epoch(blocks_in_epoch)
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!("Header{{ChainID:{} Height:{}}}", self.chain_id, self.height)
    }
}

/// The block body parts the relayer inspects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct BlockBody {
    /// The elected committee for the next epoch, when this block carries one.
    pub next_committee: Option<Committee>,
    /// The fallback committee elected without enough candidates.
    pub next_real_committee: Option<Committee>,
    /// Transactions packed in this block.
    pub txs: Vec<Transaction>,
}

/// A block together with the committee signatures over its hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Block {
    /// The header.
    pub header: BlockHeader,
    /// The body.
    pub body: BlockBody,
    /// Signatures of the committee over the header hash.
    pub pass: Vec<PubAndSig>,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block{{ChainID:{} Height:{} Txs:{}}}",
            self.header.chain_id,
            self.header.height,
            self.body.txs.len()
        )
    }
}

/// A batch of consecutive blocks returned by the source node, together with
/// the node's current tip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct RpcBlocks {
    /// The chain the batch was read from.
    pub chain_id: ChainId,
    /// The node's current tip height at response time.
    pub current: Height,
    /// The blocks, ordered by height.
    pub blocks: Vec<Block>,
}

impl fmt::Display for RpcBlocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Blocks{{ChainID:{} Current:{} Count:{}}}",
            self.chain_id,
            self.current,
            self.blocks.len()
        )
    }
}

/// Basic liveness statistics of a source node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct ChainStats {
    /// The chain the node is serving.
    pub chain_id: ChainId,
    /// Current tip height.
    pub current_height: Height,
    /// The current committee members.
    pub current_comm: Vec<crate::primitives::NodeId>,
}

impl fmt::Display for ChainStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats{{ChainID:{} Height:{} Comm:{}}}",
            self.chain_id,
            self.current_height,
            self.current_comm.len()
        )
    }
}

/// Per-sub-chain confirmation info at one main-chain height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct ConfirmedInfo {
    /// The sub chain.
    pub chain_id: ChainId,
    /// The last sub-chain height confirmed at `Confirmeds::at`, when any
    /// block of that chain is confirmed at all.
    pub height: Option<Height>,
}

/// The set of sub-chain confirmations carried by one main-chain block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Confirmeds {
    /// The main-chain height the data was read at.
    pub at: Height,
    /// Confirmation info per sub chain.
    pub data: Vec<ConfirmedInfo>,
}

/// Account state returned by the source node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct AccountInfo {
    /// The account address.
    pub address: Address,
    /// Balance in the chain's base unit.
    pub balance: U256,
    /// Contract code, empty for plain accounts.
    pub code: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::keccak256;
    use parity_scale_codec::Decode;

    #[test]
    fn header_scale_roundtrip() {
        let h = BlockHeader {
            chain_id: ChainId(2),
            height: Height(30),
            elected_next_root: Some(keccak256(b"comm")),
            time_stamp: 1_700_000_000,
            ..Default::default()
        };
        let decoded =
            BlockHeader::decode(&mut h.encode().as_slice()).expect("decode");
        assert_eq!(h, decoded);
    }

    #[test]
    fn epoch_follows_height() {
        let h = BlockHeader {
            height: Height(2500),
            ..Default::default()
        };
        assert_eq!(h.epoch(1000), EpochNum(2));
    }
}
