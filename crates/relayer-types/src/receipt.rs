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

use crate::block::BlockHeader;
use crate::committee::PubAndSig;
use crate::primitives::{keccak256, Address, ChainId, Hash};

/// Receipt version from which the log tree (and therefore single-log
/// extraction) is available.
pub const RECEIPT_V2: u16 = 2;

/// Receipt status of a successful execution.
pub const RECEIPT_STATUS_SUCCESS: u64 = 1;

/// A source-chain transaction, trimmed to the fields the relayer reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Transaction {
    /// The chain the tx executed on.
    pub chain_id: ChainId,
    /// Sender address.
    pub from: Option<Address>,
    /// Recipient; `None` for contract creation.
    pub to: Option<Address>,
    /// Account nonce.
    pub nonce: u64,
    /// Transferred value.
    pub val: U256,
    /// Call data.
    pub input: Vec<u8>,
}

impl Transaction {
    /// The tx hash: keccak over the SCALE encoding.
    pub fn hash(&self) -> Hash {
        keccak256(self.encode())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tx{{ChainID:{} Nonce:{} To:{} len(Input):{}}}",
            self.chain_id,
            self.nonce,
            self.to
                .map(|a| format!("{a:?}"))
                .unwrap_or_else(|| "<nil>".into()),
            self.input.len()
        )
    }
}

/// One event emitted during execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Log {
    /// Emitting contract.
    pub address: Address,
    /// Event topics; `topics[0]` is the event signature.
    pub topics: Vec<Hash>,
    /// Non-indexed payload.
    pub data: Vec<u8>,
    /// Height of the emitting block.
    pub block_number: u64,
    /// Hash of the emitting tx.
    pub tx_hash: Hash,
    /// Index of the tx within its block.
    pub tx_index: u32,
    /// Index of the log within the block.
    pub index: u32,
    /// Hash of the emitting block.
    pub block_hash: Option<Hash>,
}

impl Log {
    /// The log hash used as a leaf of the receipt's log tree.
    pub fn hash(&self) -> Hash {
        keccak256(self.encode())
    }
}

/// A source-chain execution receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Receipt {
    /// Receipt format version; see [`RECEIPT_V2`].
    pub version: u16,
    /// Intermediate state evidence.
    pub post_state: Vec<u8>,
    /// Execution status, 1 on success.
    pub status: u64,
    /// Gas used by the block up to and including this tx.
    pub cumulative_gas_used: u64,
    /// Emitted logs.
    pub logs: Vec<Log>,
    /// Hash of the executed tx.
    pub tx_hash: Hash,
    /// Created contract, if any.
    pub contract_address: Option<Address>,
    /// Gas used by this tx.
    pub gas_used: u64,
    /// Return data.
    pub out: Vec<u8>,
    /// Execution error message, empty on success.
    pub error: String,
}

impl Receipt {
    /// Whether execution succeeded.
    pub fn success(&self) -> bool {
        self.status == RECEIPT_STATUS_SUCCESS
    }

    /// The receipt hash anchored by the receipt-to-header proof chain.
    pub fn hash(&self) -> Hash {
        keccak256(self.encode())
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Receipt{{Tx:{:?} Status:{} Logs:{} V:{}}}",
            self.tx_hash,
            self.status,
            self.logs.len(),
            self.version
        )
    }
}

/// One node of a raw (uncompacted) Merkle proof chain: the sibling hash and
/// whether it sits on the left of the accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct ProofNode {
    /// Sibling hash.
    pub hash: Hash,
    /// `true` when the sibling is the left input of the pair hash.
    pub position: bool,
}

/// The transaction proof structure served by the source node: the receipt,
/// the proof chain from the receipt up to a header, that header, and the
/// committee signatures over the header hash.
///
/// For a *final* proof the header is anchored in the main chain; for a
/// *local* proof it is the sub-chain header itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct TxFinalProof {
    /// The proven tx.
    pub tx: Transaction,
    /// Its execution receipt.
    pub receipt: Receipt,
    /// Proof chain from `receipt.hash()` to `header.hash()`.
    pub receipt_proof: Vec<ProofNode>,
    /// The anchoring header.
    pub header: BlockHeader,
    /// Committee signatures over the anchoring header hash.
    pub sigs: Vec<PubAndSig>,
}

impl fmt::Display for TxFinalProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TxProof{{{} {} Nodes:{} Sigs:{}}}",
            self.receipt,
            self.header.summary(),
            self.receipt_proof.len(),
            self.sigs.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_success_flag() {
        let mut r = Receipt {
            status: RECEIPT_STATUS_SUCCESS,
            ..Default::default()
        };
        assert!(r.success());
        r.status = 0;
        assert!(!r.success());
    }

    #[test]
    fn log_hash_covers_topics() {
        let mut l = Log {
            topics: vec![keccak256(b"a")],
            ..Default::default()
        };
        let h1 = l.hash();
        l.topics.push(keccak256(b"b"));
        assert_ne!(h1, l.hash());
    }

    #[test]
    fn scale_roundtrip_of_proof() {
        let p = TxFinalProof {
            receipt: Receipt {
                version: RECEIPT_V2,
                status: 1,
                ..Default::default()
            },
            receipt_proof: vec![ProofNode {
                hash: keccak256(b"n"),
                position: true,
            }],
            ..Default::default()
        };
        let decoded =
            TxFinalProof::decode(&mut p.encode().as_slice()).expect("decode");
        assert_eq!(p, decoded);
    }
}
