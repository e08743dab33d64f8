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

//! The typed records handed to the target contracts, and their ABI
//! tokenization. Field renaming is straight; absent byte slices are
//! normalized to empty so the ABI layer never sees a null.

use ethers::abi::Token;
use ethers::types::U256;
use tkm_relayer_types::{Address, BlockHeader, Hash, Log, Receipt};

use crate::merkle::ProofStep;

/// Anything encodable as one ABI token.
pub trait ToToken {
    /// The ABI token of this value.
    fn to_token(&self) -> Token;
}

/// ABI-encodes one record as a standalone byte string, the form the
/// light-client entry points take their proof argument in.
pub fn encode_record<T: ToToken>(record: &T) -> Vec<u8> {
    ethers::abi::encode(&[record.to_token()])
}

fn bytes(v: &Option<Hash>) -> Token {
    Token::Bytes(v.map(|h| h.as_bytes().to_vec()).unwrap_or_default())
}

fn fixed(h: Hash) -> Token {
    Token::FixedBytes(h.as_bytes().to_vec())
}

fn uint(v: u64) -> Token {
    Token::Uint(U256::from(v))
}

/// The header record of the TKM light-client contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightHeader {
    /// Hash of the previous block.
    pub previous_hash: Vec<u8>,
    /// Rolling history hash.
    pub hash_history: Vec<u8>,
    /// Source chain id.
    pub chain_id: u32,
    /// Block height.
    pub height: u64,
    /// Empty-block marker.
    pub empty: bool,
    /// Parent block height.
    pub parent_height: u64,
    /// Parent block hash.
    pub parent_hash: Vec<u8>,
    /// Proposer reward address.
    pub reward_address: Address,
    /// Attendance record root.
    pub attendance_hash: Vec<u8>,
    /// Producing committee hash.
    pub committee_hash: Vec<u8>,
    /// Root committing to the next elected committee.
    pub elected_next_root: Vec<u8>,
    /// Seed of the next election.
    pub new_committee_seed: Vec<u8>,
    /// World state root.
    pub state_root: Vec<u8>,
    /// Chain registry root.
    pub chain_info_root: Vec<u8>,
    /// Cross-shard waterline root.
    pub waterlines_root: Vec<u8>,
    /// Value-cross-chain root.
    pub vcc_root: Vec<u8>,
    /// Cashed cheque root.
    pub cashed_root: Vec<u8>,
    /// Transaction trie root.
    pub transaction_root: Vec<u8>,
    /// Receipt trie root.
    pub receipt_root: Vec<u8>,
    /// Sub-chain header summary root.
    pub hds_root: Vec<u8>,
    /// Block timestamp.
    pub time_stamp: u64,
    /// Election result root.
    pub elect_result_root: Vec<u8>,
    /// Pre-election root.
    pub pre_elect_root: Vec<u8>,
    /// Confirmed sub-chain root.
    pub confirmed_root: Vec<u8>,
    /// Header version.
    pub version: u16,
}

impl From<&BlockHeader> for LightHeader {
    fn from(h: &BlockHeader) -> Self {
        let opt = |v: &Option<Hash>| {
            v.map(|x| x.as_bytes().to_vec()).unwrap_or_default()
        };
        Self {
            previous_hash: h.previous_hash.as_bytes().to_vec(),
            hash_history: h.hash_history.as_bytes().to_vec(),
            chain_id: h.chain_id.0,
            height: h.height.0,
            empty: h.empty,
            parent_height: h.parent_height.0,
            parent_hash: opt(&h.parent_hash),
            reward_address: h.reward_address,
            attendance_hash: opt(&h.attendance_hash),
            committee_hash: opt(&h.committee_hash),
            elected_next_root: opt(&h.elected_next_root),
            new_committee_seed: opt(&h.seed),
            state_root: h.state_root.as_bytes().to_vec(),
            chain_info_root: opt(&h.chain_info_root),
            waterlines_root: opt(&h.waterlines_root),
            vcc_root: opt(&h.vcc_root),
            cashed_root: opt(&h.cashed_root),
            transaction_root: opt(&h.transaction_root),
            receipt_root: opt(&h.receipt_root),
            hds_root: opt(&h.hds_root),
            time_stamp: h.time_stamp,
            elect_result_root: opt(&h.elect_result_root),
            pre_elect_root: opt(&h.pre_elect_root),
            confirmed_root: opt(&h.confirmed_root),
            version: h.version,
        }
    }
}

impl ToToken for LightHeader {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Bytes(self.previous_hash.clone()),
            Token::Bytes(self.hash_history.clone()),
            uint(self.chain_id as u64),
            uint(self.height),
            Token::Bool(self.empty),
            uint(self.parent_height),
            Token::Bytes(self.parent_hash.clone()),
            Token::Address(self.reward_address),
            Token::Bytes(self.attendance_hash.clone()),
            Token::Bytes(self.committee_hash.clone()),
            Token::Bytes(self.elected_next_root.clone()),
            Token::Bytes(self.new_committee_seed.clone()),
            Token::Bytes(self.state_root.clone()),
            Token::Bytes(self.chain_info_root.clone()),
            Token::Bytes(self.waterlines_root.clone()),
            Token::Bytes(self.vcc_root.clone()),
            Token::Bytes(self.cashed_root.clone()),
            Token::Bytes(self.transaction_root.clone()),
            Token::Bytes(self.receipt_root.clone()),
            Token::Bytes(self.hds_root.clone()),
            uint(self.time_stamp),
            Token::Bytes(self.elect_result_root.clone()),
            Token::Bytes(self.pre_elect_root.clone()),
            Token::Bytes(self.confirmed_root.clone()),
            uint(self.version as u64),
        ])
    }
}

/// The log record inside a receipt proof.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    /// Emitting contract.
    pub address: Address,
    /// Event topics.
    pub topics: Vec<Hash>,
    /// Non-indexed payload.
    pub data: Vec<u8>,
    /// Emitting block height.
    pub block_number: u64,
    /// Emitting tx hash.
    pub tx_hash: Hash,
    /// Tx index in the block.
    pub tx_index: u32,
    /// Log index in the block.
    pub index: u32,
    /// Emitting block hash (zero when unknown).
    pub block_hash: Hash,
}

impl From<&Log> for LogRecord {
    fn from(l: &Log) -> Self {
        Self {
            address: l.address,
            topics: l.topics.clone(),
            data: l.data.clone(),
            block_number: l.block_number,
            tx_hash: l.tx_hash,
            tx_index: l.tx_index,
            index: l.index,
            block_hash: l.block_hash.unwrap_or_default(),
        }
    }
}

impl ToToken for LogRecord {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.address),
            Token::Array(self.topics.iter().copied().map(fixed).collect()),
            Token::Bytes(self.data.clone()),
            uint(self.block_number),
            fixed(self.tx_hash),
            uint(self.tx_index as u64),
            uint(self.index as u64),
            fixed(self.block_hash),
        ])
    }
}

/// The receipt record; logs are stripped when a single-log proof is carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiptRecord {
    /// Intermediate state evidence.
    pub post_state: Vec<u8>,
    /// Execution status.
    pub status: u64,
    /// Cumulative gas used.
    pub cumulative_gas_used: u64,
    /// Logs, empty in the v2 shape.
    pub logs: Vec<LogRecord>,
    /// Executed tx hash.
    pub tx_hash: Vec<u8>,
    /// Created contract address (zero when none).
    pub contract_address: Address,
    /// Gas used.
    pub gas_used: u64,
    /// Return data.
    pub out: Vec<u8>,
    /// Execution error.
    pub error: String,
    /// Receipt version.
    pub version: u16,
}

impl From<&Receipt> for ReceiptRecord {
    fn from(r: &Receipt) -> Self {
        Self {
            post_state: r.post_state.clone(),
            status: r.status,
            cumulative_gas_used: r.cumulative_gas_used,
            logs: r.logs.iter().map(LogRecord::from).collect(),
            tx_hash: r.tx_hash.as_bytes().to_vec(),
            contract_address: r.contract_address.unwrap_or_default(),
            gas_used: r.gas_used,
            out: r.out.clone(),
            error: r.error.clone(),
            version: r.version,
        }
    }
}

impl ToToken for ReceiptRecord {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Bytes(self.post_state.clone()),
            uint(self.status),
            uint(self.cumulative_gas_used),
            Token::Array(self.logs.iter().map(|l| l.to_token()).collect()),
            Token::Bytes(self.tx_hash.clone()),
            Token::Address(self.contract_address),
            uint(self.gas_used),
            Token::Bytes(self.out.clone()),
            Token::String(self.error.clone()),
            uint(self.version as u64),
        ])
    }
}

impl ToToken for ProofStep {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            fixed(self.hash),
            Token::Bool(self.position),
            uint(self.repeat as u64),
        ])
    }
}

fn steps(s: &[ProofStep]) -> Token {
    Token::Array(s.iter().map(|p| p.to_token()).collect())
}

fn byte_slices(s: &[Vec<u8>]) -> Token {
    Token::Array(s.iter().cloned().map(Token::Bytes).collect())
}

/// The receipt proof shape accepted by the TKM light-client
/// (`verifyReceiptProof`): includes the full header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptProofRecord {
    /// The receipt, logs stripped in the v2 shape.
    pub receipt: ReceiptRecord,
    /// The proven log (empty for pre-v2 receipts).
    pub log: LogRecord,
    /// Proof from the log hash to the receipt's log root.
    pub log_proof: Vec<ProofStep>,
    /// Proof from the receipt hash to the header's block hash.
    pub proofs: Vec<ProofStep>,
    /// The anchoring header.
    pub header: LightHeader,
    /// Committee signatures over the block hash.
    pub signatures: Vec<Vec<u8>>,
}

impl ToToken for ReceiptProofRecord {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            self.receipt.to_token(),
            self.log.to_token(),
            steps(&self.log_proof),
            steps(&self.proofs),
            self.header.to_token(),
            byte_slices(&self.signatures),
        ])
    }
}

/// The receipt proof shape accepted by the X light-client: no header, the
/// anchor is named by chain id and height, plus the syncing-epoch hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptDataRecord {
    /// The receipt, logs stripped in the v2 shape.
    pub receipt: ReceiptRecord,
    /// The proven log (empty for pre-v2 receipts).
    pub log: LogRecord,
    /// Proof from the log hash to the receipt's log root.
    pub log_proof: Vec<ProofStep>,
    /// Proof from the receipt hash to the anchoring block hash.
    pub proofs: Vec<ProofStep>,
    /// Chain of the anchoring block.
    pub chain_id: u32,
    /// Height of the anchoring block.
    pub height: u64,
    /// The epoch the feeding sync stream currently works in.
    pub syncing_epoch: u64,
    /// Committee signatures over the anchoring block hash.
    pub signatures: Vec<Vec<u8>>,
}

impl ToToken for ReceiptDataRecord {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            self.receipt.to_token(),
            self.log.to_token(),
            steps(&self.log_proof),
            steps(&self.proofs),
            uint(self.chain_id as u64),
            uint(self.height),
            uint(self.syncing_epoch),
            byte_slices(&self.signatures),
        ])
    }
}

/// The committee rotation record of the TKM light-client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeRecord {
    /// The header carrying the election.
    pub header: LightHeader,
    /// Member node ids.
    pub committee: Vec<Vec<u8>>,
    /// Committee signatures over the block hash.
    pub sigs: Vec<Vec<u8>>,
}

impl ToToken for CommitteeRecord {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            self.header.to_token(),
            byte_slices(&self.committee),
            byte_slices(&self.sigs),
        ])
    }
}

/// The committee rotation record of the X light-client, header replaced by
/// an elected-next-root field proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XCommitteeDataRecord {
    /// Proof from the elected-next-root leaf to the block hash.
    pub proofs: Vec<ProofStep>,
    /// Member node ids.
    pub committee: Vec<Vec<u8>>,
    /// Committee signatures over the block hash.
    pub sigs: Vec<Vec<u8>>,
    /// Chain of the electing block.
    pub chain_id: u32,
    /// Height of the electing block.
    pub height: u64,
    /// Epoch the paired xsync stream currently relays; older committees may
    /// be garbage-collected below it.
    pub syncing_epoch: u64,
}

impl ToToken for XCommitteeDataRecord {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            steps(&self.proofs),
            byte_slices(&self.committee),
            byte_slices(&self.sigs),
            uint(self.chain_id as u64),
            uint(self.height),
            uint(self.syncing_epoch),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tkm_relayer_types::{keccak256, ChainId, Height};

    #[test]
    fn absent_roots_tokenize_as_empty_bytes() {
        let header = tkm_relayer_types::BlockHeader {
            chain_id: ChainId(1),
            height: Height(5),
            ..Default::default()
        };
        let record = LightHeader::from(&header);
        assert!(record.elected_next_root.is_empty());
        match record.to_token() {
            Token::Tuple(fields) => {
                assert_eq!(fields.len(), 25);
                assert_eq!(fields[10], Token::Bytes(vec![]));
            }
            other => panic!("expected tuple, got {other:?}"),
        }
    }

    #[test]
    fn log_record_keeps_topic_order() {
        let log = Log {
            topics: vec![keccak256(b"t0"), keccak256(b"t1")],
            ..Default::default()
        };
        let record = LogRecord::from(&log);
        assert_eq!(record.topics, log.topics);
        assert_eq!(record.block_hash, Hash::zero());
    }

    #[test]
    fn records_abi_encode() {
        let rec = ReceiptProofRecord {
            receipt: ReceiptRecord::default(),
            log: LogRecord::default(),
            log_proof: vec![],
            proofs: vec![ProofStep {
                hash: keccak256(b"p"),
                position: true,
                repeat: 2,
            }],
            header: LightHeader::from(&tkm_relayer_types::BlockHeader::default()),
            signatures: vec![vec![1u8; 65]],
        };
        let encoded = ethers::abi::encode(&[rec.to_token()]);
        assert!(!encoded.is_empty());
    }
}
