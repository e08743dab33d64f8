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

//! Turns a source-chain tx-final-proof into the record the target
//! light-client expects. From receipt version 2 on, the target log is
//! extracted together with its inclusion proof in the receipt's log tree;
//! older receipts ship all logs and empty log-proof fields.

use tkm_relayer_types::{
    Address, EpochNum, Hash, Log, ProofNode, Receipt, TxFinalProof, RECEIPT_V2,
};
use tkm_relayer_utils::{Error, Result};

use crate::committee::verify_signatures;
use crate::header::block_hash;
use crate::merkle::{self, ProofChain};
use crate::records::{
    LightHeader, LogRecord, ReceiptDataRecord, ReceiptProofRecord,
    ReceiptRecord,
};

/// Finds the first log emitted by `contract` whose first topic is `topic`.
pub fn locate_log<'a>(
    logs: &'a [Log],
    contract: Address,
    topic: Hash,
) -> Option<(usize, &'a Log)> {
    logs.iter().enumerate().find(|(_, l)| {
        l.address == contract && l.topics.first() == Some(&topic)
    })
}

// Splits the target log out of a v2 receipt: the stripped receipt, the log
// and the log's inclusion proof in the receipt's log tree.
fn split_target_log(
    receipt: &Receipt,
    contract: Address,
    topic: Hash,
) -> Result<(Receipt, Log, Vec<ProofNode>)> {
    if receipt.version < RECEIPT_V2 || receipt.logs.is_empty() {
        return Err(Error::Proof("invalid receipt version".into()));
    }
    let (index, log) = locate_log(&receipt.logs, contract, topic)
        .ok_or(Error::NoTargetLog)?;
    let log = log.clone();
    let leaves: Vec<Hash> = receipt.logs.iter().map(Log::hash).collect();
    let (_, log_proof) = merkle::root_with_proof(&leaves, index)
        .ok_or_else(|| {
            Error::Proof("calculate log root of the Receipt failed".into())
        })?;
    let mut stripped = receipt.clone();
    stripped.logs = Vec::new();
    Ok((stripped, log, log_proof))
}

fn check_material(txp: &TxFinalProof) -> Result<()> {
    if txp.receipt_proof.is_empty() {
        return Err(Error::Proof("invalid tx final proof".into()));
    }
    Ok(())
}

fn signatures(txp: &TxFinalProof) -> Vec<Vec<u8>> {
    txp.sigs
        .iter()
        .filter(|p| !p.signature.is_empty())
        .map(|p| p.signature.clone())
        .collect()
}

/// Builds the receipt-proof record (maintain/sync shape, with header) from a
/// final proof, targeting the event `(contract, topic)`.
pub fn receipt_proof(
    txp: &TxFinalProof,
    contract: Address,
    topic: Hash,
) -> Result<ReceiptProofRecord> {
    check_material(txp)?;
    let proofs = ProofChain::compact(&txp.receipt_proof).0;
    let header = LightHeader::from(&txp.header);
    let sigs = signatures(txp);
    if txp.receipt.version >= RECEIPT_V2 {
        let (stripped, log, log_proof) =
            split_target_log(&txp.receipt, contract, topic)?;
        Ok(ReceiptProofRecord {
            receipt: ReceiptRecord::from(&stripped),
            log: LogRecord::from(&log),
            log_proof: ProofChain::compact(&log_proof).0,
            proofs,
            header,
            signatures: sigs,
        })
    } else {
        Ok(ReceiptProofRecord {
            receipt: ReceiptRecord::from(&txp.receipt),
            log: LogRecord::default(),
            log_proof: Vec::new(),
            proofs,
            header,
            signatures: sigs,
        })
    }
}

/// Builds the receipt-data record (xsync shape, no header) from a local
/// proof, targeting the event `(contract, topic)`. The caller names the
/// epoch its stream currently relays.
pub fn receipt_data(
    txp: &TxFinalProof,
    contract: Address,
    topic: Hash,
    syncing_epoch: EpochNum,
) -> Result<ReceiptDataRecord> {
    check_material(txp)?;
    let proofs = ProofChain::compact(&txp.receipt_proof).0;
    let sigs = signatures(txp);
    let syncing_epoch = if syncing_epoch.is_nil() {
        0
    } else {
        syncing_epoch.0
    };
    if txp.receipt.version >= RECEIPT_V2 {
        let (stripped, log, log_proof) =
            split_target_log(&txp.receipt, contract, topic)?;
        Ok(ReceiptDataRecord {
            receipt: ReceiptRecord::from(&stripped),
            log: LogRecord::from(&log),
            log_proof: ProofChain::compact(&log_proof).0,
            proofs,
            chain_id: txp.header.chain_id.0,
            height: txp.header.height.0,
            syncing_epoch,
            signatures: sigs,
        })
    } else {
        Ok(ReceiptDataRecord {
            receipt: ReceiptRecord::from(&txp.receipt),
            log: LogRecord::default(),
            log_proof: Vec::new(),
            proofs,
            chain_id: txp.header.chain_id.0,
            height: txp.header.height.0,
            syncing_epoch,
            signatures: sigs,
        })
    }
}

/// Locally verifies a tx proof: the receipt hash folded through the proof
/// chain must reach the anchoring block hash, and the header signatures must
/// verify with at least one pass.
pub fn verify_local(txp: &TxFinalProof) -> Result<()> {
    check_material(txp)?;
    let anchored = merkle::fold_raw(&txp.receipt_proof, txp.receipt.hash());
    let boh = block_hash(&txp.header);
    if anchored != boh {
        return Err(Error::Proof(format!(
            "receipt proof folds to {anchored:?}, header hash is {boh:?}"
        )));
    }
    let passed = verify_signatures(boh, &txp.sigs)?;
    if passed == 0 {
        return Err(Error::Proof("header signature verify failed".into()));
    }
    Ok(())
}

/// Locally verifies a final proof: a local verification whose anchoring
/// header additionally lies on the main chain.
pub fn verify_final(txp: &TxFinalProof) -> Result<()> {
    if !txp.header.chain_id.is_main() {
        return Err(Error::Proof(
            "final proof not anchored in a main chain header".into(),
        ));
    }
    verify_local(txp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tkm_relayer_types::{keccak256, BlockHeader, ChainId, Height};

    fn target_log(contract: Address, topic: Hash) -> Log {
        Log {
            address: contract,
            topics: vec![topic, keccak256(b"order")],
            data: vec![1, 2, 3],
            ..Default::default()
        }
    }

    fn fixture(contract: Address, topic: Hash) -> TxFinalProof {
        let receipt = Receipt {
            version: RECEIPT_V2,
            status: 1,
            logs: vec![
                Log {
                    address: Address::repeat_byte(0x11),
                    topics: vec![keccak256(b"unrelated")],
                    ..Default::default()
                },
                target_log(contract, topic),
            ],
            tx_hash: keccak256(b"tx"),
            ..Default::default()
        };
        // one-node chain anchoring the receipt in a header whose hash we
        // forge below; the fold itself is what the local verify exercises
        let sibling = keccak256(b"sibling");
        TxFinalProof {
            receipt,
            receipt_proof: vec![ProofNode {
                hash: sibling,
                position: false,
            }],
            header: BlockHeader {
                chain_id: ChainId::MAIN,
                height: Height(500),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn v2_proof_strips_logs_and_proves_the_target() {
        let contract = Address::repeat_byte(0xaa);
        let topic = keccak256(b"mapTransferOut");
        let txp = fixture(contract, topic);
        let record = receipt_proof(&txp, contract, topic).expect("record");
        assert!(record.receipt.logs.is_empty());
        assert_eq!(record.log.address, contract);
        assert!(!record.log_proof.is_empty());

        // the log proof folds back to the root of the original log tree
        let leaves: Vec<Hash> =
            txp.receipt.logs.iter().map(Log::hash).collect();
        let root = merkle::root(&leaves);
        let chain = ProofChain(record.log_proof.clone());
        assert_eq!(chain.fold(txp.receipt.logs[1].hash()), root);
    }

    #[test]
    fn missing_target_log_is_reported() {
        let contract = Address::repeat_byte(0xaa);
        let topic = keccak256(b"mapTransferOut");
        let txp = fixture(contract, topic);
        let err = receipt_proof(&txp, Address::repeat_byte(0xbb), topic)
            .unwrap_err();
        assert!(matches!(err, Error::NoTargetLog));
    }

    #[test]
    fn legacy_receipts_keep_their_logs() {
        let contract = Address::repeat_byte(0xaa);
        let topic = keccak256(b"mapTransferOut");
        let mut txp = fixture(contract, topic);
        txp.receipt.version = 1;
        let record = receipt_proof(&txp, contract, topic).expect("record");
        assert_eq!(record.receipt.logs.len(), 2);
        assert!(record.log_proof.is_empty());
        assert_eq!(record.log, LogRecord::default());
    }

    #[test]
    fn empty_proof_chain_is_invalid_material() {
        let contract = Address::repeat_byte(0xaa);
        let topic = keccak256(b"mapTransferOut");
        let mut txp = fixture(contract, topic);
        txp.receipt_proof.clear();
        assert!(receipt_proof(&txp, contract, topic).is_err());
        assert!(verify_local(&txp).is_err());
    }

    #[test]
    fn receipt_data_names_the_anchor() {
        let contract = Address::repeat_byte(0xaa);
        let topic = keccak256(b"mapTransferOut");
        let mut txp = fixture(contract, topic);
        txp.header.chain_id = ChainId(100);
        let record =
            receipt_data(&txp, contract, topic, EpochNum(4)).expect("record");
        assert_eq!(record.chain_id, 100);
        assert_eq!(record.height, 500);
        assert_eq!(record.syncing_epoch, 4);
    }

    #[test]
    fn final_verify_requires_main_chain_anchor() {
        let contract = Address::repeat_byte(0xaa);
        let topic = keccak256(b"mapTransferOut");
        let mut txp = fixture(contract, topic);
        txp.header.chain_id = ChainId(100);
        let err = verify_final(&txp).unwrap_err();
        assert!(matches!(err, Error::Proof(_)));
    }

    #[test]
    fn complete_final_proof_verifies_locally() {
        use crate::header::receipt_root_proof;
        use ethers::core::k256::ecdsa::SigningKey;
        use ethers::signers::LocalWallet;
        use tkm_relayer_types::PubAndSig;

        let contract = Address::repeat_byte(0xaa);
        let topic = keccak256(b"mapTransferOut");
        let mine = Receipt {
            version: RECEIPT_V2,
            status: 1,
            logs: vec![target_log(contract, topic)],
            tx_hash: keccak256(b"mine"),
            ..Default::default()
        };
        let other = Receipt {
            tx_hash: keccak256(b"other"),
            ..Default::default()
        };

        // receipt trie of the block, then into the header's field tree
        let leaves = vec![other.hash(), mine.hash()];
        let (receipts_root, trie_proof) =
            merkle::root_with_proof(&leaves, 1).expect("proof");
        let header = BlockHeader {
            chain_id: ChainId::MAIN,
            height: Height(700),
            receipt_root: Some(receipts_root),
            ..Default::default()
        };
        let mut chain = trie_proof;
        chain.extend(receipt_root_proof(&header).expect("field proof"));

        let wallet =
            LocalWallet::from(SigningKey::from_slice(&[3u8; 32]).unwrap());
        let sig = wallet.sign_hash(block_hash(&header)).expect("sign");
        let txp = TxFinalProof {
            receipt: mine,
            receipt_proof: chain,
            header,
            sigs: vec![PubAndSig {
                pub_key: Vec::new(),
                signature: sig.to_vec(),
            }],
            ..Default::default()
        };
        verify_final(&txp).expect("complete proof must verify");

        // flipping one node breaks the fold
        let mut broken = txp;
        broken.receipt_proof[0].position = !broken.receipt_proof[0].position;
        assert!(verify_local(&broken).is_err());
    }
}
