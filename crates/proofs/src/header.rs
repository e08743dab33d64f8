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

//! The block hash is the Merkle root over the header's field leaves.
//! Hash-valued fields are their own leaves, so a proof chain can run
//! seamlessly from a receipt through the receipt trie into the header
//! (the receipt-root leaf *is* the receipt trie root), and the X
//! light-client can fold a committee hash straight to the block hash via
//! the elected-next-root leaf. Scalar fields hash as keccak over their
//! SCALE encoding.

use parity_scale_codec::Encode;
use tkm_relayer_types::{keccak256, BlockHeader, Hash, ProofNode};
use tkm_relayer_utils::{Error, Result};

use crate::merkle;

/// Leaf index of the `elected_next_root` field.
const IDX_ELECTED_NEXT_ROOT: usize = 10;
/// Leaf index of the `receipt_root` field.
const IDX_RECEIPT_ROOT: usize = 18;

fn scalar<T: Encode>(field: &T) -> Hash {
    keccak256(field.encode())
}

fn opt(field: &Option<Hash>) -> Hash {
    field.unwrap_or_default()
}

/// The header's field leaves, in declaration order.
fn leaves(h: &BlockHeader) -> Vec<Hash> {
    vec![
        h.previous_hash,
        h.hash_history,
        scalar(&h.chain_id),
        scalar(&h.height),
        scalar(&h.empty),
        scalar(&h.parent_height),
        opt(&h.parent_hash),
        scalar(&h.reward_address),
        opt(&h.attendance_hash),
        opt(&h.committee_hash),
        opt(&h.elected_next_root),
        opt(&h.seed),
        h.state_root,
        opt(&h.chain_info_root),
        opt(&h.waterlines_root),
        opt(&h.vcc_root),
        opt(&h.cashed_root),
        opt(&h.transaction_root),
        opt(&h.receipt_root),
        opt(&h.hds_root),
        scalar(&h.time_stamp),
        opt(&h.elect_result_root),
        opt(&h.pre_elect_root),
        opt(&h.confirmed_root),
        scalar(&h.version),
    ]
}

/// The canonical block hash of a header.
pub fn block_hash(h: &BlockHeader) -> Hash {
    merkle::root(&leaves(h))
}

fn field_proof(h: &BlockHeader, index: usize) -> Result<Vec<ProofNode>> {
    let all = leaves(h);
    let (_, proof) = merkle::root_with_proof(&all, index)
        .ok_or_else(|| Error::Proof("header leaf index out of range".into()))?;
    Ok(proof)
}

/// The inclusion proof of the `elected_next_root` value in the block hash.
/// Folding `hash(committee)` through it must reach the block hash, which is
/// exactly what the X light-client checks.
pub fn elected_next_root_proof(h: &BlockHeader) -> Result<Vec<ProofNode>> {
    if h.elected_next_root.is_none() {
        return Err(Error::Proof("header has no elected next root".into()));
    }
    field_proof(h, IDX_ELECTED_NEXT_ROOT)
}

/// The inclusion proof of the `receipt_root` value in the block hash. The
/// source node appends this to a receipt-trie proof so one chain runs from
/// a receipt hash all the way to the block hash.
pub fn receipt_root_proof(h: &BlockHeader) -> Result<Vec<ProofNode>> {
    if h.receipt_root.is_none() {
        return Err(Error::Proof("header has no receipt root".into()));
    }
    field_proof(h, IDX_RECEIPT_ROOT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tkm_relayer_types::{ChainId, Height};

    fn header() -> BlockHeader {
        BlockHeader {
            chain_id: ChainId(1),
            height: Height(999),
            elected_next_root: Some(keccak256(b"next-committee")),
            receipt_root: Some(keccak256(b"receipts")),
            time_stamp: 1_700_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn hash_is_deterministic_and_field_sensitive() {
        let h = header();
        assert_eq!(block_hash(&h), block_hash(&h.clone()));
        let mut changed = h.clone();
        changed.height = Height(1000);
        assert_ne!(block_hash(&h), block_hash(&changed));
    }

    #[test]
    fn elected_next_root_value_folds_to_block_hash() {
        let h = header();
        let proof = elected_next_root_proof(&h).expect("proof");
        let start = h.elected_next_root.expect("set");
        assert_eq!(merkle::fold_raw(&proof, start), block_hash(&h));
    }

    #[test]
    fn receipt_root_value_folds_to_block_hash() {
        let h = header();
        let proof = receipt_root_proof(&h).expect("proof");
        let start = h.receipt_root.expect("set");
        assert_eq!(merkle::fold_raw(&proof, start), block_hash(&h));
    }

    #[test]
    fn missing_fields_are_rejected() {
        let mut h = header();
        h.elected_next_root = None;
        assert!(elected_next_root_proof(&h).is_err());
        h.receipt_root = None;
        assert!(receipt_root_proof(&h).is_err());
    }
}
