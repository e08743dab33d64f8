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

use ethers::types::{RecoveryMessage, Signature};
use tkm_relayer_types::{
    keccak256, Address, BlockHeader, Committee, EpochNum, Hash, PubAndSig,
};
use tkm_relayer_utils::{Error, Result};

use crate::header::{block_hash, elected_next_root_proof};
use crate::merkle::ProofChain;
use crate::records::{
    CommitteeRecord, LightHeader, XCommitteeDataRecord,
};

/// A committee rotation observed on the source chain: the carrying header,
/// the elected committee and the committee signatures over the block hash.
///
/// Built when a block carrying a next (or next-real) committee is seen and
/// discarded once the on-chain update succeeded.
#[derive(Debug, Clone)]
pub struct CommitteeProof {
    /// The header carrying the election.
    pub header: BlockHeader,
    /// The elected committee.
    pub comm: Committee,
    /// Signatures over the block hash.
    pub pass: Vec<PubAndSig>,
    /// For the X light-client: the epoch the paired xsync stream currently
    /// relays, so it can drop committees older than that.
    pub syncing_epoch: EpochNum,
}

impl CommitteeProof {
    /// Local soundness checks before anything is sent:
    /// the committee must be available, the header must come from the main
    /// chain when `mainchain_needed`, the committee hash must equal the
    /// header's elected-next-root, and the signature set must verify against
    /// the block hash with at least one pass.
    pub fn verify(&self, mainchain_needed: bool) -> Result<()> {
        if !self.comm.is_available() {
            return Err(Error::Proof("missing header or committee".into()));
        }
        if mainchain_needed && !self.header.chain_id.is_main() {
            return Err(Error::Proof("not a main chain header".into()));
        }
        let comm_hash = self.comm.hash();
        if self.header.elected_next_root != Some(comm_hash) {
            return Err(Error::Proof(
                "committee not match with Header.ElectedNextRoot".into(),
            ));
        }
        let boh = block_hash(&self.header);
        let passed = verify_signatures(boh, &self.pass)?;
        if passed == 0 {
            return Err(Error::Proof(format!(
                "signature list verify failed, passed:{passed}"
            )));
        }
        Ok(())
    }

    /// The record for the TKM light-client (`updateNextCommittee` shape).
    pub fn for_abi(&self) -> CommitteeRecord {
        CommitteeRecord {
            header: LightHeader::from(&self.header),
            committee: self
                .comm
                .members
                .iter()
                .map(|m| m.0.to_vec())
                .collect(),
            sigs: retained_signatures(&self.pass),
        }
    }

    /// The record for the X light-client: the header is replaced by the
    /// elected-next-root field proof plus the block coordinates.
    pub fn for_x_data_abi(&self) -> Result<XCommitteeDataRecord> {
        let proof = elected_next_root_proof(&self.header)?;
        Ok(XCommitteeDataRecord {
            proofs: ProofChain::compact(&proof).0,
            committee: self
                .comm
                .members
                .iter()
                .map(|m| m.0.to_vec())
                .collect(),
            sigs: retained_signatures(&self.pass),
            chain_id: self.header.chain_id.0,
            height: self.header.height.0,
            syncing_epoch: if self.syncing_epoch.is_nil() {
                0
            } else {
                self.syncing_epoch.0
            },
        })
    }
}

impl fmt::Display for CommitteeProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommProof{{{} {} PaSs:{} SyncingEpoch:{}}}",
            self.header.summary(),
            self.comm,
            self.pass.len(),
            self.syncing_epoch
        )
    }
}

// Signatures with empty bytes are dropped, the rest copied in order.
fn retained_signatures(pass: &[PubAndSig]) -> Vec<Vec<u8>> {
    pass.iter()
        .filter(|p| !p.signature.is_empty())
        .map(|p| p.signature.clone())
        .collect()
}

/// Verifies a signature set against a block hash and returns the number of
/// passing entries. An entry passes when its 65-byte signature recovers,
/// and, when a public key is attached, the recovered signer matches it.
pub fn verify_signatures(hash: Hash, sigs: &[PubAndSig]) -> Result<usize> {
    let mut passed = 0usize;
    for pas in sigs {
        if pas.signature.len() != 65 {
            continue;
        }
        let mut raw = [0u8; 65];
        raw.copy_from_slice(&pas.signature);
        // the source chain signs with v in {0,1}
        if raw[64] < 27 {
            raw[64] += 27;
        }
        let Ok(sig) = Signature::try_from(&raw[..]) else {
            continue;
        };
        let recovered: Address =
            match sig.recover(RecoveryMessage::Hash(hash)) {
                Ok(addr) => addr,
                Err(_) => continue,
            };
        if pas.pub_key.is_empty() {
            passed += 1;
        } else if address_of_pubkey(&pas.pub_key) == Some(recovered) {
            passed += 1;
        }
    }
    Ok(passed)
}

// Accepts 65-byte uncompressed keys (0x04 prefix) or the bare 64-byte body.
fn address_of_pubkey(pub_key: &[u8]) -> Option<Address> {
    let body: &[u8] = match pub_key.len() {
        65 if pub_key[0] == 4 => &pub_key[1..],
        64 => pub_key,
        _ => return None,
    };
    let h = keccak256(body);
    Some(Address::from_slice(&h.as_bytes()[12..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::core::k256::ecdsa::SigningKey;
    use ethers::core::k256::elliptic_curve::sec1::ToEncodedPoint;
    use ethers::signers::{LocalWallet, Signer};
    use ethers::utils::hex;
    use tkm_relayer_types::{ChainId, Height, NodeId};

    fn wallet(n: u8) -> LocalWallet {
        let mut seed = [n; 32];
        seed[0] = 1;
        LocalWallet::from(SigningKey::from_slice(&seed).expect("key"))
    }

    fn node_id(w: &LocalWallet) -> NodeId {
        let pk = w.signer().verifying_key().to_encoded_point(false);
        let mut id = [0u8; 64];
        id.copy_from_slice(&pk.as_bytes()[1..]);
        NodeId(id)
    }

    async fn sign_hash(w: &LocalWallet, hash: Hash) -> PubAndSig {
        let sig = w.sign_hash(hash).expect("sign");
        PubAndSig {
            pub_key: node_id(w).to_pubkey_bytes().to_vec(),
            signature: sig.to_vec(),
        }
    }

    async fn proof_fixture() -> CommitteeProof {
        let wallets: Vec<LocalWallet> = (1u8..=3).map(wallet).collect();
        let comm =
            Committee::new(wallets.iter().map(node_id).collect());
        let header = BlockHeader {
            chain_id: ChainId::MAIN,
            height: Height(999),
            elected_next_root: Some(comm.hash()),
            ..Default::default()
        };
        let boh = block_hash(&header);
        let mut pass = Vec::new();
        for w in &wallets {
            pass.push(sign_hash(w, boh).await);
        }
        CommitteeProof {
            header,
            comm,
            pass,
            syncing_epoch: EpochNum::NIL,
        }
    }

    #[tokio::test]
    async fn valid_proof_verifies() {
        let proof = proof_fixture().await;
        proof.verify(true).expect("verify");
    }

    #[tokio::test]
    async fn elected_root_mismatch_is_fatal() {
        let mut proof = proof_fixture().await;
        proof.header.elected_next_root = Some(keccak256(b"other"));
        assert!(proof.verify(true).is_err());
    }

    #[tokio::test]
    async fn empty_committee_is_rejected() {
        let mut proof = proof_fixture().await;
        proof.comm = Committee::default();
        assert!(proof.verify(false).is_err());
    }

    #[tokio::test]
    async fn subchain_header_fails_when_main_needed() {
        let mut proof = proof_fixture().await;
        proof.header.chain_id = ChainId(3);
        proof.header.elected_next_root = Some(proof.comm.hash());
        assert!(proof.verify(true).is_err());
        // signatures were made over the old block hash
        assert!(proof.verify(false).is_err());
    }

    #[tokio::test]
    async fn tampered_signatures_do_not_pass() {
        let proof = proof_fixture().await;
        let boh = block_hash(&proof.header);
        let mut bad = proof.pass.clone();
        for p in &mut bad {
            p.signature[5] ^= 0xff;
        }
        let passed = verify_signatures(boh, &bad).expect("verify");
        assert_eq!(passed, 0, "corrupted signatures must not count");
    }

    #[tokio::test]
    async fn empty_signatures_are_dropped_from_records() {
        let mut proof = proof_fixture().await;
        proof.pass.push(PubAndSig::default());
        let record = proof.for_abi();
        assert_eq!(record.sigs.len(), 3);
        assert_eq!(record.committee.len(), 3);
    }

    #[tokio::test]
    async fn x_data_record_carries_block_coordinates() {
        let mut proof = proof_fixture().await;
        proof.syncing_epoch = EpochNum(7);
        let record = proof.for_x_data_abi().expect("record");
        assert_eq!(record.chain_id, 0);
        assert_eq!(record.height, 999);
        assert_eq!(record.syncing_epoch, 7);
        assert!(!record.proofs.is_empty());
    }

    #[test]
    fn pubkey_address_forms_agree() {
        let w = wallet(9);
        let nid = node_id(&w);
        let full = nid.to_pubkey_bytes();
        assert_eq!(
            address_of_pubkey(&full),
            address_of_pubkey(&nid.0),
            "65- and 64-byte forms must derive the same address"
        );
        assert_eq!(
            address_of_pubkey(&full),
            Some(w.address()),
            "derived address must match the wallet address \
             (wallet: 0x{})",
            hex::encode(w.address())
        );
    }
}
