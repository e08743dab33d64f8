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

//! # Proofs
//!
//! Everything between raw source-chain evidence and the typed records the
//! target light-clients accept: Merkle proof chains with their compaction
//! and folding rules, header field proofs, committee proofs with local
//! verification, and the receipt-proof builders.

/// Proof builders turning tx-final-proofs into on-chain records.
pub mod builder;
/// Committee proofs and their local verification.
pub mod committee;
/// Block header field hashing.
pub mod header;
/// Merkle pair hashing, roots and proof chains.
pub mod merkle;
/// The typed records submitted to the target contracts.
pub mod records;

pub use builder::{locate_log, receipt_data, receipt_proof};
pub use committee::{verify_signatures, CommitteeProof};
pub use header::{block_hash, elected_next_root_proof};
pub use merkle::{
    fold_raw, hash_pair, root, root_with_proof, ProofChain, ProofStep,
};
