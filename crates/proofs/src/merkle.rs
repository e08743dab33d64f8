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

use tkm_relayer_types::{keccak256, Hash, ProofNode};

/// Combines a sibling hash with the accumulator. `position == true` puts the
/// sibling on the left of the pair.
pub fn hash_pair(position: bool, sibling: Hash, acc: Hash) -> Hash {
    let mut buf = [0u8; 64];
    if position {
        buf[..32].copy_from_slice(sibling.as_bytes());
        buf[32..].copy_from_slice(acc.as_bytes());
    } else {
        buf[..32].copy_from_slice(acc.as_bytes());
        buf[32..].copy_from_slice(sibling.as_bytes());
    }
    keccak256(buf)
}

/// Folds a raw (uncompacted) proof chain starting from `leaf`.
pub fn fold_raw(nodes: &[ProofNode], leaf: Hash) -> Hash {
    nodes
        .iter()
        .fold(leaf, |acc, n| hash_pair(n.position, n.hash, acc))
}

/// The Merkle root of `leaves`. An odd level duplicates its last element.
/// An empty input hashes to the empty keccak digest.
pub fn root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return keccak256([]);
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("non-empty level"));
        }
        level = level
            .chunks(2)
            .map(|pair| hash_pair(false, pair[1], pair[0]))
            .collect();
    }
    level[0]
}

/// The Merkle root of `leaves` together with the inclusion proof of
/// `leaves[index]`, as a raw chain of [`ProofNode`]s.
pub fn root_with_proof(
    leaves: &[Hash],
    index: usize,
) -> Option<(Hash, Vec<ProofNode>)> {
    if index >= leaves.len() {
        return None;
    }
    let mut level = leaves.to_vec();
    let mut idx = index;
    let mut proof = Vec::new();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("non-empty level"));
        }
        let sibling = idx ^ 1;
        proof.push(ProofNode {
            hash: level[sibling],
            // an odd index means the sibling sits on the left
            position: idx % 2 == 1,
        });
        level = level
            .chunks(2)
            .map(|pair| hash_pair(false, pair[1], pair[0]))
            .collect();
        idx /= 2;
    }
    Some((level[0], proof))
}

/// One step of a compacted proof chain: `repeat + 1` consecutive
/// applications of the same `(hash, position)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofStep {
    /// Sibling hash.
    pub hash: Hash,
    /// `true` when the sibling is the left input of the pair hash.
    pub position: bool,
    /// Number of consecutive repetitions minus one.
    pub repeat: u8,
}

impl ProofStep {
    /// Whether this step compacts with another `(hash, position)` pair.
    fn same(&self, hash: Hash, position: bool) -> bool {
        self.hash == hash && self.position == position
    }

    /// Applies this step `repeat + 1` times.
    pub fn fold(&self, leaf: Hash) -> Hash {
        let mut acc = leaf;
        for _ in 0..=self.repeat {
            acc = hash_pair(self.position, self.hash, acc);
        }
        acc
    }
}

/// A compacted Merkle proof chain, ordered from the leaf towards the root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofChain(pub Vec<ProofStep>);

impl ProofChain {
    /// Compacts a raw chain: consecutive nodes with identical
    /// `(hash, position)` collapse into one step with `repeat` incremented.
    pub fn compact(nodes: &[ProofNode]) -> Self {
        let mut steps: Vec<ProofStep> = Vec::new();
        let mut last: Option<usize> = None;
        for node in nodes {
            match last {
                Some(i)
                    if steps[i].same(node.hash, node.position)
                        && steps[i].repeat < u8::MAX =>
                {
                    steps[i].repeat += 1;
                }
                _ => {
                    steps.push(ProofStep {
                        hash: node.hash,
                        position: node.position,
                        repeat: 0,
                    });
                    last = Some(steps.len() - 1);
                }
            }
        }
        Self(steps)
    }

    /// Expands back into the raw chain.
    pub fn expand(&self) -> Vec<ProofNode> {
        let mut nodes = Vec::with_capacity(self.size());
        for step in &self.0 {
            for _ in 0..=step.repeat {
                nodes.push(ProofNode {
                    hash: step.hash,
                    position: step.position,
                });
            }
        }
        nodes
    }

    /// Folds the chain starting from `leaf`.
    pub fn fold(&self, leaf: Hash) -> Hash {
        self.0.iter().fold(leaf, |acc, step| step.fold(acc))
    }

    /// Number of raw nodes represented.
    pub fn size(&self) -> usize {
        self.0.iter().map(|s| s.repeat as usize + 1).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(tag: &[u8]) -> Hash {
        keccak256(tag)
    }

    #[test]
    fn pair_hash_is_order_sensitive() {
        let (a, b) = (h(b"a"), h(b"b"));
        assert_eq!(hash_pair(true, a, b), hash_pair(false, b, a));
        assert_ne!(hash_pair(true, a, b), hash_pair(false, a, b));
    }

    #[test]
    fn root_matches_folded_proof_for_every_leaf() {
        let leaves: Vec<Hash> =
            (0u8..7).map(|i| keccak256([i])).collect();
        let expected = root(&leaves);
        for (i, leaf) in leaves.iter().enumerate() {
            let (r, proof) = root_with_proof(&leaves, i).expect("in range");
            assert_eq!(r, expected);
            assert_eq!(fold_raw(&proof, *leaf), expected, "leaf {i}");
        }
    }

    #[test]
    fn single_leaf_has_empty_proof() {
        let leaves = vec![h(b"only")];
        let (r, proof) = root_with_proof(&leaves, 0).unwrap();
        assert_eq!(r, leaves[0]);
        assert!(proof.is_empty());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        assert!(root_with_proof(&[h(b"x")], 1).is_none());
    }

    #[test]
    fn compaction_collapses_consecutive_pairs() {
        let (h1, h2) = (h(b"h1"), h(b"h2"));
        let raw = vec![
            ProofNode { hash: h1, position: true },
            ProofNode { hash: h1, position: true },
            ProofNode { hash: h2, position: false },
        ];
        let chain = ProofChain::compact(&raw);
        assert_eq!(
            chain.0,
            vec![
                ProofStep { hash: h1, position: true, repeat: 1 },
                ProofStep { hash: h2, position: false, repeat: 0 },
            ]
        );
        let leaf = h(b"leaf");
        assert_eq!(chain.fold(leaf), fold_raw(&raw, leaf));
        assert_eq!(chain.expand(), raw);
        assert_eq!(chain.size(), 3);
    }

    #[test]
    fn same_hash_different_position_does_not_collapse() {
        let h1 = h(b"h1");
        let raw = vec![
            ProofNode { hash: h1, position: true },
            ProofNode { hash: h1, position: false },
        ];
        assert_eq!(ProofChain::compact(&raw).0.len(), 2);
    }

    #[test]
    fn compaction_roundtrips_a_generated_proof() {
        // duplicated odd tails produce naturally repeating siblings
        let leaves: Vec<Hash> = (0u8..5).map(|i| keccak256([i])).collect();
        let (r, proof) = root_with_proof(&leaves, 4).unwrap();
        let chain = ProofChain::compact(&proof);
        assert_eq!(chain.fold(leaves[4]), r);
        assert_eq!(fold_raw(&chain.expand(), leaves[4]), r);
    }
}
