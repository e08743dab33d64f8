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

use std::collections::HashSet;
use std::fmt;

use parity_scale_codec::{Decode, Encode};

use crate::primitives::{keccak256, Address, Hash, NodeId};

/// The ordered signer set of one epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Committee {
    /// Member node ids, in election order.
    pub members: Vec<NodeId>,
}

impl Committee {
    /// Builds a committee from its members.
    pub fn new(members: Vec<NodeId>) -> Self {
        Self { members }
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// A committee is available once it has at least one member.
    pub fn is_available(&self) -> bool {
        !self.members.is_empty()
    }

    /// The committee hash compared against `Header.elected_next_root`:
    /// keccak over the SCALE encoding of the member list.
    pub fn hash(&self) -> Hash {
        keccak256(self.members.encode())
    }

    /// Whether this committee matches the given on-chain address set
    /// regardless of order.
    pub fn equals_addresses(&self, addrs: &[Address]) -> bool {
        if self.size() != addrs.len() {
            return false;
        }
        let mut set: HashSet<Address> = addrs.iter().copied().collect();
        for member in &self.members {
            if !set.remove(&member.address()) {
                return false;
            }
        }
        set.is_empty()
    }
}

impl fmt::Display for Committee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Committee{{{} members}}", self.size())
    }
}

/// A signer's public key and its signature over a block hash.
///
/// An empty `pub_key` means the verifier must recover it from the signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct PubAndSig {
    /// Uncompressed public key bytes, possibly empty.
    pub pub_key: Vec<u8>,
    /// 65-byte recoverable secp256k1 signature.
    pub signature: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nid(b: u8) -> NodeId {
        NodeId([b; 64])
    }

    #[test]
    fn availability() {
        assert!(!Committee::default().is_available());
        assert!(Committee::new(vec![nid(1)]).is_available());
    }

    #[test]
    fn hash_depends_on_order() {
        let a = Committee::new(vec![nid(1), nid(2)]);
        let b = Committee::new(vec![nid(2), nid(1)]);
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), Committee::new(vec![nid(1), nid(2)]).hash());
    }

    #[test]
    fn address_comparison_ignores_order() {
        let comm = Committee::new(vec![nid(1), nid(2), nid(3)]);
        let mut addrs: Vec<Address> =
            comm.members.iter().map(|m| m.address()).collect();
        addrs.reverse();
        assert!(comm.equals_addresses(&addrs));
        addrs.pop();
        assert!(!comm.equals_addresses(&addrs));
        addrs.push(nid(9).address());
        assert!(!comm.equals_addresses(&addrs));
    }
}
