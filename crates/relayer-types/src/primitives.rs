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

use parity_scale_codec::{Decode, Encode};
use sha3::{Digest, Keccak256};

/// 32-byte hash, keccak-256 everywhere.
pub type Hash = ethereum_types::H256;
/// 20-byte account address.
pub type Address = ethereum_types::H160;

/// Computes the keccak-256 digest of `data`.
pub fn keccak256(data: impl AsRef<[u8]>) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data.as_ref());
    Hash::from_slice(&hasher.finalize())
}

/// TKM chain identifier. Chain 0 is the main chain.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    Encode, Decode, serde::Serialize, serde::Deserialize,
)]
pub struct ChainId(pub u32);

impl ChainId {
    /// The main chain.
    pub const MAIN: ChainId = ChainId(0);
    /// The nil sentinel.
    pub const NIL: ChainId = ChainId(u32::MAX);

    /// Whether this is the main chain id.
    pub fn is_main(&self) -> bool {
        *self == Self::MAIN
    }

    /// Whether this is the nil sentinel.
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "ChainID<nil>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u32> for ChainId {
    fn from(v: u32) -> Self {
        ChainId(v)
    }
}

/// Block height on a TKM chain, with `u64::MAX` as the nil sentinel.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    Encode, Decode, serde::Serialize, serde::Deserialize,
)]
pub struct Height(pub u64);

impl Height {
    /// The nil sentinel.
    pub const NIL: Height = Height(u64::MAX);

    /// Whether this is the nil sentinel.
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    /// The epoch this height belongs to: `h / blocks_in_epoch`.
    pub fn epoch(&self, blocks_in_epoch: u64) -> EpochNum {
        if self.is_nil() {
            EpochNum::NIL
        } else {
            EpochNum(self.0 / blocks_in_epoch)
        }
    }

    /// The height plus `n`, saturating below the nil sentinel.
    pub fn add(&self, n: u64) -> Height {
        if self.is_nil() {
            *self
        } else {
            Height(self.0.saturating_add(n).min(u64::MAX - 1))
        }
    }

    /// Absolute difference and ordering against `other`:
    /// `(|self - other|, self.cmp(other))`.
    pub fn diff(&self, other: Height) -> (u64, std::cmp::Ordering) {
        (self.0.abs_diff(other.0), self.cmp(&other))
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "Height<nil>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for Height {
    fn from(v: u64) -> Self {
        Height(v)
    }
}

/// Epoch number, with `u64::MAX` as the nil sentinel.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    Encode, Decode, serde::Serialize, serde::Deserialize,
)]
pub struct EpochNum(pub u64);

impl EpochNum {
    /// The nil sentinel.
    pub const NIL: EpochNum = EpochNum(u64::MAX);

    /// Whether this is the nil sentinel.
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    /// The first height of this epoch.
    pub fn first_height(&self, blocks_in_epoch: u64) -> Height {
        if self.is_nil() {
            Height::NIL
        } else {
            Height(self.0 * blocks_in_epoch)
        }
    }

    /// The last height of this epoch.
    pub fn last_height(&self, blocks_in_epoch: u64) -> Height {
        if self.is_nil() {
            Height::NIL
        } else {
            Height((self.0 + 1) * blocks_in_epoch - 1)
        }
    }

    /// The next epoch.
    pub fn next(&self) -> EpochNum {
        if self.is_nil() {
            *self
        } else {
            EpochNum(self.0 + 1)
        }
    }
}

impl fmt::Display for EpochNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "Epoch<nil>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for EpochNum {
    fn from(v: u64) -> Self {
        EpochNum(v)
    }
}

/// A committee member: the 64-byte uncompressed secp256k1 public key without
/// the `0x04` prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct NodeId(pub [u8; 64]);

impl NodeId {
    /// The account address of this node: `keccak(node_id)[12..]`.
    pub fn address(&self) -> Address {
        let h = keccak256(self.0);
        Address::from_slice(&h.as_bytes()[12..])
    }

    /// The uncompressed public key bytes (`0x04` prefix restored).
    pub fn to_pubkey_bytes(&self) -> [u8; 65] {
        let mut pk = [0u8; 65];
        pk[0] = 4;
        pk[1..].copy_from_slice(&self.0);
        pk
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId(0x{}...)", hex::encode(&self.0[..5]))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<[u8; 64]> for NodeId {
    fn from(v: [u8; 64]) -> Self {
        NodeId(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_of_height() {
        assert_eq!(Height(0).epoch(1000), EpochNum(0));
        assert_eq!(Height(999).epoch(1000), EpochNum(0));
        assert_eq!(Height(1000).epoch(1000), EpochNum(1));
        assert!(Height::NIL.epoch(1000).is_nil());
    }

    #[test]
    fn epoch_bounds() {
        assert_eq!(EpochNum(0).last_height(1000), Height(999));
        assert_eq!(EpochNum(3).first_height(1000), Height(3000));
        assert_eq!(EpochNum(3).last_height(1000), Height(3999));
        assert!(EpochNum::NIL.last_height(1000).is_nil());
    }

    #[test]
    fn height_diff_orders() {
        use std::cmp::Ordering;
        assert_eq!(Height(10).diff(Height(12)), (2, Ordering::Less));
        assert_eq!(Height(12).diff(Height(10)), (2, Ordering::Greater));
        assert_eq!(Height(10).diff(Height(10)), (0, Ordering::Equal));
    }

    #[test]
    fn node_id_address_is_keccak_suffix() {
        let nid = NodeId([7u8; 64]);
        let h = keccak256(nid.0);
        assert_eq!(nid.address().as_bytes(), &h.as_bytes()[12..]);
        assert_eq!(nid.to_pubkey_bytes()[0], 4);
    }
}
