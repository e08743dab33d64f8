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

//! Call data and event plumbing for the four target contracts: the TKM
//! light-client, the admin-updatable light-client, the X-Relay light-client
//! and the MapCrossChainService.

use ethers::abi::{ParamType, Token};
use ethers::types::U256;
use tkm_relayer_types::{keccak256, EpochNum, Hash, NodeId};
use tkm_relayer_utils::{Error, Result};

/// The 4-byte function selector of `signature`.
pub fn selector(signature: &str) -> [u8; 4] {
    let h = keccak256(signature.as_bytes());
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&h.as_bytes()[..4]);
    sel
}

/// Selector plus ABI-encoded arguments.
pub fn call_data(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend(ethers::abi::encode(args));
    data
}

/// An epoch read from a contract; the nil sentinel is `uint64.max` and
/// larger values are equally unusable.
pub fn epoch_from_token(token: &Token) -> EpochNum {
    match token {
        Token::Uint(v) if *v < U256::from(u64::MAX) => EpochNum(v.as_u64()),
        _ => EpochNum::NIL,
    }
}

/// A height read from a contract, nil-aware like [`epoch_from_token`].
pub fn height_from_token(token: &Token) -> tkm_relayer_types::Height {
    match token {
        Token::Uint(v) if *v < U256::from(u64::MAX) => {
            tkm_relayer_types::Height(v.as_u64())
        }
        _ => tkm_relayer_types::Height::NIL,
    }
}

/// The `UpdateCommittee(uint256,bytes32)` event every light-client flavour
/// emits after a successful committee update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    /// The epoch the committee was stored for.
    pub epoch: EpochNum,
    /// The hash of the stored committee.
    pub comm_hash: Hash,
}

impl std::fmt::Display for UpdateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UpdateCommittee(epoch:{}, commHash:{:x})",
            self.epoch, self.comm_hash
        )
    }
}

/// Topic 0 of the update event.
pub fn update_event_topic() -> Hash {
    keccak256("UpdateCommittee(uint256,bytes32)".as_bytes())
}

/// Parses the update event out of one receipt log (both epoch and hash are
/// indexed). `None` when the log is a different event.
pub fn parse_update_event(log: &ethers::types::Log) -> Result<Option<UpdateEvent>> {
    if log.topics.first() != Some(&update_event_topic()) {
        return Ok(None);
    }
    if log.topics.len() < 3 {
        return Err(Error::Target("invalid log".into()));
    }
    let mut epoch_bytes = [0u8; 8];
    epoch_bytes.copy_from_slice(&log.topics[1].as_bytes()[24..]);
    Ok(Some(UpdateEvent {
        epoch: EpochNum(u64::from_be_bytes(epoch_bytes)),
        comm_hash: log.topics[2],
    }))
}

/// Scans a receipt for the update event.
pub fn find_update_event(
    logs: &[ethers::types::Log],
) -> Result<UpdateEvent> {
    for log in logs {
        if let Some(event) = parse_update_event(log)? {
            return Ok(event);
        }
    }
    Err(Error::Target("no update committee event found".into()))
}

/// The TKM light-client contract.
pub mod light_client {
    use super::*;
    use tkm_proofs::records::{encode_record, CommitteeRecord};

    const UPDATE_COMMITTEE: &str = "updateCommittee(bytes)";
    const LAST_HEIGHT: &str = "lastHeight()";
    const LATEST2_EPOCH: &str = "latest2Epoch(uint256)";
    const CHECK_EPOCH_COMMITTEE: &str = "checkEpochCommittee(uint256)";

    /// `updateCommittee(bytes)` with the committee record packed inside.
    pub fn encode_update_committee(record: &CommitteeRecord) -> Vec<u8> {
        let inner = encode_record(record);
        call_data(UPDATE_COMMITTEE, &[Token::Bytes(inner)])
    }

    /// `lastHeight()` call data.
    pub fn encode_last_height() -> Vec<u8> {
        call_data(LAST_HEIGHT, &[])
    }

    /// Return types of `lastHeight()`.
    pub fn last_height_outputs() -> Vec<ParamType> {
        vec![ParamType::Uint(256)]
    }

    /// `latest2Epoch(index)` call data (index 0 and 1 name the two most
    /// recent stored epochs).
    pub fn encode_latest2_epoch(index: u64) -> Vec<u8> {
        call_data(LATEST2_EPOCH, &[Token::Uint(U256::from(index))])
    }

    /// Return types of `latest2Epoch`.
    pub fn latest2_epoch_outputs() -> Vec<ParamType> {
        vec![ParamType::Uint(256)]
    }

    /// `checkEpochCommittee(epoch)` call data.
    pub fn encode_check_epoch_committee(epoch: EpochNum) -> Vec<u8> {
        call_data(
            CHECK_EPOCH_COMMITTEE,
            &[Token::Uint(U256::from(epoch.0))],
        )
    }

    /// Return types of `checkEpochCommittee`.
    pub fn check_epoch_committee_outputs() -> Vec<ParamType> {
        vec![ParamType::Array(Box::new(ParamType::Address))]
    }
}

/// The admin-updatable TKM light-client contract.
pub mod updatable {
    use super::*;

    const UPDATE_COMMITTEE: &str = "updateCommittee(uint256,bytes[])";
    const LAST_EPOCH: &str = "lastEpoch()";
    const CHECK_EPOCH_COMMITTEE: &str = "checkEpochCommittee(uint256)";

    /// `updateCommittee(epoch, committee)` call data.
    pub fn encode_update_committee(
        epoch: EpochNum,
        members: &[NodeId],
    ) -> Vec<u8> {
        let committee = Token::Array(
            members.iter().map(|m| Token::Bytes(m.0.to_vec())).collect(),
        );
        call_data(
            UPDATE_COMMITTEE,
            &[Token::Uint(U256::from(epoch.0)), committee],
        )
    }

    /// `lastEpoch()` call data.
    pub fn encode_last_epoch() -> Vec<u8> {
        call_data(LAST_EPOCH, &[])
    }

    /// Return types of `lastEpoch()`.
    pub fn last_epoch_outputs() -> Vec<ParamType> {
        vec![ParamType::Uint(256)]
    }

    /// `checkEpochCommittee(epoch)` call data.
    pub fn encode_check_epoch_committee(epoch: EpochNum) -> Vec<u8> {
        call_data(
            CHECK_EPOCH_COMMITTEE,
            &[Token::Uint(U256::from(epoch.0))],
        )
    }

    /// Return types of `checkEpochCommittee`.
    pub fn check_epoch_committee_outputs() -> Vec<ParamType> {
        vec![ParamType::Array(Box::new(ParamType::Address))]
    }
}

/// The X-Relay light-client contract.
pub mod xlight_client {
    use super::*;
    use tkm_proofs::records::{ToToken, XCommitteeDataRecord};

    const UPDATE_COMMITTEE: &str =
        "updateCommittee(((bytes32,bool,uint8)[],bytes[],bytes[],uint32,\
         uint64,uint64))";
    const LAST_HEIGHT: &str = "lastHeight()";
    const ENDS_OF_EPOCH: &str = "endsOfEpoch(uint256)";
    const CHECK_EPOCH_COMMITTEE: &str = "checkEpochCommittee(uint256)";

    /// `updateCommittee(proofData)` call data.
    pub fn encode_update_committee(
        record: &XCommitteeDataRecord,
    ) -> Vec<u8> {
        call_data(UPDATE_COMMITTEE, &[record.to_token()])
    }

    /// `lastHeight()` call data.
    pub fn encode_last_height() -> Vec<u8> {
        call_data(LAST_HEIGHT, &[])
    }

    /// Return types of `lastHeight()`.
    pub fn last_height_outputs() -> Vec<ParamType> {
        vec![ParamType::Uint(256)]
    }

    /// `endsOfEpoch(index)` call data; index 1 is the last epoch the
    /// light-client can still verify against.
    pub fn encode_ends_of_epoch(index: u64) -> Vec<u8> {
        call_data(ENDS_OF_EPOCH, &[Token::Uint(U256::from(index))])
    }

    /// Return types of `endsOfEpoch`.
    pub fn ends_of_epoch_outputs() -> Vec<ParamType> {
        vec![ParamType::Uint(256)]
    }

    /// `checkEpochCommittee(epoch)` call data.
    pub fn encode_check_epoch_committee(epoch: EpochNum) -> Vec<u8> {
        call_data(
            CHECK_EPOCH_COMMITTEE,
            &[Token::Uint(U256::from(epoch.0))],
        )
    }

    /// Return types of `checkEpochCommittee`.
    pub fn check_epoch_committee_outputs() -> Vec<ParamType> {
        vec![ParamType::Array(Box::new(ParamType::Address))]
    }
}

/// The MapCrossChainService contract (target side) and the relay-side
/// transfer-out event.
pub mod mcs {
    use super::*;
    use tkm_relayer_types::Log;

    const TRANSFER_IN: &str = "transferIn(uint256,bytes)";
    const ORDER_LIST: &str = "orderList(bytes32)";
    const TRANSFER_OUT_EVENT: &str =
        "mapTransferOut(bytes,bytes,bytes32,uint256,uint256,bytes,uint256,\
         bytes)";

    /// Topic 0 of the `mapTransferOut` event watched on the source MCS.
    pub fn transfer_out_topic() -> Hash {
        keccak256(TRANSFER_OUT_EVENT.as_bytes())
    }

    /// `transferIn(srcChainId, proofBytes)` call data.
    pub fn encode_transfer_in(chain_id: U256, proof: Vec<u8>) -> Vec<u8> {
        call_data(
            TRANSFER_IN,
            &[Token::Uint(chain_id), Token::Bytes(proof)],
        )
    }

    /// `orderList(orderId)` call data.
    pub fn encode_order_list(order_id: Hash) -> Vec<u8> {
        call_data(
            ORDER_LIST,
            &[Token::FixedBytes(order_id.as_bytes().to_vec())],
        )
    }

    /// Return types of `orderList`.
    pub fn order_list_outputs() -> Vec<ParamType> {
        vec![ParamType::Bool]
    }

    /// A decoded `mapTransferOut` event.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MapTransferOut {
        /// The transferred token on the source chain.
        pub token: Vec<u8>,
        /// The sender on the source chain.
        pub from: Vec<u8>,
        /// The cross-chain transfer id; de-duplicates relays.
        pub order_id: Hash,
        /// The source chain id.
        pub from_chain: U256,
        /// The destination chain id.
        pub to_chain: U256,
        /// The recipient on the destination chain.
        pub to: Vec<u8>,
        /// The transferred amount.
        pub amount: U256,
        /// The token representation on the destination chain.
        pub to_chain_token: Vec<u8>,
    }

    impl std::fmt::Display for MapTransferOut {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(
                f,
                "mapTransferOut{{OrderId:{:x} {} -> {} Amount:{}}}",
                self.order_id, self.from_chain, self.to_chain, self.amount
            )
        }
    }

    /// Decodes the transfer-out event from a source-chain log.
    pub fn decode_transfer_out(log: &Log) -> Result<MapTransferOut> {
        let types = [
            ParamType::Bytes,
            ParamType::Bytes,
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Bytes,
            ParamType::Uint(256),
            ParamType::Bytes,
        ];
        let tokens = ethers::abi::decode(&types, &log.data)?;
        let mut it = tokens.into_iter();
        let take_bytes = |t: Option<Token>| -> Result<Vec<u8>> {
            match t {
                Some(Token::Bytes(b)) => Ok(b),
                other => Err(Error::Target(format!(
                    "unexpected transferOut field: {other:?}"
                ))),
            }
        };
        let token = take_bytes(it.next())?;
        let from = take_bytes(it.next())?;
        let order_id = match it.next() {
            Some(Token::FixedBytes(b)) if b.len() == 32 => {
                Hash::from_slice(&b)
            }
            other => {
                return Err(Error::Target(format!(
                    "unexpected orderId field: {other:?}"
                )))
            }
        };
        let take_uint = |t: Option<Token>| -> Result<U256> {
            match t {
                Some(Token::Uint(v)) => Ok(v),
                other => Err(Error::Target(format!(
                    "unexpected transferOut field: {other:?}"
                ))),
            }
        };
        let from_chain = take_uint(it.next())?;
        let to_chain = take_uint(it.next())?;
        let to = take_bytes(it.next())?;
        let amount = take_uint(it.next())?;
        let to_chain_token = take_bytes(it.next())?;
        Ok(MapTransferOut {
            token,
            from,
            order_id,
            from_chain,
            to_chain,
            to,
            amount,
            to_chain_token,
        })
    }

    /// Encodes a transfer-out event payload; the test half of
    /// [`decode_transfer_out`].
    pub fn encode_transfer_out(out: &MapTransferOut) -> Vec<u8> {
        ethers::abi::encode(&[
            Token::Bytes(out.token.clone()),
            Token::Bytes(out.from.clone()),
            Token::FixedBytes(out.order_id.as_bytes().to_vec()),
            Token::Uint(out.from_chain),
            Token::Uint(out.to_chain),
            Token::Bytes(out.to.clone()),
            Token::Uint(out.amount),
            Token::Bytes(out.to_chain_token.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tkm_relayer_types::Log;

    #[test]
    fn selector_is_first_four_keccak_bytes() {
        // well-known selector of transfer(address,uint256)
        assert_eq!(
            selector("transfer(address,uint256)"),
            [0xa9, 0x05, 0x9c, 0xbb]
        );
    }

    #[test]
    fn transfer_out_roundtrip() {
        let out = mcs::MapTransferOut {
            token: vec![1],
            from: vec![2, 3],
            order_id: keccak256(b"order-1"),
            from_chain: U256::from(70001u64),
            to_chain: U256::from(56u64),
            to: vec![4; 20],
            amount: U256::from(1_000_000u64),
            to_chain_token: vec![5; 20],
        };
        let log = Log {
            topics: vec![mcs::transfer_out_topic()],
            data: mcs::encode_transfer_out(&out),
            ..Default::default()
        };
        assert_eq!(mcs::decode_transfer_out(&log).expect("decode"), out);
    }

    #[test]
    fn update_event_parses_indexed_topics() {
        let mut topic1 = [0u8; 32];
        topic1[24..].copy_from_slice(&42u64.to_be_bytes());
        let comm_hash = keccak256(b"committee");
        let log = ethers::types::Log {
            topics: vec![
                update_event_topic(),
                Hash::from(topic1),
                comm_hash,
            ],
            ..Default::default()
        };
        let event = parse_update_event(&log).expect("parse").expect("match");
        assert_eq!(event.epoch, EpochNum(42));
        assert_eq!(event.comm_hash, comm_hash);
    }

    #[test]
    fn foreign_events_are_skipped() {
        let log = ethers::types::Log {
            topics: vec![keccak256(b"Other(uint256)")],
            ..Default::default()
        };
        assert!(parse_update_event(&log).expect("parse").is_none());
        assert!(find_update_event(&[log]).is_err());
    }

    #[test]
    fn nil_epoch_token_is_detected() {
        let nil = Token::Uint(U256::from(u64::MAX));
        assert!(epoch_from_token(&nil).is_nil());
        let ok = Token::Uint(U256::from(17u64));
        assert_eq!(epoch_from_token(&ok), EpochNum(17));
        assert!(height_from_token(&Token::Bool(true)).is_nil());
    }
}
