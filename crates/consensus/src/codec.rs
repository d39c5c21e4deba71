//! Message encoding and decoding for network transport.
//!
//! # Wire Format
//!
//! ```text
//! [version: u8][payload: SBOR-encoded message]
//! ```
//!
//! - Version is currently `1`
//! - Payload is the SBOR encoding of the message for the channel
//!
//! Message type is determined by the channel the bytes arrived on, not by a
//! field in the message. Signatures always cover the SBOR encoding of a value
//! with its signature field zeroed, so re-encoding a received message yields
//! the exact signed bytes.

use crate::traits::ChannelId;
use banjo_types::{Block, Proposal, Vote};
use thiserror::Error;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Unknown wire version: {0}")]
    UnknownVersion(u8),

    #[error("Message too short")]
    MessageTooShort,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),
}

/// A decoded inbound payload, typed by its channel.
#[derive(Debug, Clone)]
pub enum WirePayload {
    /// A standalone vote (Vote channel).
    Vote(Vote),
    /// A full block (Block or Header channel).
    Block(Block),
    /// A proposal (Proposal channel).
    Proposal(Proposal),
}

fn encode<T: sbor::prelude::BasicEncode>(value: &T) -> Result<Vec<u8>, CodecError> {
    let payload =
        sbor::basic_encode(value).map_err(|e| CodecError::Encode(format!("{:?}", e)))?;
    let mut bytes = Vec::with_capacity(1 + payload.len());
    bytes.push(WIRE_VERSION);
    bytes.extend(payload);
    Ok(bytes)
}

/// Encode a vote for the Vote channel.
pub fn encode_vote(vote: &Vote) -> Result<Vec<u8>, CodecError> {
    encode(vote)
}

/// Encode a block for the Block channel.
pub fn encode_block(block: &Block) -> Result<Vec<u8>, CodecError> {
    encode(block)
}

/// Encode a proposal for the Proposal channel.
pub fn encode_proposal(proposal: &Proposal) -> Result<Vec<u8>, CodecError> {
    encode(proposal)
}

/// Decode an inbound message based on the channel it arrived on.
pub fn decode_message(channel: ChannelId, data: &[u8]) -> Result<WirePayload, CodecError> {
    if data.is_empty() {
        return Err(CodecError::MessageTooShort);
    }

    let version = data[0];
    if version != WIRE_VERSION {
        return Err(CodecError::UnknownVersion(version));
    }
    let payload = &data[1..];

    match channel {
        ChannelId::Vote => {
            let vote: Vote = sbor::basic_decode(payload)
                .map_err(|e| CodecError::Decode(format!("{:?}", e)))?;
            Ok(WirePayload::Vote(vote))
        }
        ChannelId::Block | ChannelId::Header => {
            let block: Block = sbor::basic_decode(payload)
                .map_err(|e| CodecError::Decode(format!("{:?}", e)))?;
            Ok(WirePayload::Block(block))
        }
        ChannelId::Proposal => {
            let proposal: Proposal = sbor::basic_decode(payload)
                .map_err(|e| CodecError::Decode(format!("{:?}", e)))?;
            Ok(WirePayload::Proposal(proposal))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banjo_types::{
        test_utils::{test_hash, test_key},
        Block, CommitCertificate, Proposal, Signature, VoteSet,
    };

    fn make_block() -> Block {
        let key = test_key(1);
        let mut block = Block {
            chain_id: "banjo-test".into(),
            parent: test_hash(1),
            height: 2,
            epoch: 3,
            proposer: key.validator_id(),
            timestamp: 1_700_000_000,
            txs: vec![b"alpha".to_vec(), b"beta".to_vec()],
            state_root: test_hash(9),
            hcc: CommitCertificate::new(test_hash(1), VoteSet::new()),
            signature: Signature::zero(),
        };
        block.sign(&key);
        block
    }

    #[test]
    fn vote_round_trip() {
        let vote = Vote::new(test_hash(4), 4, 2, &test_key(2));
        let bytes = encode_vote(&vote).unwrap();
        assert_eq!(bytes[0], WIRE_VERSION);

        match decode_message(ChannelId::Vote, &bytes).unwrap() {
            WirePayload::Vote(decoded) => {
                assert_eq!(decoded, vote);
                assert!(decoded.verify());
            }
            other => panic!("Expected vote, got {:?}", other),
        }
    }

    #[test]
    fn block_round_trip_on_both_block_channels() {
        let block = make_block();
        let bytes = encode_block(&block).unwrap();

        for channel in [ChannelId::Block, ChannelId::Header] {
            match decode_message(channel, &bytes).unwrap() {
                WirePayload::Block(decoded) => {
                    assert_eq!(decoded, block);
                    assert_eq!(decoded.hash(), block.hash());
                    assert!(decoded.verify_signature());
                }
                other => panic!("Expected block, got {:?}", other),
            }
        }
    }

    #[test]
    fn proposal_round_trip() {
        let block = make_block();
        let key = test_key(1);
        let mut votes = VoteSet::new();
        votes.add_vote(Vote::new(block.hash(), block.height, block.epoch, &key));
        let proposal = Proposal::new(block, key.validator_id(), votes);

        let bytes = encode_proposal(&proposal).unwrap();
        match decode_message(ChannelId::Proposal, &bytes).unwrap() {
            WirePayload::Proposal(decoded) => assert_eq!(decoded, proposal),
            other => panic!("Expected proposal, got {:?}", other),
        }
    }

    #[test]
    fn unknown_version_is_rejected() {
        let vote = Vote::new(test_hash(4), 4, 2, &test_key(2));
        let mut bytes = encode_vote(&vote).unwrap();
        bytes[0] = 99;
        assert!(matches!(
            decode_message(ChannelId::Vote, &bytes),
            Err(CodecError::UnknownVersion(99))
        ));
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(
            decode_message(ChannelId::Vote, &[]),
            Err(CodecError::MessageTooShort)
        ));
    }

    #[test]
    fn garbage_payload_is_rejected() {
        let bytes = vec![WIRE_VERSION, 0xde, 0xad, 0xbe, 0xef];
        assert!(matches!(
            decode_message(ChannelId::Block, &bytes),
            Err(CodecError::Decode(_))
        ));
    }
}
