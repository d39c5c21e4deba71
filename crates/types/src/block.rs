//! Blocks, commit certificates, and the store-side block view.

use crate::{Hash, PrivateKey, Signature, ValidatorId, ValidatorSet, VoteSet};
use std::fmt;
use std::ops::Deref;

/// A commit certificate reference: the highest block the issuer has observed
/// with a majority vote set, plus the supporting votes.
///
/// Embedded in every block as its HCC. The vote set may be empty when no
/// proof is required (e.g. a certificate naming the genesis block).
#[derive(Debug, Clone, Default, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct CommitCertificate {
    /// The certified block.
    pub block_hash: Hash,
    /// Votes supporting the certificate.
    pub votes: VoteSet,
}

impl CommitCertificate {
    /// Create a certificate for `block_hash` with the given votes.
    pub fn new(block_hash: Hash, votes: VoteSet) -> Self {
        CommitCertificate { block_hash, votes }
    }

    /// Whether the carried votes are consistent with the certificate.
    ///
    /// Every vote must reference `block_hash` and carry a verifying
    /// signature; when votes are present they must form a majority under
    /// `validators`. An empty vote set is acceptable (no proof claimed).
    pub fn is_valid(&self, validators: &ValidatorSet) -> bool {
        if self.votes.is_empty() {
            return true;
        }
        self.votes_are_consistent() && validators.has_majority(&self.votes)
    }

    /// Whether the certificate carries an explicit majority proof.
    ///
    /// Unlike [`is_valid`](Self::is_valid), an empty vote set fails: this is
    /// the check used where a proof is required.
    pub fn is_proven(&self, validators: &ValidatorSet) -> bool {
        !self.votes.is_empty()
            && self.votes_are_consistent()
            && validators.has_majority(&self.votes)
    }

    fn votes_are_consistent(&self) -> bool {
        self.votes
            .votes()
            .all(|v| v.block_hash == self.block_hash && v.verify())
    }
}

/// A block in the chain.
///
/// `hash()` and the signature both cover the canonical encoding with the
/// signature field zeroed, so a block's hash is independent of its signature.
#[derive(Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct Block {
    /// Chain this block belongs to.
    pub chain_id: String,
    /// Hash of the parent block; [`Hash::ZERO`] for genesis.
    pub parent: Hash,
    /// Position in the chain: `parent.height + 1`.
    pub height: u64,
    /// Epoch of proposal; strictly greater than the parent's epoch.
    pub epoch: u64,
    /// The validator that proposed this block.
    pub proposer: ValidatorId,
    /// Proposal time, unix seconds.
    pub timestamp: u64,
    /// Opaque transaction payloads, interpreted by the ledger.
    pub txs: Vec<Vec<u8>>,
    /// State root after applying `txs` on the parent's state.
    pub state_root: Hash,
    /// Highest committed certificate observed by the proposer.
    pub hcc: CommitCertificate,
    /// Proposer signature over the sign-bytes.
    pub signature: Signature,
}

impl Block {
    /// The canonical encoding with the signature zeroed.
    pub fn sign_bytes(&self) -> Vec<u8> {
        let unsigned = Block {
            signature: Signature::zero(),
            ..self.clone()
        };
        sbor::basic_encode(&unsigned).expect("block should be encodable")
    }

    /// The block hash: blake3 over the sign-bytes.
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.sign_bytes())
    }

    /// Sign the block with the proposer's key.
    pub fn sign(&mut self, key: &PrivateKey) {
        self.signature = key.sign(&self.sign_bytes());
    }

    /// Verify the signature against the proposer identity.
    pub fn verify_signature(&self) -> bool {
        self.proposer.verify(&self.sign_bytes(), &self.signature)
    }

    /// Structural validation of the block body.
    ///
    /// Chain-contextual rules (height linkage, epoch ordering, HCC ancestry)
    /// are the consensus engine's job; this checks only what the block can
    /// vouch for by itself.
    pub fn validate_basic(&self) -> Result<(), BlockError> {
        if self.parent.is_zero() {
            return Err(BlockError::MissingParentRef);
        }
        if self.epoch == 0 {
            return Err(BlockError::GenesisEpoch);
        }
        if !self.verify_signature() {
            return Err(BlockError::BadSignature);
        }
        Ok(())
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("hash", &self.hash())
            .field("parent", &self.parent)
            .field("height", &self.height)
            .field("epoch", &self.epoch)
            .field("proposer", &self.proposer)
            .field("txs", &self.txs.len())
            .finish_non_exhaustive()
    }
}

/// Structural block validation failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("Block has no parent reference")]
    MissingParentRef,

    #[error("Non-genesis block carries epoch 0")]
    GenesisEpoch,

    #[error("Proposer signature does not verify")]
    BadSignature,
}

/// Lifecycle status of a block in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub enum BlockStatus {
    /// Received or proposed, not yet validated.
    Pending,
    /// Validated and applied on the ledger.
    Valid,
    /// Failed validation; never reconsidered.
    Invalid,
    /// A commit certificate for this block has been observed.
    Committed,
    /// Irreversibly part of the canonical chain.
    Finalized,
}

impl BlockStatus {
    /// Valid, Committed, and Finalized blocks are all valid.
    pub fn is_valid(&self) -> bool {
        matches!(
            self,
            BlockStatus::Valid | BlockStatus::Committed | BlockStatus::Finalized
        )
    }

    /// Committed and Finalized blocks are both committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, BlockStatus::Committed | BlockStatus::Finalized)
    }

    /// Only Finalized blocks are finalized.
    pub fn is_finalized(&self) -> bool {
        matches!(self, BlockStatus::Finalized)
    }
}

/// The in-store view of a block: the block plus chain-shape metadata
/// maintained by the chain store.
///
/// Dereferences to the inner [`Block`] for field access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedBlock {
    /// The block itself.
    pub block: Block,
    /// Hashes of known children.
    pub children: Vec<Hash>,
    /// Lifecycle status.
    pub status: BlockStatus,
    /// Set when applying this block's transactions changed the validator set.
    pub has_validator_update: bool,
}

impl ExtendedBlock {
    /// Wrap a freshly stored block.
    pub fn pending(block: Block) -> Self {
        ExtendedBlock {
            block,
            children: Vec::new(),
            status: BlockStatus::Pending,
            has_validator_update: false,
        }
    }

    /// The block hash.
    pub fn hash(&self) -> Hash {
        self.block.hash()
    }
}

impl Deref for ExtendedBlock {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_hash, test_key, test_validator_set};
    use crate::Vote;

    fn make_block(key: &PrivateKey, parent: Hash, height: u64, epoch: u64) -> Block {
        let mut block = Block {
            chain_id: "banjo-test".into(),
            parent,
            height,
            epoch,
            proposer: key.validator_id(),
            timestamp: 1_700_000_000,
            txs: vec![b"tx".to_vec()],
            state_root: test_hash(42),
            hcc: CommitCertificate::default(),
            signature: Signature::zero(),
        };
        block.sign(key);
        block
    }

    #[test]
    fn hash_excludes_signature() {
        let key = test_key(1);
        let mut block = make_block(&key, test_hash(1), 1, 1);
        let hash = block.hash();
        block.signature = Signature::zero();
        assert_eq!(block.hash(), hash);
    }

    #[test]
    fn signature_round_trip() {
        let key = test_key(1);
        let block = make_block(&key, test_hash(1), 1, 1);
        assert!(block.verify_signature());
        assert_eq!(block.validate_basic(), Ok(()));

        let mut tampered = block.clone();
        tampered.height = 2;
        assert_eq!(tampered.validate_basic(), Err(BlockError::BadSignature));
    }

    #[test]
    fn basic_validation_rejects_missing_parent_and_epoch_zero() {
        let key = test_key(1);
        let mut block = make_block(&key, Hash::ZERO, 1, 1);
        block.sign(&key);
        assert_eq!(block.validate_basic(), Err(BlockError::MissingParentRef));

        let mut block = make_block(&key, test_hash(1), 1, 0);
        block.sign(&key);
        assert_eq!(block.validate_basic(), Err(BlockError::GenesisEpoch));
    }

    #[test]
    fn certificate_validity_and_proof() {
        let (keys, set) = test_validator_set(4, 100);
        let target = test_hash(7);

        // Empty certificate: valid but not proven.
        let empty = CommitCertificate::new(target, VoteSet::new());
        assert!(empty.is_valid(&set));
        assert!(!empty.is_proven(&set));

        // Three of four: valid and proven.
        let mut votes = VoteSet::new();
        for key in keys.iter().take(3) {
            votes.add_vote(Vote::new(target, 7, 2, key));
        }
        let proven = CommitCertificate::new(target, votes.clone());
        assert!(proven.is_valid(&set));
        assert!(proven.is_proven(&set));

        // A vote for a different block poisons the certificate.
        let mut mixed = votes;
        mixed.add_vote(Vote::new(test_hash(8), 7, 2, &keys[3]));
        let bad = CommitCertificate::new(target, mixed);
        assert!(!bad.is_valid(&set));
    }

    #[test]
    fn status_predicates() {
        assert!(BlockStatus::Valid.is_valid());
        assert!(BlockStatus::Committed.is_valid());
        assert!(BlockStatus::Finalized.is_valid());
        assert!(!BlockStatus::Pending.is_valid());
        assert!(!BlockStatus::Invalid.is_valid());

        assert!(BlockStatus::Committed.is_committed());
        assert!(BlockStatus::Finalized.is_committed());
        assert!(!BlockStatus::Valid.is_committed());

        assert!(BlockStatus::Finalized.is_finalized());
        assert!(!BlockStatus::Committed.is_finalized());
    }
}
