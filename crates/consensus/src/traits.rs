//! Collaborator interfaces.
//!
//! The consensus core never owns its collaborators: the validator manager,
//! chain store, ledger, dispatcher, and state store are passed in at
//! construction as `Arc<dyn Trait>` handles. This keeps the engine free of
//! cyclic references and lets tests substitute in-memory doubles.

use banjo_types::{Block, ExtendedBlock, Hash, ValidatorId, ValidatorSet, Vote, VoteSet};
use thiserror::Error;

/// Validator membership and proposer rotation, read-only to the core.
///
/// Majority arithmetic lives on [`ValidatorSet::has_majority`].
pub trait ValidatorManager: Send + Sync {
    /// The validator set authorized to vote at `block_hash`.
    fn validator_set(&self, block_hash: &Hash) -> ValidatorSet;

    /// The validator set that takes effect after `block_hash`.
    fn next_validator_set(&self, block_hash: &Hash) -> ValidatorSet;

    /// The proposer for `epoch`, derived from `block_hash` (the engine passes
    /// its last finalized block).
    fn next_proposer(&self, block_hash: &Hash, epoch: u64) -> ValidatorId;
}

/// Errors from the chain store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Block {0:?} is already in the store")]
    DuplicateBlock(Hash),

    #[error("Store operation failed: {0}")]
    Io(String),
}

/// The shared block and vote store.
///
/// The store serializes its own writes and provides read-your-writes
/// consistency for block metadata (status, children). Blocks delivered to the
/// engine must already be present in the store; the engine only adds blocks
/// it proposes itself.
pub trait ChainStore: Send + Sync {
    /// The root (genesis) block, the anchor for a fresh consensus state.
    fn root(&self) -> ExtendedBlock;

    /// Look up a block by hash.
    fn find_block(&self, hash: &Hash) -> Option<ExtendedBlock>;

    /// Insert a block as Pending.
    fn add_block(&self, block: Block) -> Result<ExtendedBlock, StoreError>;

    /// Whether `descendant` is `ancestor` or reachable from it by parent
    /// edges.
    fn is_descendant(&self, ancestor: &Hash, descendant: &Hash) -> bool;

    /// Mark a block Valid.
    fn mark_block_valid(&self, hash: &Hash);

    /// Mark a block Invalid.
    fn mark_block_invalid(&self, hash: &Hash);

    /// Record that applying the block changed the validator set.
    fn mark_block_has_validator_update(&self, hash: &Hash);

    /// Mark a block Committed.
    fn commit_block(&self, hash: &Hash);

    /// Mark `hash` and every ancestor up to the previous finalized boundary
    /// as Finalized.
    fn finalize_previous_blocks(&self, hash: &Hash);

    /// Update the transaction index for `block`; `force` repoints entries at
    /// the canonical chain even when already indexed from a fork.
    fn add_txs_to_index(&self, block: &Block, force: bool);

    /// Add a vote to the by-block vote index. Votes are never removed;
    /// eviction is the store's concern.
    fn add_vote(&self, vote: &Vote);

    /// All indexed votes referencing `hash`.
    fn find_votes_by_hash(&self, hash: &Hash) -> VoteSet;
}

/// Errors from the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("State reset to ({height}, {state_root:?}) failed: {reason}")]
    ResetFailed {
        height: u64,
        state_root: Hash,
        reason: String,
    },

    #[error("Transaction application failed: {0}")]
    ApplyFailed(String),

    #[error("Transaction collection failed: {0}")]
    ProposeFailed(String),
}

/// Result of applying a block's transactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockApplyInfo {
    /// Whether the applied transactions changed the validator set.
    pub has_validator_update: bool,
}

/// The transaction ledger: state transition and transaction pool.
///
/// The engine enters the ledger only from its event loop and never overlaps
/// `reset_state`/`apply_block_txs` calls.
pub trait Ledger: Send + Sync {
    /// Rewind the working state to `(height, state_root)`.
    fn reset_state(&self, height: u64, state_root: Hash) -> Result<(), LedgerError>;

    /// Apply `txs` on the working state and verify the resulting root equals
    /// `expected_state_root`.
    fn apply_block_txs(
        &self,
        txs: &[Vec<u8>],
        expected_state_root: Hash,
    ) -> Result<BlockApplyInfo, LedgerError>;

    /// Collect transactions for a new proposal; returns the post-state root
    /// and the chosen transactions.
    fn propose_block_txs(&self) -> Result<(Hash, Vec<Vec<u8>>), LedgerError>;

    /// Persist the finalized state at `(height, state_root)`.
    fn finalize_state(&self, height: u64, state_root: Hash);
}

/// Identifies a peer for directed sends.
pub type PeerId = String;

/// Wire channels used by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// Block headers (relay and catch-up).
    Header,
    /// Full blocks.
    Block,
    /// Standalone votes.
    Vote,
    /// Proposals from the epoch proposer.
    Proposal,
}

/// A framed outbound message.
#[derive(Debug, Clone)]
pub struct DataPacket {
    /// Destination channel.
    pub channel: ChannelId,
    /// Encoded payload (see [`crate::codec`]).
    pub payload: Vec<u8>,
}

/// The peer-to-peer dispatcher.
pub trait Dispatcher: Send + Sync {
    /// Send `packet` to `peers`; an empty slice means broadcast.
    fn send_data(&self, peers: &[PeerId], packet: DataPacket);
}

/// Key-value persistence for consensus state records.
///
/// A durable backend is the host's concern; the engine only requires that a
/// successful `put` is visible to later `get`s.
pub trait StateStore: Send + Sync {
    /// Persist a record.
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Fetch a record.
    fn get(&self, key: &str) -> Option<Vec<u8>>;
}
