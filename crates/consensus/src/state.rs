//! Persistent consensus state and the in-memory epoch vote index.

use crate::traits::{ChainStore, StateStore, StoreError};
use banjo_types::{ExtendedBlock, Hash, Proposal, Vote, VoteSet};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

const KEY_EPOCH: &str = "consensus/epoch";
const KEY_LAST_VOTE: &str = "consensus/last_vote";
const KEY_LAST_PROPOSAL: &str = "consensus/last_proposal";
const KEY_HIGHEST_CC: &str = "consensus/highest_cc";
const KEY_LAST_FINALIZED: &str = "consensus/last_finalized";

/// Errors from loading or persisting consensus state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State persistence failed: {0}")]
    Store(#[from] StoreError),

    #[error("Corrupt consensus record {key}: {reason}")]
    Corrupt { key: &'static str, reason: String },

    #[error("Block {0:?} referenced by consensus state is not in the store")]
    MissingBlock(Hash),
}

/// A compact snapshot of consensus state for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSummary {
    /// Current epoch.
    pub epoch: u64,
    /// Height of the most recent own vote, 0 if none yet.
    pub last_vote_height: u64,
    /// Hash of the highest block with an observed commit certificate.
    pub highest_cc: Hash,
    /// Hash of the last finalized block.
    pub last_finalized: Hash,
}

/// Consensus state.
///
/// The persisted records are the epoch, this replica's last vote and last
/// proposal, and the hashes of the highest-CC and last-finalized blocks;
/// blocks themselves live in the chain store and are re-resolved on load.
/// The by-epoch vote index is in-memory only — it is rebuilt from live
/// traffic and the durable by-block index belongs to the chain store.
pub struct ConsensusState {
    store: Arc<dyn StateStore>,
    epoch: u64,
    last_vote: Option<Vote>,
    last_proposal: Option<Proposal>,
    highest_cc_block: ExtendedBlock,
    last_finalized_block: ExtendedBlock,
    /// Votes indexed by epoch, insertion order preserved within an epoch.
    votes_by_epoch: BTreeMap<u64, VoteSet>,
}

impl ConsensusState {
    /// Load consensus state, falling back to a fresh state anchored at the
    /// chain root when no records exist.
    pub fn load(store: Arc<dyn StateStore>, chain: &dyn ChainStore) -> Result<Self, StateError> {
        let epoch = match store.get(KEY_EPOCH) {
            Some(bytes) => decode_record(KEY_EPOCH, &bytes)?,
            None => 0,
        };
        let last_vote = store
            .get(KEY_LAST_VOTE)
            .map(|bytes| decode_record(KEY_LAST_VOTE, &bytes))
            .transpose()?;
        let last_proposal = store
            .get(KEY_LAST_PROPOSAL)
            .map(|bytes| decode_record(KEY_LAST_PROPOSAL, &bytes))
            .transpose()?;
        let highest_cc_block = Self::load_block(&*store, chain, KEY_HIGHEST_CC)?;
        let last_finalized_block = Self::load_block(&*store, chain, KEY_LAST_FINALIZED)?;

        Ok(ConsensusState {
            store,
            epoch,
            last_vote,
            last_proposal,
            highest_cc_block,
            last_finalized_block,
            votes_by_epoch: BTreeMap::new(),
        })
    }

    fn load_block(
        store: &dyn StateStore,
        chain: &dyn ChainStore,
        key: &'static str,
    ) -> Result<ExtendedBlock, StateError> {
        match store.get(key) {
            Some(bytes) => {
                let hash: Hash = decode_record(key, &bytes)?;
                chain
                    .find_block(&hash)
                    .ok_or(StateError::MissingBlock(hash))
            }
            None => Ok(chain.root()),
        }
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Advance the epoch. Epochs never move backwards.
    pub fn set_epoch(&mut self, epoch: u64) -> Result<(), StateError> {
        debug_assert!(epoch >= self.epoch);
        self.epoch = epoch;
        self.put_record(KEY_EPOCH, &epoch)
    }

    /// The most recent vote this replica cast, if any.
    pub fn last_vote(&self) -> Option<&Vote> {
        self.last_vote.as_ref()
    }

    /// Record this replica's vote. Persisted before the vote leaves the
    /// node so a restart cannot equivocate.
    pub fn set_last_vote(&mut self, vote: Vote) -> Result<(), StateError> {
        self.put_record(KEY_LAST_VOTE, &vote)?;
        self.last_vote = Some(vote);
        Ok(())
    }

    /// The most recent proposal this replica made, if any.
    pub fn last_proposal(&self) -> Option<&Proposal> {
        self.last_proposal.as_ref()
    }

    /// Record this replica's proposal for idempotent re-broadcast.
    pub fn set_last_proposal(&mut self, proposal: Proposal) -> Result<(), StateError> {
        self.put_record(KEY_LAST_PROPOSAL, &proposal)?;
        self.last_proposal = Some(proposal);
        Ok(())
    }

    /// The block with the most recent observed commit certificate.
    pub fn highest_cc_block(&self) -> &ExtendedBlock {
        &self.highest_cc_block
    }

    /// Update the highest-CC block.
    pub fn set_highest_cc_block(&mut self, block: ExtendedBlock) -> Result<(), StateError> {
        self.put_record(KEY_HIGHEST_CC, &block.hash())?;
        self.highest_cc_block = block;
        Ok(())
    }

    /// The last finalized block.
    pub fn last_finalized_block(&self) -> &ExtendedBlock {
        &self.last_finalized_block
    }

    /// Update the last finalized block.
    pub fn set_last_finalized_block(&mut self, block: ExtendedBlock) -> Result<(), StateError> {
        self.put_record(KEY_LAST_FINALIZED, &block.hash())?;
        self.last_finalized_block = block;
        Ok(())
    }

    /// Index a vote by its epoch.
    pub fn add_epoch_vote(&mut self, vote: &Vote) {
        self.votes_by_epoch
            .entry(vote.epoch)
            .or_default()
            .add_vote(vote.clone());
    }

    /// Every indexed vote, one per voter, keeping each voter's latest.
    pub fn epoch_votes(&self) -> VoteSet {
        let mut all = VoteSet::new();
        for set in self.votes_by_epoch.values() {
            all = all.merge(set);
        }
        all.unique_voter()
    }

    /// All indexed votes with `epoch >= floor`.
    ///
    /// Votes from epochs strictly below the floor are excluded so stale
    /// votes cannot inflate an epoch-advance majority.
    pub fn epoch_votes_at_or_above(&self, floor: u64) -> VoteSet {
        let mut tally = VoteSet::new();
        for set in self.votes_by_epoch.range(floor..).map(|(_, set)| set) {
            tally = tally.merge(set);
        }
        tally
    }

    /// Diagnostic snapshot.
    pub fn summary(&self) -> StateSummary {
        StateSummary {
            epoch: self.epoch,
            last_vote_height: self.last_vote.as_ref().map(|v| v.height).unwrap_or(0),
            highest_cc: self.highest_cc_block.hash(),
            last_finalized: self.last_finalized_block.hash(),
        }
    }

    fn put_record<T: sbor::prelude::BasicEncode>(
        &self,
        key: &'static str,
        value: &T,
    ) -> Result<(), StateError> {
        let bytes = sbor::basic_encode(value).map_err(|e| StateError::Corrupt {
            key,
            reason: format!("{:?}", e),
        })?;
        self.store.put(key, bytes)?;
        Ok(())
    }
}

impl fmt::Debug for ConsensusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsensusState")
            .field("epoch", &self.epoch)
            .field("last_vote", &self.last_vote)
            .field("highest_cc", &self.highest_cc_block.hash())
            .field("last_finalized", &self.last_finalized_block.hash())
            .field("epochs_indexed", &self.votes_by_epoch.len())
            .finish()
    }
}

fn decode_record<T: sbor::prelude::BasicDecode>(
    key: &'static str,
    bytes: &[u8],
) -> Result<T, StateError> {
    sbor::basic_decode(bytes).map_err(|e| StateError::Corrupt {
        key,
        reason: format!("{:?}", e),
    })
}
