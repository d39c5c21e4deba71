//! Block proposals.

use crate::{Block, ValidatorId, VoteSet};

/// A proposal broadcast by the epoch's designated proposer.
///
/// Carries the proposed block plus supporting votes that may help lagging
/// peers progress: votes on the proposer's highest CC block, recent epoch
/// votes, and the proposer's own vote on the new block.
#[derive(Debug, Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct Proposal {
    /// The proposed block.
    pub block: Block,
    /// The proposing validator.
    pub proposer: ValidatorId,
    /// Supporting votes (unique per voter and block).
    pub votes: VoteSet,
}

impl Proposal {
    /// Create a proposal.
    pub fn new(block: Block, proposer: ValidatorId, votes: VoteSet) -> Self {
        Proposal {
            block,
            proposer,
            votes,
        }
    }
}
