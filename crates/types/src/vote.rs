//! Votes and vote sets.

use crate::{Hash, PrivateKey, Signature, ValidatorId};
use std::collections::HashMap;
use std::fmt;

/// A vote for a block at a given epoch.
///
/// The signature covers the canonical encoding with the signature field
/// zeroed. A voter casts at most one non-repeat vote per epoch; a repeat is
/// the same block re-signed at a later epoch.
#[derive(Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct Vote {
    /// Hash of the block being voted on.
    pub block_hash: Hash,
    /// Height of the block.
    pub height: u64,
    /// Validator who cast this vote.
    pub voter: ValidatorId,
    /// Epoch at which the vote was cast.
    pub epoch: u64,
    /// Signature over the sign-bytes.
    pub signature: Signature,
}

impl Vote {
    /// Create and sign a vote.
    pub fn new(block_hash: Hash, height: u64, epoch: u64, key: &PrivateKey) -> Self {
        let mut vote = Vote {
            block_hash,
            height,
            voter: key.validator_id(),
            epoch,
            signature: Signature::zero(),
        };
        vote.signature = key.sign(&vote.sign_bytes());
        vote
    }

    /// The canonical encoding with the signature zeroed.
    pub fn sign_bytes(&self) -> Vec<u8> {
        let unsigned = Vote {
            signature: Signature::zero(),
            ..self.clone()
        };
        sbor::basic_encode(&unsigned).expect("vote should be encodable")
    }

    /// Verify the signature against the voter identity.
    pub fn verify(&self) -> bool {
        self.voter.verify(&self.sign_bytes(), &self.signature)
    }

    /// Structural validity: a real block reference and a verifying signature.
    pub fn validate(&self) -> bool {
        !self.block_hash.is_zero() && self.verify()
    }
}

impl fmt::Debug for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vote")
            .field("block", &self.block_hash)
            .field("height", &self.height)
            .field("voter", &self.voter)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// An unordered collection of votes.
///
/// The raw set keeps every distinct vote it has seen, including equivocating
/// votes from the same voter, as evidence. Majority counting goes through the
/// [`unique_voter`](VoteSet::unique_voter) view, which keeps one vote per
/// voter with later (higher-epoch, later-added) votes replacing earlier ones.
#[derive(Clone, Default, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct VoteSet {
    votes: Vec<Vote>,
}

impl VoteSet {
    /// Create an empty vote set.
    pub fn new() -> Self {
        VoteSet { votes: Vec::new() }
    }

    /// Add a vote, suppressing exact duplicates.
    ///
    /// Returns false if an identical vote was already present.
    pub fn add_vote(&mut self, vote: Vote) -> bool {
        if self.votes.iter().any(|v| {
            v.voter == vote.voter
                && v.block_hash == vote.block_hash
                && v.epoch == vote.epoch
                && v.height == vote.height
        }) {
            return false;
        }
        self.votes.push(vote);
        true
    }

    /// Iterate over the raw votes in insertion order.
    pub fn votes(&self) -> impl Iterator<Item = &Vote> {
        self.votes.iter()
    }

    /// Number of raw votes.
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// One vote per voter; later votes replace earlier when their epoch is
    /// at least the kept vote's epoch.
    pub fn unique_voter(&self) -> VoteSet {
        let mut kept: HashMap<ValidatorId, Vote> = HashMap::new();
        for vote in &self.votes {
            match kept.get(&vote.voter) {
                Some(existing) if vote.epoch < existing.epoch => {}
                _ => {
                    kept.insert(vote.voter, vote.clone());
                }
            }
        }
        Self::collect_in_insertion_order(&self.votes, |v| {
            kept.get(&v.voter).map(|k| k == v).unwrap_or(false)
        })
    }

    /// One vote per (voter, block) pair, same replacement rule.
    pub fn unique_voter_and_block(&self) -> VoteSet {
        let mut kept: HashMap<(ValidatorId, Hash), Vote> = HashMap::new();
        for vote in &self.votes {
            let key = (vote.voter, vote.block_hash);
            match kept.get(&key) {
                Some(existing) if vote.epoch < existing.epoch => {}
                _ => {
                    kept.insert(key, vote.clone());
                }
            }
        }
        Self::collect_in_insertion_order(&self.votes, |v| {
            kept.get(&(v.voter, v.block_hash))
                .map(|k| k == v)
                .unwrap_or(false)
        })
    }

    /// Union of two sets (duplicate suppression applies).
    pub fn merge(&self, other: &VoteSet) -> VoteSet {
        let mut merged = self.clone();
        for vote in &other.votes {
            merged.add_vote(vote.clone());
        }
        merged
    }

    /// Keep only votes matching the predicate.
    pub fn filter<F: Fn(&Vote) -> bool>(&self, keep: F) -> VoteSet {
        VoteSet {
            votes: self.votes.iter().filter(|v| keep(v)).cloned().collect(),
        }
    }

    fn collect_in_insertion_order<F: Fn(&Vote) -> bool>(votes: &[Vote], keep: F) -> VoteSet {
        VoteSet {
            votes: votes.iter().filter(|v| keep(v)).cloned().collect(),
        }
    }
}

impl fmt::Debug for VoteSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VoteSet[{}]", self.votes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_hash, test_key};

    #[test]
    fn duplicate_votes_are_suppressed() {
        let key = test_key(1);
        let vote = Vote::new(test_hash(1), 1, 1, &key);
        let mut set = VoteSet::new();
        assert!(set.add_vote(vote.clone()));
        assert!(!set.add_vote(vote));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn unique_voter_keeps_latest_epoch() {
        let key = test_key(1);
        let mut set = VoteSet::new();
        set.add_vote(Vote::new(test_hash(1), 1, 1, &key));
        set.add_vote(Vote::new(test_hash(1), 1, 3, &key));
        set.add_vote(Vote::new(test_hash(1), 1, 2, &key));

        let unique = set.unique_voter();
        assert_eq!(unique.len(), 1);
        assert_eq!(unique.votes().next().unwrap().epoch, 3);
        // Raw set retains everything.
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn equivocation_later_vote_wins_same_epoch() {
        let key = test_key(1);
        let mut set = VoteSet::new();
        set.add_vote(Vote::new(test_hash(1), 5, 4, &key));
        set.add_vote(Vote::new(test_hash(2), 5, 4, &key));

        let unique = set.unique_voter();
        assert_eq!(unique.len(), 1);
        assert_eq!(unique.votes().next().unwrap().block_hash, test_hash(2));
        // Both remain in the raw index as evidence.
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn unique_voter_and_block_keeps_one_per_pair() {
        let key = test_key(1);
        let mut set = VoteSet::new();
        set.add_vote(Vote::new(test_hash(1), 5, 1, &key));
        set.add_vote(Vote::new(test_hash(1), 5, 2, &key));
        set.add_vote(Vote::new(test_hash(2), 5, 2, &key));

        let unique = set.unique_voter_and_block();
        assert_eq!(unique.len(), 2);
        let epochs: Vec<u64> = unique
            .votes()
            .filter(|v| v.block_hash == test_hash(1))
            .map(|v| v.epoch)
            .collect();
        assert_eq!(epochs, vec![2]);
    }

    #[test]
    fn merge_unions_votes() {
        let a_key = test_key(1);
        let b_key = test_key(2);
        let mut a = VoteSet::new();
        a.add_vote(Vote::new(test_hash(1), 1, 1, &a_key));
        let mut b = VoteSet::new();
        b.add_vote(Vote::new(test_hash(1), 1, 1, &b_key));
        b.add_vote(Vote::new(test_hash(1), 1, 1, &a_key));

        let merged = a.merge(&b);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn vote_signature_round_trip() {
        let key = test_key(1);
        let vote = Vote::new(test_hash(9), 3, 2, &key);
        assert!(vote.verify());

        let mut tampered = vote.clone();
        tampered.height = 4;
        assert!(!tampered.verify());
    }
}
