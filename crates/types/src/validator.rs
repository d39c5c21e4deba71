//! Validators and stake-weighted validator sets.

use crate::{ValidatorId, VoteSet};

/// A validator with its stake weight.
#[derive(Debug, Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct Validator {
    /// The validator's identity.
    pub id: ValidatorId,
    /// Stake weight used in majority arithmetic.
    pub stake: u64,
}

impl Validator {
    /// Create a validator.
    pub fn new(id: ValidatorId, stake: u64) -> Self {
        Validator { id, stake }
    }
}

/// The weighted voter set authorized to vote at a given block.
///
/// Ordering is part of the set's identity (proposer rotation is derived from
/// it by the validator manager), so entries are kept as given.
#[derive(Debug, Clone, Default, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
}

impl ValidatorSet {
    /// Create a validator set from an ordered list of validators.
    pub fn new(validators: Vec<Validator>) -> Self {
        ValidatorSet { validators }
    }

    /// The validators, in set order.
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Look up a validator by identity.
    pub fn get(&self, id: &ValidatorId) -> Option<&Validator> {
        self.validators.iter().find(|v| v.id == *id)
    }

    /// Whether `id` is a member of this set.
    pub fn contains(&self, id: &ValidatorId) -> bool {
        self.get(id).is_some()
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Total stake of the set.
    pub fn total_stake(&self) -> u64 {
        self.validators.iter().map(|v| v.stake).sum()
    }

    /// Stake-weighted supermajority check: `3 * voted > 2 * total`.
    ///
    /// Each voter is counted at most once (unique-voter view) and only
    /// members of this set contribute stake. Votes in the set may reference
    /// different blocks; callers that need agreement on a single block must
    /// pass a vote set already filtered to that block.
    pub fn has_majority(&self, votes: &VoteSet) -> bool {
        let voted: u128 = votes
            .unique_voter()
            .votes()
            .filter_map(|v| self.get(&v.voter))
            .map(|v| v.stake as u128)
            .sum();
        3 * voted > 2 * self.total_stake() as u128
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_hash, test_key, test_validator_set};
    use crate::Vote;

    #[test]
    fn majority_threshold_is_two_thirds() {
        let (keys, set) = test_validator_set(4, 100);
        let mut votes = VoteSet::new();
        for key in keys.iter().take(2) {
            votes.add_vote(Vote::new(test_hash(1), 1, 1, key));
        }
        // 200 of 400: not a majority.
        assert!(!set.has_majority(&votes));

        votes.add_vote(Vote::new(test_hash(1), 1, 1, &keys[2]));
        // 300 of 400: 900 > 800.
        assert!(set.has_majority(&votes));
    }

    #[test]
    fn non_members_do_not_count() {
        let (_, set) = test_validator_set(3, 100);
        let outsider = test_key(99);
        let mut votes = VoteSet::new();
        for _ in 0..5 {
            votes.add_vote(Vote::new(test_hash(1), 1, 1, &outsider));
        }
        assert!(!set.has_majority(&votes));
    }

    #[test]
    fn equivocating_voter_counts_once() {
        let (keys, set) = test_validator_set(3, 100);
        let mut votes = VoteSet::new();
        // One voter, three different blocks at the same epoch.
        votes.add_vote(Vote::new(test_hash(1), 1, 1, &keys[0]));
        votes.add_vote(Vote::new(test_hash(2), 1, 1, &keys[0]));
        votes.add_vote(Vote::new(test_hash(3), 1, 1, &keys[0]));
        assert!(!set.has_majority(&votes));
    }

    #[test]
    fn unequal_stake_weights() {
        let heavy = test_key(1);
        let light_a = test_key(2);
        let light_b = test_key(3);
        let set = ValidatorSet::new(vec![
            Validator::new(heavy.validator_id(), 800),
            Validator::new(light_a.validator_id(), 100),
            Validator::new(light_b.validator_id(), 100),
        ]);

        let mut votes = VoteSet::new();
        votes.add_vote(Vote::new(test_hash(1), 1, 1, &heavy));
        // 800 of 1000: 2400 > 2000.
        assert!(set.has_majority(&votes));

        let mut votes = VoteSet::new();
        votes.add_vote(Vote::new(test_hash(1), 1, 1, &light_a));
        votes.add_vote(Vote::new(test_hash(1), 1, 1, &light_b));
        assert!(!set.has_majority(&votes));
    }
}
