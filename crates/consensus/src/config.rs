//! Consensus configuration.

use std::time::Duration;
use thiserror::Error;

/// Configuration validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "max_epoch_length ({max_epoch_length:?}) must be greater than \
         min_proposal_wait ({min_proposal_wait:?})"
    )]
    EpochShorterThanProposalWait {
        max_epoch_length: Duration,
        min_proposal_wait: Duration,
    },

    #[error("message_queue_size must be non-zero")]
    EmptyQueue,
}

/// Immutable configuration for the consensus engine.
///
/// Validated once at engine construction and fixed for the engine's
/// lifetime.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Chain identifier stamped into proposed blocks.
    pub chain_id: String,
    /// Upper bound on epoch duration; the epoch timer.
    pub max_epoch_length: Duration,
    /// Delay before a proposer emits a proposal within its epoch.
    pub min_proposal_wait: Duration,
    /// Capacity of the inbound and finalized channels.
    pub message_queue_size: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            chain_id: "banjo".into(),
            max_epoch_length: Duration::from_secs(8),
            min_proposal_wait: Duration::from_secs(2),
            message_queue_size: 512,
        }
    }
}

impl ConsensusConfig {
    /// Check the configuration invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_epoch_length <= self.min_proposal_wait {
            return Err(ConfigError::EpochShorterThanProposalWait {
                max_epoch_length: self.max_epoch_length,
                min_proposal_wait: self.min_proposal_wait,
            });
        }
        if self.message_queue_size == 0 {
            return Err(ConfigError::EmptyQueue);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(ConsensusConfig::default().validate(), Ok(()));
    }

    #[test]
    fn epoch_must_exceed_proposal_wait() {
        let config = ConsensusConfig {
            max_epoch_length: Duration::from_secs(2),
            min_proposal_wait: Duration::from_secs(2),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EpochShorterThanProposalWait { .. })
        ));
    }

    #[test]
    fn queue_must_be_non_empty() {
        let config = ConsensusConfig {
            message_queue_size: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyQueue));
    }
}
