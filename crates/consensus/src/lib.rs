//! Chained-BFT consensus engine.
//!
//! This crate orders blocks produced by a rotating set of validators and
//! commits them with Byzantine fault tolerance under an honest
//! supermajority. The engine is driven by an epoch clock and a stream of
//! inbound proposals and votes; it emits signed votes and proposals to peers
//! and a stream of finalized blocks to downstream consumers.
//!
//! # Architecture
//!
//! The engine is a single logical actor around one event loop
//! ([`ConsensusEngine::run`]). All collaborators — validator manager, chain
//! store, ledger, dispatcher, state store — are trait handles passed at
//! construction; concurrent producers reach the loop only through bounded
//! channels.
//!
//! - `ConsensusMessage::Vote` → validate, index, tally epoch votes, detect
//!   commit certificates
//! - `ConsensusMessage::Block` → validate against the chained-commit rule,
//!   apply on the ledger, vote on the updated tip
//! - epoch timer → cast a (possibly repeated) vote, re-enter the epoch
//! - proposal timer → build and broadcast a proposal
//!
//! # Safety
//!
//! - **Vote monotonicity**: a replica's vote height never decreases; when
//!   the tip would regress, or its HCC disagrees with the locally certified
//!   chain, the replica repeats its previous vote re-signed at the current
//!   epoch.
//!
//! - **HCC ancestry**: a block's embedded certificate must name one of its
//!   own ancestors and, where a proof is required, carry a majority vote set
//!   under the validator set at the certified block.
//!
//! - **Two-chain commit**: observing a commit certificate for a block marks
//!   it Committed; its parent, once Committed, becomes Finalized and is
//!   published downstream.
//!
//! - **Two direct confirmations**: a block that changes the validator set
//!   must be followed by two consecutive blocks whose HCC names their
//!   immediate parent before the subtree can be extended.
//!
//! # Liveness
//!
//! - **Epoch clock**: each epoch is bounded by `max_epoch_length`; on
//!   timeout every replica votes on its tip, and a supermajority of epoch
//!   votes advances the epoch.
//!
//! - **Proposer rotation**: the proposer for an epoch is derived from the
//!   last finalized block; a proposer that observes a majority voting past
//!   its candidate stands down for the epoch.

mod codec;
mod config;
mod engine;
mod state;
mod timers;
mod traits;

pub use codec::{
    decode_message, encode_block, encode_proposal, encode_vote, CodecError, WirePayload,
    WIRE_VERSION,
};
pub use config::{ConfigError, ConsensusConfig};
pub use engine::{
    BuildError, ConsensusEngine, ConsensusEngineBuilder, ConsensusMessage, EngineHandle,
    EngineStopped, FatalError, ShutdownHandle,
};
pub use state::{ConsensusState, StateError, StateSummary};
pub use timers::{TimerFire, TimerId, TimerManager};
pub use traits::{
    BlockApplyInfo, ChainStore, ChannelId, DataPacket, Dispatcher, Ledger, LedgerError, PeerId,
    StateStore, StoreError, ValidatorManager,
};
