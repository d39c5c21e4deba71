//! The consensus engine.
//!
//! A single logical actor: every state transition — epoch progression, vote
//! tallying, block validation, proposal creation, finalization — happens
//! inside [`ConsensusEngine::run`]. Network receivers enqueue messages
//! through an [`EngineHandle`] and never touch engine state directly.
//!
//! # Event loop
//!
//! Per iteration the loop enters the current epoch (re-arming the epoch
//! timer, and the proposal timer when this replica is the epoch's proposer)
//! and then waits on shutdown, the inbound channel, and timer fires:
//!
//! - message → vote engine or block engine; an epoch advance re-enters
//! - epoch timer → cast a vote on the current tip, re-enter the epoch
//! - proposal timer → build and broadcast a proposal, stay in the epoch
//!
//! Timer fires carry the epoch that armed them; a fire that raced a
//! cancellation is discarded.

use crate::codec;
use crate::config::{ConfigError, ConsensusConfig};
use crate::state::{ConsensusState, StateError, StateSummary};
use crate::timers::{TimerFire, TimerId, TimerManager};
use crate::traits::{
    ChainStore, ChannelId, DataPacket, Dispatcher, Ledger, LedgerError, StateStore,
    ValidatorManager,
};
use banjo_types::{
    Block, CommitCertificate, ExtendedBlock, Hash, PrivateKey, Proposal, Signature, ValidatorId,
    Vote,
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

/// Messages delivered to the engine from the network.
///
/// Delivery contract: a [`ConsensusMessage::Block`] must already be present
/// in the chain store (as Pending) when it is enqueued; the engine treats a
/// missing parent as local corruption.
#[derive(Debug, Clone)]
pub enum ConsensusMessage {
    /// A standalone vote.
    Vote(Vote),
    /// A block (from a proposal or relay).
    Block(Block),
}

/// Invariant violations that indicate local corruption.
///
/// Returned from [`ConsensusEngine::run`]; the host terminates. Never mixed
/// into normal error propagation — validation failures and transient ledger
/// errors are handled inside the loop.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("Parent {parent:?} of delivered block {block:?} is not in the store")]
    MissingParent { block: Hash, parent: Hash },

    #[error("Child {0:?} missing from the store during tip traversal")]
    MissingChild(Hash),

    #[error("Previously voted block {0:?} is not in the store")]
    MissingVotedBlock(Hash),

    #[error("Ledger reset to the extension tip failed: {0}")]
    ProposalLedgerReset(#[source] LedgerError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors from building an engine.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load consensus state: {0}")]
    State(#[from] StateError),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// The engine has stopped and no longer accepts messages.
#[derive(Debug, Error)]
#[error("Consensus engine has stopped")]
pub struct EngineStopped;

/// Cloneable handle for enqueueing inbound messages.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    incoming: mpsc::Sender<ConsensusMessage>,
}

impl EngineHandle {
    /// Enqueue a message for the engine.
    ///
    /// Waits for channel capacity; the engine's loop is never blocked by
    /// producers, but producers may be blocked by a busy engine.
    pub async fn add_message(&self, message: ConsensusMessage) -> Result<(), EngineStopped> {
        self.incoming.send(message).await.map_err(|_| EngineStopped)
    }
}

/// Handle for shutting down a running engine.
///
/// When dropped, signals the engine to exit gracefully.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl ShutdownHandle {
    /// Trigger shutdown (consumes the handle).
    pub fn shutdown(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Builder for constructing a [`ConsensusEngine`].
///
/// Required fields: `private_key`, `chain`, `state_store`,
/// `validator_manager`, `ledger`, `dispatcher`. `config` defaults to
/// [`ConsensusConfig::default`].
#[derive(Default)]
pub struct ConsensusEngineBuilder {
    private_key: Option<PrivateKey>,
    config: Option<ConsensusConfig>,
    chain: Option<Arc<dyn ChainStore>>,
    state_store: Option<Arc<dyn StateStore>>,
    validator_manager: Option<Arc<dyn ValidatorManager>>,
    ledger: Option<Arc<dyn Ledger>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl ConsensusEngineBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signing key for votes and proposals.
    pub fn private_key(mut self, key: PrivateKey) -> Self {
        self.private_key = Some(key);
        self
    }

    /// Set the consensus configuration.
    pub fn config(mut self, config: ConsensusConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the chain store.
    pub fn chain(mut self, chain: Arc<dyn ChainStore>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Set the consensus-state store.
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Set the validator manager.
    pub fn validator_manager(mut self, manager: Arc<dyn ValidatorManager>) -> Self {
        self.validator_manager = Some(manager);
        self
    }

    /// Set the ledger.
    pub fn ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Set the dispatcher.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Validate the configuration, load consensus state, and build the
    /// engine together with its shutdown handle.
    pub fn build(self) -> Result<(ConsensusEngine, ShutdownHandle), BuildError> {
        let key = self
            .private_key
            .ok_or(BuildError::MissingField("private_key"))?;
        let chain = self.chain.ok_or(BuildError::MissingField("chain"))?;
        let state_store = self
            .state_store
            .ok_or(BuildError::MissingField("state_store"))?;
        let validator_manager = self
            .validator_manager
            .ok_or(BuildError::MissingField("validator_manager"))?;
        let ledger = self.ledger.ok_or(BuildError::MissingField("ledger"))?;
        let dispatcher = self
            .dispatcher
            .ok_or(BuildError::MissingField("dispatcher"))?;
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let state = ConsensusState::load(state_store, &*chain)?;
        let (incoming_tx, incoming_rx) = mpsc::channel(config.message_queue_size);
        let (finalized_tx, finalized_rx) = mpsc::channel(config.message_queue_size);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (timers, timer_rx) = TimerManager::new();

        let id = key.validator_id();
        let engine = ConsensusEngine {
            key,
            id,
            config,
            chain,
            validator_manager,
            ledger,
            dispatcher,
            state,
            incoming_tx,
            incoming_rx,
            timer_rx,
            timers,
            finalized_tx,
            finalized_rx: Some(finalized_rx),
            shutdown_rx,
            stopped: false,
        };
        let shutdown = ShutdownHandle {
            tx: Some(shutdown_tx),
        };
        Ok((engine, shutdown))
    }
}

/// The chained-BFT consensus engine.
pub struct ConsensusEngine {
    key: PrivateKey,
    id: ValidatorId,
    config: ConsensusConfig,

    chain: Arc<dyn ChainStore>,
    validator_manager: Arc<dyn ValidatorManager>,
    ledger: Arc<dyn Ledger>,
    dispatcher: Arc<dyn Dispatcher>,

    state: ConsensusState,

    incoming_tx: mpsc::Sender<ConsensusMessage>,
    incoming_rx: mpsc::Receiver<ConsensusMessage>,
    timer_rx: mpsc::Receiver<TimerFire>,
    timers: TimerManager,
    finalized_tx: mpsc::Sender<Block>,
    finalized_rx: Option<mpsc::Receiver<Block>>,
    shutdown_rx: oneshot::Receiver<()>,
    stopped: bool,
}

impl ConsensusEngine {
    /// Start building an engine.
    pub fn builder() -> ConsensusEngineBuilder {
        ConsensusEngineBuilder::new()
    }

    /// The channels the core consumes from the dispatcher.
    pub fn channel_ids() -> [ChannelId; 3] {
        [ChannelId::Header, ChannelId::Block, ChannelId::Vote]
    }

    /// This replica's validator identity.
    pub fn id(&self) -> ValidatorId {
        self.id
    }

    /// A cloneable handle for enqueueing inbound messages.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            incoming: self.incoming_tx.clone(),
        }
    }

    /// Take the finalized-blocks stream. Yields each finalized block once;
    /// closed without a sentinel on shutdown.
    pub fn take_finalized_blocks(&mut self) -> Option<mpsc::Receiver<Block>> {
        self.finalized_rx.take()
    }

    /// Diagnostic snapshot of consensus state.
    pub fn summary(&self) -> StateSummary {
        self.state.summary()
    }

    /// Run the engine until shutdown or a fatal invariant violation.
    pub async fn run(mut self) -> Result<(), FatalError> {
        info!(summary = ?self.state.summary(), "Starting consensus engine");

        // Point the ledger's working state at the highest certified block.
        let cc = self.state.highest_cc_block().clone();
        if let Err(e) = self.ledger.reset_state(cc.height, cc.state_root) {
            error!(error = %e, height = cc.height, "Initial ledger reset failed");
        }

        loop {
            self.enter_epoch()?;

            loop {
                tokio::select! {
                    _ = &mut self.shutdown_rx => {
                        self.stopped = true;
                        self.timers.cancel_all();
                        info!("Consensus engine stopped");
                        return Ok(());
                    }
                    message = self.incoming_rx.recv() => {
                        let Some(message) = message else {
                            // Every handle dropped: nothing can reach the
                            // engine any more, stop cleanly.
                            self.stopped = true;
                            self.timers.cancel_all();
                            return Ok(());
                        };
                        if self.process_message(message)? {
                            break;
                        }
                    }
                    fire = self.timer_rx.recv() => {
                        let Some(fire) = fire else { continue };
                        if fire.epoch != self.state.epoch() {
                            debug!(?fire, epoch = self.state.epoch(), "Discarding stale timer fire");
                            continue;
                        }
                        match fire.id {
                            TimerId::Epoch => {
                                debug!(epoch = self.state.epoch(), "Epoch timeout, repeating epoch");
                                self.vote()?;
                                break;
                            }
                            TimerId::Proposal => self.propose()?,
                        }
                    }
                }
            }
        }
    }

    /// Re-arm timers for the current epoch.
    fn enter_epoch(&mut self) -> Result<(), FatalError> {
        let epoch = self.state.epoch();
        self.timers
            .set_timer(TimerId::Epoch, self.config.max_epoch_length, epoch);
        if self.should_propose(epoch)? {
            self.timers
                .set_timer(TimerId::Proposal, self.config.min_proposal_wait, epoch);
        } else {
            self.timers.cancel_timer(TimerId::Proposal);
        }
        Ok(())
    }

    /// Dispatch an inbound message. Returns true when the epoch ended.
    fn process_message(&mut self, message: ConsensusMessage) -> Result<bool, FatalError> {
        match message {
            ConsensusMessage::Vote(vote) => {
                debug!(vote = ?vote, "Received vote");
                self.handle_standalone_vote(vote)
            }
            ConsensusMessage::Block(block) => {
                debug!(block = ?block, "Received block");
                self.handle_block(&block)?;
                Ok(false)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Vote Engine
    // ═══════════════════════════════════════════════════════════════════════

    /// Handle a vote received on the Vote channel: the vote pipeline plus a
    /// CC check on the referenced block.
    fn handle_standalone_vote(&mut self, vote: Vote) -> Result<bool, FatalError> {
        let block_hash = vote.block_hash;
        let end_epoch = self.handle_vote(vote)?;
        self.check_cc(block_hash)?;
        Ok(end_epoch)
    }

    /// The vote pipeline: validate, index, check for an epoch advance.
    ///
    /// Returns true when the vote completed a majority for its epoch and the
    /// engine moved to a new epoch.
    fn handle_vote(&mut self, vote: Vote) -> Result<bool, FatalError> {
        if !vote.validate() {
            warn!(vote = ?vote, "Ignoring invalid vote");
            return Ok(false);
        }

        self.chain.add_vote(&vote);
        self.state.add_epoch_vote(&vote);

        if vote.epoch < self.state.epoch() {
            return Ok(false);
        }

        // Tally only votes at or above the triggering vote's epoch: stale
        // votes must not inflate a majority during rapid epoch jumps.
        let tally = self.state.epoch_votes_at_or_above(vote.epoch);
        let last_finalized = self.state.last_finalized_block().hash();
        let next_validators = self.validator_manager.next_validator_set(&last_finalized);
        if !next_validators.has_majority(&tally) {
            return Ok(false);
        }

        let next_epoch = vote.epoch + 1;
        if next_epoch > self.state.epoch() + 1 {
            // Jumping more than one epoch: rebroadcast the tallied votes so
            // lagging peers can catch up.
            for v in tally.unique_voter().votes() {
                self.broadcast_vote(v);
            }
        }

        debug!(
            epoch = self.state.epoch(),
            next_epoch,
            votes = tally.len(),
            "Majority of epoch votes, moving to new epoch"
        );
        self.state.set_epoch(next_epoch)?;
        Ok(true)
    }

    /// Check whether `hash` now has a commit certificate and process it.
    fn check_cc(&mut self, hash: Hash) -> Result<(), FatalError> {
        if hash.is_zero() {
            return Ok(());
        }
        let Some(block) = self.chain.find_block(&hash) else {
            warn!(block = ?hash, "CC check: referenced block not found");
            return Ok(());
        };
        // Ignore outdated certificates.
        if block.height < self.state.highest_cc_block().height {
            return Ok(());
        }
        let votes = self.chain.find_votes_by_hash(&hash);
        let validators = self.validator_manager.validator_set(&hash);
        if validators.has_majority(&votes) {
            self.process_cc_block(&block)?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Block Engine
    // ═══════════════════════════════════════════════════════════════════════

    /// Validate and apply a delivered block, then vote on the updated tip.
    #[instrument(skip_all, fields(block = ?block.hash(), height = block.height, epoch = block.epoch))]
    fn handle_block(&mut self, block: &Block) -> Result<(), FatalError> {
        let hash = block.hash();
        let Some(parent) = self.chain.find_block(&block.parent) else {
            // Parents are a store precondition for delivery.
            return Err(FatalError::MissingParent {
                block: hash,
                parent: block.parent,
            });
        };

        if !self.validate_block(block, &parent) {
            self.chain.mark_block_invalid(&hash);
            warn!("Block is invalid");
            return Ok(());
        }

        // Replay the HCC's votes so this replica's indices learn everything
        // the proposer knew.
        for vote in block.hcc.votes.votes() {
            self.handle_vote(vote.clone())?;
        }

        if let Err(e) = self.ledger.reset_state(parent.height, parent.state_root) {
            error!(error = %e, parent = ?block.parent, "Failed to reset state to parent");
            return Ok(());
        }
        match self.ledger.apply_block_txs(&block.txs, block.state_root) {
            Err(e) => {
                error!(error = %e, "Failed to apply block txs");
                return Ok(());
            }
            Ok(info) => {
                if info.has_validator_update {
                    self.chain.mark_block_has_validator_update(&hash);
                }
            }
        }

        self.chain.mark_block_valid(&hash);
        self.check_cc(hash)?;

        // Skip voting for blocks older than the current best known epoch.
        // One epoch behind is allowed: votes are processed first and may
        // have advanced the epoch before the block arrived.
        if block.epoch + 1 < self.state.epoch() {
            debug!(engine_epoch = self.state.epoch(), "Skipping vote for block from previous epoch");
            return Ok(());
        }

        self.vote()
    }

    /// The chained-commit validation rule.
    fn validate_block(&self, block: &Block, parent: &ExtendedBlock) -> bool {
        let hash = block.hash();

        if parent.height + 1 != block.height {
            warn!(
                parent_height = parent.height,
                height = block.height,
                "Block height must be parent height + 1"
            );
            return false;
        }
        if parent.epoch >= block.epoch {
            warn!(
                parent_epoch = parent.epoch,
                epoch = block.epoch,
                "Block epoch must exceed parent epoch"
            );
            return false;
        }
        if !parent.status.is_valid() {
            warn!(parent = ?block.parent, "Block refers to an invalid parent");
            return false;
        }
        if !self.chain.is_descendant(&block.hcc.block_hash, &hash) {
            warn!(hcc = ?block.hcc.block_hash, "HCC must be an ancestor");
            return false;
        }

        // HCC proofs are judged under the validator set at the certified
        // block, not at the child.
        let hcc_validators = self.validator_manager.validator_set(&block.hcc.block_hash);
        if !block.hcc.is_valid(&hcc_validators) {
            warn!(hcc = ?block.hcc.block_hash, "Invalid HCC");
            return false;
        }

        // Blocks with validator changes must be followed by two direct
        // confirmation blocks.
        if parent.has_validator_update && block.hcc.block_hash != block.parent {
            warn!(
                hcc = ?block.hcc.block_hash,
                "HCC must equal parent when parent contains validator changes"
            );
            return false;
        }
        if !parent.parent.is_zero() {
            let Some(grandparent) = self.chain.find_block(&parent.parent) else {
                warn!(grandparent = ?parent.parent, "Failed to find grandparent block");
                return false;
            };
            if grandparent.has_validator_update {
                if block.hcc.block_hash != block.parent {
                    warn!(
                        hcc = ?block.hcc.block_hash,
                        "HCC must equal parent when grandparent contains validator changes"
                    );
                    return false;
                }
                if !block.hcc.is_proven(&hcc_validators) {
                    warn!(
                        hcc = ?block.hcc.block_hash,
                        "HCC must carry a majority proof when grandparent contains validator changes"
                    );
                    return false;
                }
            }
        }

        if let Err(e) = block.validate_basic() {
            warn!(error = %e, "Block failed structural validation");
            return false;
        }
        if !self.is_proposer_for(block.epoch, &block.proposer) {
            warn!(proposer = ?block.proposer, epoch = block.epoch, "Invalid proposer");
            return false;
        }
        true
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Vote Casting
    // ═══════════════════════════════════════════════════════════════════════

    /// Cast a vote on the current tip, repeating the last vote when safety
    /// requires it.
    fn vote(&mut self) -> Result<(), FatalError> {
        let tip = self.tip_to_vote()?;
        let tip_hash = tip.hash();

        if !self
            .validator_manager
            .validator_set(&tip_hash)
            .contains(&self.id)
        {
            return Ok(());
        }

        // Repeat the previous vote when voting fresh would regress: the vote
        // height must be monotone, and the tip's HCC must agree with the
        // locally certified chain.
        let local_hcc = self.state.highest_cc_block().hash();
        let repeat_of = match self.state.last_vote() {
            Some(last) if last.height >= tip.height => {
                debug!(
                    last_height = last.height,
                    tip_height = tip.height,
                    "Repeating vote at height"
                );
                Some(last.block_hash)
            }
            Some(last) if tip.hcc.block_hash != local_hcc => {
                debug!(
                    tip_hcc = ?tip.hcc.block_hash,
                    local_hcc = ?local_hcc,
                    "Repeating vote due to mismatched HCC"
                );
                Some(last.block_hash)
            }
            _ => None,
        };

        let vote = match repeat_of {
            Some(voted_hash) => {
                let Some(block) = self.chain.find_block(&voted_hash) else {
                    return Err(FatalError::MissingVotedBlock(voted_hash));
                };
                // Re-sign the same block with the current epoch.
                self.create_vote(&block.block)
            }
            None => {
                let vote = self.create_vote(&tip.block);
                self.state.set_last_vote(vote.clone())?;
                vote
            }
        };

        debug!(vote = ?vote, "Sending vote");
        self.broadcast_vote(&vote);
        self.handle_vote(vote)?;
        Ok(())
    }

    /// Sign a vote for `block` at the current epoch.
    fn create_vote(&self, block: &Block) -> Vote {
        Vote::new(block.hash(), block.height, self.state.epoch(), &self.key)
    }

    fn broadcast_vote(&self, vote: &Vote) {
        let payload = match codec::encode_vote(vote) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, vote = ?vote, "Failed to encode vote");
                return;
            }
        };
        self.dispatcher.send_data(
            &[],
            DataPacket {
                channel: ChannelId::Vote,
                payload,
            },
        );
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Tip Selector
    // ═══════════════════════════════════════════════════════════════════════

    /// The tip to vote on: pending validator-update leaves are included.
    fn tip_to_vote(&self) -> Result<ExtendedBlock, FatalError> {
        self.tip(true)
    }

    /// The tip to extend with a proposal: subtrees rooted at a block with a
    /// validator update are excluded until two direct confirmations exist.
    fn tip_to_extend(&self) -> Result<ExtendedBlock, FatalError> {
        self.tip(false)
    }

    /// Depth-first search over valid descendants of the highest-CC block for
    /// the greatest height.
    ///
    /// Tie-break: among equal heights the first block visited wins; children
    /// are pushed in store order and traversed last-pushed-first.
    fn tip(&self, include_pending_blocking_leaf: bool) -> Result<ExtendedBlock, FatalError> {
        let mut candidate = self.state.highest_cc_block().clone();
        let mut stack = vec![candidate.clone()];

        while let Some(current) = stack.pop() {
            if !current.status.is_valid() {
                continue;
            }
            if !include_pending_blocking_leaf && current.has_validator_update {
                // Extending past this block would violate the two direct
                // confirmations rule until two confirming blocks exist.
                continue;
            }

            if current.height > candidate.height {
                candidate = current.clone();
            }

            for child_hash in &current.children {
                let Some(child) = self.chain.find_block(child_hash) else {
                    return Err(FatalError::MissingChild(*child_hash));
                };
                stack.push(child);
            }
        }
        Ok(candidate)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proposal Engine
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether this replica should propose in `epoch`.
    fn should_propose(&self, epoch: u64) -> Result<bool, FatalError> {
        if epoch == 0 {
            // Nobody proposes on top of an unstarted chain.
            return Ok(false);
        }
        if !self.is_proposer_for(epoch, &self.id) {
            return Ok(false);
        }

        // Don't propose when a majority already votes past our candidate.
        let tip = self.tip_to_extend()?;
        let ahead = self
            .state
            .epoch_votes()
            .filter(|v| v.height >= tip.height + 1);
        let validators = self.validator_manager.next_validator_set(&tip.hash());
        if validators.has_majority(&ahead) {
            debug!(
                tip_height = tip.height,
                "Majority of epoch votes ahead of local tip, skipping proposal"
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn is_proposer_for(&self, epoch: u64, id: &ValidatorId) -> bool {
        let last_finalized = self.state.last_finalized_block().hash();
        self.validator_manager.next_proposer(&last_finalized, epoch) == *id
    }

    /// Build, record, and broadcast a proposal; idempotently repeats the
    /// recorded proposal within an epoch.
    #[instrument(skip_all, fields(epoch = self.state.epoch()))]
    fn propose(&mut self) -> Result<(), FatalError> {
        let proposal = match self.state.last_proposal() {
            Some(last) if last.block.epoch == self.state.epoch() => {
                info!(proposal_block = ?last.block.hash(), "Repeating proposal");
                last.clone()
            }
            _ => match self.create_proposal()? {
                Some(proposal) => {
                    self.state.set_last_proposal(proposal.clone())?;
                    info!(proposal_block = ?proposal.block.hash(), "Making proposal");
                    proposal
                }
                None => return Ok(()),
            },
        };

        let payload = match codec::encode_proposal(&proposal) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode proposal");
                return Ok(());
            }
        };
        self.dispatcher.send_data(
            &[],
            DataPacket {
                channel: ChannelId::Proposal,
                payload,
            },
        );
        Ok(())
    }

    /// Build a block extending the current tip and process it locally.
    ///
    /// Returns None when the proposal fails for a transient reason (ledger
    /// could not collect transactions, store rejected the block).
    fn create_proposal(&mut self) -> Result<Option<Proposal>, FatalError> {
        let tip = self.tip_to_extend()?;
        if let Err(e) = self.ledger.reset_state(tip.height, tip.state_root) {
            // Unrecoverable local corruption: the tip was applied earlier.
            return Err(FatalError::ProposalLedgerReset(e));
        }

        let hcc_hash = self.state.highest_cc_block().hash();
        let mut block = Block {
            chain_id: self.config.chain_id.clone(),
            parent: tip.hash(),
            height: tip.height + 1,
            epoch: self.state.epoch(),
            proposer: self.id,
            timestamp: unix_now(),
            txs: Vec::new(),
            state_root: Hash::ZERO,
            hcc: CommitCertificate::new(
                hcc_hash,
                self.chain.find_votes_by_hash(&hcc_hash).unique_voter(),
            ),
            signature: Signature::zero(),
        };

        let (state_root, txs) = match self.ledger.propose_block_txs() {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Failed to collect txs for block proposal");
                return Ok(None);
            }
        };
        block.txs = txs;
        block.state_root = state_root;
        block.sign(&self.key);

        // Attach votes that may help peers progress: votes on the highest CC
        // block, recent epoch votes, and our own vote on the new block.
        let mut votes = self
            .chain
            .find_votes_by_hash(&hcc_hash)
            .merge(&self.state.epoch_votes())
            .unique_voter_and_block();
        votes.add_vote(self.create_vote(&block));

        if let Err(e) = self.chain.add_block(block.clone()) {
            error!(error = %e, "Failed to add proposed block to chain");
            return Ok(None);
        }

        // Process our own proposal through the same path as everyone else's.
        self.handle_block(&block)?;

        Ok(Some(Proposal::new(block, self.id, votes)))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Finalizer
    // ═══════════════════════════════════════════════════════════════════════

    /// Adopt a new highest-CC block and finalize its parent under the
    /// two-chain commit rule.
    fn process_cc_block(&mut self, cc: &ExtendedBlock) -> Result<(), FatalError> {
        if cc.height <= self.state.highest_cc_block().height {
            return Ok(());
        }

        debug!(cc = ?cc.hash(), height = cc.height, "Updating highest CC block");
        self.state.set_highest_cc_block(cc.clone())?;
        self.chain.commit_block(&cc.hash());

        let Some(parent) = self.chain.find_block(&cc.parent) else {
            error!(parent = ?cc.parent, "Failed to load parent of CC block");
            return Ok(());
        };
        if parent.status.is_committed() {
            self.finalize_block(&parent)?;
        }
        Ok(())
    }

    /// Finalize `block` and publish it downstream.
    fn finalize_block(&mut self, block: &ExtendedBlock) -> Result<(), FatalError> {
        if self.stopped {
            return Ok(());
        }
        // Skip blocks that have already been published.
        if block.hash() == self.state.last_finalized_block().hash() {
            return Ok(());
        }

        info!(block = ?block.hash(), height = block.height, "Finalizing block");

        self.state.set_last_finalized_block(block.clone())?;
        self.ledger.finalize_state(block.height, block.state_root);

        // Mark the block and its ancestors as finalized.
        self.chain.finalize_previous_blocks(&block.hash());

        // Force the tx index onto the canonical chain so it cannot point at
        // duplicates in a fork.
        self.chain.add_txs_to_index(&block.block, true);

        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.finalized_tx.try_send(block.block.clone())
        {
            warn!(block = ?block.hash(), "Finalized channel full, dropping publication");
        }
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ids_cover_inbound_surfaces() {
        let channels = ConsensusEngine::channel_ids();
        assert!(channels.contains(&ChannelId::Header));
        assert!(channels.contains(&ChannelId::Block));
        assert!(channels.contains(&ChannelId::Vote));
    }
}
