//! Timer management for the engine event loop.
//!
//! Each timer is a tokio task that sleeps for the specified duration and then
//! sends a fire event to the timer channel. Timers are re-armed on every
//! epoch entry; each fire carries the epoch that armed it so the loop can
//! discard fires that raced a cancellation.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// The timers the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Epoch timeout: cast a vote and re-enter the epoch.
    Epoch,
    /// Proposal delay: emit a proposal, stay in the epoch.
    Proposal,
}

/// A timer fire, tagged with the epoch that armed the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFire {
    /// Which timer fired.
    pub id: TimerId,
    /// The engine epoch at arming time.
    pub epoch: u64,
}

/// Manages the engine's timers.
pub struct TimerManager {
    /// Active timers (id -> task handle).
    timers: HashMap<TimerId, JoinHandle<()>>,
    /// Fire sender.
    fire_tx: mpsc::Sender<TimerFire>,
}

impl TimerManager {
    /// Create a timer manager and its fire channel.
    ///
    /// The channel is small on purpose: at most one fire per timer can be
    /// outstanding.
    pub fn new() -> (Self, mpsc::Receiver<TimerFire>) {
        let (fire_tx, fire_rx) = mpsc::channel(8);
        (
            TimerManager {
                timers: HashMap::new(),
                fire_tx,
            },
            fire_rx,
        )
    }

    /// Arm a timer to fire after `duration`, replacing any timer with the
    /// same id.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration, epoch: u64) {
        self.cancel_timer(id);

        let fire_tx = self.fire_tx.clone();
        let handle = tokio::spawn(async move {
            trace!(?id, ?duration, epoch, "Timer armed");
            tokio::time::sleep(duration).await;
            trace!(?id, epoch, "Timer fired");
            let _ = fire_tx.send(TimerFire { id, epoch }).await;
        });

        self.timers.insert(id, handle);
        debug!(?id, ?duration, epoch, "Timer set");
    }

    /// Cancel a timer.
    ///
    /// A no-op if the timer does not exist or already fired.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
            debug!(?id, "Timer cancelled");
        }
    }

    /// Cancel all timers. Called during shutdown.
    pub fn cancel_all(&mut self) {
        for (id, handle) in self.timers.drain() {
            handle.abort();
            trace!(?id, "Timer cancelled (shutdown)");
        }
    }

    /// Number of active timers.
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timer_fires_with_epoch_tag() {
        let (mut manager, mut fire_rx) = TimerManager::new();
        manager.set_timer(TimerId::Epoch, Duration::from_millis(10), 3);

        let fire = tokio::time::timeout(Duration::from_millis(100), fire_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");

        assert_eq!(fire, TimerFire { id: TimerId::Epoch, epoch: 3 });
    }

    #[tokio::test]
    async fn cancelled_timer_does_not_fire() {
        let (mut manager, mut fire_rx) = TimerManager::new();
        manager.set_timer(TimerId::Proposal, Duration::from_millis(50), 1);
        manager.cancel_timer(TimerId::Proposal);

        let result = tokio::time::timeout(Duration::from_millis(100), fire_rx.recv()).await;
        assert!(result.is_err(), "Timer should have been cancelled");
    }

    #[tokio::test]
    async fn rearming_replaces_the_timer() {
        let (mut manager, mut fire_rx) = TimerManager::new();
        manager.set_timer(TimerId::Epoch, Duration::from_millis(100), 1);
        manager.set_timer(TimerId::Epoch, Duration::from_millis(10), 2);

        let fire = tokio::time::timeout(Duration::from_millis(50), fire_rx.recv())
            .await
            .expect("timeout - replacement timer didn't fire quickly")
            .expect("channel closed");

        assert_eq!(fire.epoch, 2);
        assert_eq!(manager.active_count(), 1);
    }

    #[tokio::test]
    async fn both_timers_run_independently() {
        let (mut manager, mut fire_rx) = TimerManager::new();
        manager.set_timer(TimerId::Epoch, Duration::from_millis(20), 1);
        manager.set_timer(TimerId::Proposal, Duration::from_millis(10), 1);
        assert_eq!(manager.active_count(), 2);

        let first = fire_rx.recv().await.expect("channel closed");
        let second = fire_rx.recv().await.expect("channel closed");
        assert_eq!(first.id, TimerId::Proposal);
        assert_eq!(second.id, TimerId::Epoch);
    }

    #[tokio::test]
    async fn cancel_all_clears_everything() {
        let (mut manager, mut fire_rx) = TimerManager::new();
        manager.set_timer(TimerId::Epoch, Duration::from_millis(50), 1);
        manager.set_timer(TimerId::Proposal, Duration::from_millis(50), 1);
        manager.cancel_all();
        assert_eq!(manager.active_count(), 0);

        let result = tokio::time::timeout(Duration::from_millis(100), fire_rx.recv()).await;
        assert!(result.is_err(), "No timers should have fired");
    }
}
