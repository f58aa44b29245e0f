//! Sync trigger queue.
//!
//! Timers and platform callbacks never call the coordinator directly; they
//! enqueue a [`SyncTrigger`] and [`SyncCoordinator::run`] handles the events
//! one at a time.
//!
//! [`SyncCoordinator::run`]: super::SyncCoordinator::run

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Reason a sync pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Periodic auto-sync tick
    Tick,
    /// Network reachability changed
    Connectivity(bool),
    /// App returned to the foreground
    Foreground,
    /// User asked for a refresh
    Manual,
    /// A session was just established
    Login,
}

/// Producer side of the trigger queue.
#[derive(Debug, Clone)]
pub struct SyncScheduler {
    sender: mpsc::Sender<SyncTrigger>,
}

impl SyncScheduler {
    /// Create a scheduler and the receiver to hand to the coordinator.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncTrigger>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue a trigger. A full queue drops it; returns whether it was queued.
    pub fn request(&self, trigger: SyncTrigger) -> bool {
        match self.sender.try_send(trigger) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(trigger)) => {
                tracing::debug!("Sync queue full; dropping {trigger:?}");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Emit [`SyncTrigger::Tick`] every `interval` until the receiver is dropped.
    pub fn spawn_ticker(&self, interval: Duration) -> JoinHandle<()> {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(mpsc::error::TrySendError::Closed(_)) =
                    sender.try_send(SyncTrigger::Tick)
                {
                    break;
                }
            }
        })
    }
}
