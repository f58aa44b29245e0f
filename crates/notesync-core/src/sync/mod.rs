//! Synchronization with the remote note store.

mod client;
mod coordinator;
mod error;
pub mod lifecycle;
pub mod protocol;
pub mod reconcile;
mod scheduler;
#[cfg(test)]
mod testing;
pub mod timestamp;

pub use client::{HttpSyncClient, SyncTransport};
pub use coordinator::{NoteSyncOutcome, SkipReason, SyncCoordinator, SyncOutcome, ViewingGuard};
pub use error::{SyncError, SyncResult};
pub use lifecycle::{DeletionLifecycle, LifecycleEvent, SweepReport};
pub use reconcile::{ConflictPolicy, ReconcileReport};
pub use scheduler::{SyncScheduler, SyncTrigger};
pub use crate::state::{SyncState, SyncStatus};
