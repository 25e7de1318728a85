//! Bidirectional synchronization engine.
//!
//! Keeps the local store consistent with two kinds of external
//! representations: a CalDAV/CardDAV server ([`dav`]) and a git repository
//! of markdown files ([`git`]). Both reconcile through the same shape:
//!
//! 1. list the remote resources and the local entities (soft-deleted
//!    included), load the active mapping rows;
//! 2. classify every item ([`reconcile`]);
//! 3. apply each action in isolation, refreshing the mapping table
//!    ([`engine`]).
//!
//! There is no delta log: classification always works off current state, so
//! an interrupted run converges on the next scheduled pass. The only
//! concurrency primitive is a per-account lock ([`lock`]); scheduling and
//! status bookkeeping live in [`scheduler`].

pub mod dav;
pub mod engine;
pub mod error;
pub mod git;
pub mod lock;
pub mod reconcile;
pub mod scheduler;
mod stores;

pub use engine::{sync_entity_kind, Codec, LocalStore, RemoteChangeSource, SyncContext};
pub use error::SyncError;
pub use lock::{LocalLock, SyncLock};
pub use reconcile::{
    classify, resolve_conflict, ActionCounts, ConflictWinner, LocalState, RemoteResource,
    RemoteWrite, SyncAction,
};
pub use scheduler::{is_due, overall_status, sync_queue, Scheduler, SyncJob, SyncQueue};

/// How a full account run went, across its entity kinds.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub counts: ActionCounts,
    /// Entity kinds the run attempted.
    pub attempted: usize,
    /// Entity kinds whose pass failed outright (listing or setup).
    pub failed: usize,
}
