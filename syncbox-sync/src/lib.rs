//! # syncbox-sync
//!
//! Snapshot building, startup reconciliation and live event translation.
//!
//! [`build`] hashes the watched tree once, [`reconcile`] diffs it against the
//! server's snapshot, and [`EventTranslator`] turns each filesystem change into
//! a [`SyncOperation`](syncbox_core::SyncOperation). Failed deliveries go to
//! the [`outbox::Outbox`].

pub mod builder;
pub mod error;
pub mod outbox;
pub mod reconcile;
pub mod translate;

pub use builder::build;
pub use error::SyncError;
pub use outbox::{Outbox, OutboxEntry};
pub use reconcile::reconcile;
pub use translate::{EventTranslator, FsEvent};
